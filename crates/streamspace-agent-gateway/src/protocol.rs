//! Wire protocol for the agent connection (§4.6): every frame is a JSON
//! object `{type, timestamp, payload}`. Generalizes the teacher's
//! `#[serde(tag = "type")]` `WsMessage` — which flattens variant fields
//! into the top-level object — into an explicit envelope with a nested
//! `payload`, matching the three-field shape the protocol calls for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use streamspace_types::{
    command::CommandAction,
    ids::{AgentId, CommandId, SessionId, TunnelId},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

fn frame(kind: &str, payload: Value) -> Frame {
    Frame {
        kind: kind.to_string(),
        timestamp: Utc::now(),
        payload,
    }
}

/// Control-plane → agent frame kinds.
#[derive(Debug, Clone)]
pub enum ControlToAgent {
    Command {
        command_id: CommandId,
        session_id: SessionId,
        action: CommandAction,
        payload: Value,
    },
    Ping,
    Shutdown {
        reason: String,
    },
    VncData {
        tunnel_id: TunnelId,
        seq: u64,
        data: String,
    },
    VncClose {
        tunnel_id: TunnelId,
    },
}

impl ControlToAgent {
    pub fn into_frame(self) -> Frame {
        match self {
            ControlToAgent::Command { command_id, session_id, action, payload } => frame(
                "command",
                serde_json::json!({
                    "command_id": command_id,
                    "session_id": session_id,
                    "action": action,
                    "payload": payload,
                }),
            ),
            ControlToAgent::Ping => frame("ping", Value::Null),
            ControlToAgent::Shutdown { reason } => frame("shutdown", serde_json::json!({ "reason": reason })),
            ControlToAgent::VncData { tunnel_id, seq, data } => frame(
                "vnc_data",
                serde_json::json!({ "tunnel_id": tunnel_id, "seq": seq, "data": data }),
            ),
            ControlToAgent::VncClose { tunnel_id } => frame("vnc_close", serde_json::json!({ "tunnel_id": tunnel_id })),
        }
    }
}

/// Agent → control-plane frame kinds. `Hello` is the connect-time identity
/// assertion this workspace adds on top of §4.6's steady-state frame list —
/// the teacher's `Register` plays the same "first frame on the socket
/// establishes identity" role.
#[derive(Debug)]
pub enum AgentToControl {
    Hello { agent_id: AgentId, token: String },
    Heartbeat { session_count: u32 },
    Ack { command_id: CommandId },
    Complete { command_id: CommandId, result: Option<Value> },
    Failed { command_id: CommandId, error: String },
    Status { detail: Value },
    VncReady { session_id: SessionId, tunnel_id: TunnelId, local_port: u16 },
    VncData { tunnel_id: TunnelId, seq: u64, data: String },
    VncError { tunnel_id: TunnelId, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame type {0:?}")]
    UnknownType(String),
    #[error("malformed payload for {0:?}: {1}")]
    Malformed(String, serde_json::Error),
}

impl AgentToControl {
    pub fn from_frame(frame: Frame) -> Result<Self, FrameError> {
        let payload = frame.payload;
        let parse = |v: Value| -> Result<_, FrameError> {
            serde_json::from_value(v).map_err(|e| FrameError::Malformed(frame.kind.clone(), e))
        };
        match frame.kind.as_str() {
            "hello" => {
                #[derive(Deserialize)]
                struct P { agent_id: AgentId, token: String }
                let p: P = parse(payload)?;
                Ok(AgentToControl::Hello { agent_id: p.agent_id, token: p.token })
            }
            "heartbeat" => {
                #[derive(Deserialize)]
                struct P { session_count: u32 }
                let p: P = parse(payload)?;
                Ok(AgentToControl::Heartbeat { session_count: p.session_count })
            }
            "ack" => {
                #[derive(Deserialize)]
                struct P { command_id: CommandId }
                let p: P = parse(payload)?;
                Ok(AgentToControl::Ack { command_id: p.command_id })
            }
            "complete" => {
                #[derive(Deserialize)]
                struct P { command_id: CommandId, #[serde(default)] result: Option<Value> }
                let p: P = parse(payload)?;
                Ok(AgentToControl::Complete { command_id: p.command_id, result: p.result })
            }
            "failed" => {
                #[derive(Deserialize)]
                struct P { command_id: CommandId, error: String }
                let p: P = parse(payload)?;
                Ok(AgentToControl::Failed { command_id: p.command_id, error: p.error })
            }
            "status" => Ok(AgentToControl::Status { detail: payload }),
            "vnc_ready" => {
                #[derive(Deserialize)]
                struct P { session_id: SessionId, tunnel_id: TunnelId, local_port: u16 }
                let p: P = parse(payload)?;
                Ok(AgentToControl::VncReady { session_id: p.session_id, tunnel_id: p.tunnel_id, local_port: p.local_port })
            }
            "vnc_data" => {
                #[derive(Deserialize)]
                struct P { tunnel_id: TunnelId, seq: u64, data: String }
                let p: P = parse(payload)?;
                Ok(AgentToControl::VncData { tunnel_id: p.tunnel_id, seq: p.seq, data: p.data })
            }
            "vnc_error" => {
                #[derive(Deserialize)]
                struct P { tunnel_id: TunnelId, message: String }
                let p: P = parse(payload)?;
                Ok(AgentToControl::VncError { tunnel_id: p.tunnel_id, message: p.message })
            }
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_round_trips_through_json() {
        let ctrl = ControlToAgent::Command {
            command_id: CommandId::new(),
            session_id: SessionId::new(),
            action: CommandAction::StartSession,
            payload: serde_json::json!({}),
        };
        let frame = ctrl.into_frame();
        let text = serde_json::to_string(&frame).unwrap();
        let decoded: Frame = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.kind, "command");
    }

    #[test]
    fn heartbeat_frame_parses_back_to_the_right_variant() {
        let frame = Frame {
            kind: "heartbeat".to_string(),
            timestamp: Utc::now(),
            payload: serde_json::json!({ "session_count": 3 }),
        };
        match AgentToControl::from_frame(frame).unwrap() {
            AgentToControl::Heartbeat { session_count } => assert_eq!(session_count, 3),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        let frame = Frame {
            kind: "not_a_real_type".to_string(),
            timestamp: Utc::now(),
            payload: Value::Null,
        };
        assert!(matches!(AgentToControl::from_frame(frame), Err(FrameError::UnknownType(_))));
    }
}
