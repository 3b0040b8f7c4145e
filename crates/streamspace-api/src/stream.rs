//! `GET /api/stream/{channel}`, a server-sent-events push stream per
//! spec.md's C9 note on streaming channels. Only `sessions` is wired up;
//! it re-publishes [`SessionEvent`](streamspace_types::session::SessionEvent)s
//! the coordinator fans out on `session.events.<org_id>` (see
//! `Coordinator::publish_event`). A `metrics` channel is named in the
//! spec's C9 section but has no producer anywhere in this workspace yet.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::{convert::Infallible, time::Duration};
use streamspace_bus::{decode, Bus, Topic};
use streamspace_types::{permission::Permission, session::SessionEvent, Error};

use crate::{error::ApiResult, extract::AuthedPrincipal, AppState};

pub async fn subscribe(
    State(state): State<AppState>,
    AuthedPrincipal(principal): AuthedPrincipal,
    Path(channel): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    principal.require(Permission::SessionRead)?;

    if channel != "sessions" {
        return Err(Error::Invalid(format!("unknown stream channel {channel}")).into());
    }

    let topic = Topic::SessionEvents(principal.org_id.to_string()).to_string();
    let rx = state.bus.subscribe_raw(&topic).await.map_err(|e| Error::Internal(e.to_string()))?;

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            let delivery = rx.recv().await?;
            let Ok(event) = decode::<SessionEvent>(&delivery) else {
                continue;
            };
            let Ok(sse_event) = Event::default().json_data(&event) else {
                continue;
            };
            return Some((Ok(sse_event), rx));
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
