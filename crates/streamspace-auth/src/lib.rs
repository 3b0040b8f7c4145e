//! Tenancy & Auth Gate (C8): resolves a presented credential into a typed
//! [`Principal`], fails closed, and answers role/permission questions from
//! the static table in `streamspace_types::permission`.
//!
//! Has no teacher analog — the teacher's relay has no notion of identity at
//! all — so this is grounded on the pattern the rest of the workspace
//! established for a security-sensitive primitive: `subtle` for
//! constant-time comparison (the same crate `kimberlite-crypto` reaches for
//! to avoid a timing side-channel on credential checks), `jsonwebtoken` for
//! the bearer path, and a typed `Error` enum converted to
//! `streamspace_types::Error` at the boundary.

use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use streamspace_store::Store;
use streamspace_types::{
    ids::{AgentId, OrgId, UserId},
    permission::{role_has_permission, Permission},
    user::OrgRole,
    Error, Result,
};
use subtle::ConstantTimeEq;

/// Who is making the request, per spec §4.8's three actor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    Agent,
    ApiKey,
}

/// The resolved identity a request carries from the moment it passes the
/// gate. Every handler downstream of C8 reads `org_id` from here rather
/// than trusting a client-supplied value.
#[derive(Debug, Clone)]
pub struct Principal {
    pub actor_kind: ActorKind,
    pub actor_id: String,
    pub org_id: OrgId,
    pub org_role: Option<OrgRole>,
}

impl Principal {
    pub fn has_permission(&self, permission: Permission) -> bool {
        match self.org_role {
            Some(role) => role_has_permission(role, permission),
            None => false,
        }
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!("missing permission {permission:?}")))
        }
    }
}

/// The claim set a bearer credential (session cookie or API token) must
/// carry. Minted by the login flow — local password auth, or the external
/// SAML/OIDC callback re-issuing one of ours once it has validated the
/// assertion — never by this crate.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    org_id: OrgId,
    org_role: OrgRole,
    actor_kind: ActorKind,
    exp: i64,
}

pub struct AuthGate {
    store: Arc<dyn Store>,
    jwt_secret: String,
}

impl AuthGate {
    pub fn new(store: Arc<dyn Store>, jwt_secret: String) -> Arc<Self> {
        Arc::new(Self { store, jwt_secret })
    }

    /// Mints a bearer token for a validated user session. The caller (the
    /// local login handler, or the SAML/OIDC callback after it has
    /// validated the external assertion) supplies the already-authenticated
    /// user; this only encodes the claims.
    pub fn issue_bearer(&self, user_id: UserId, org_id: OrgId, org_role: OrgRole, ttl: chrono::Duration) -> Result<String> {
        let claims = Claims {
            sub: user_id.to_string(),
            org_id,
            org_role,
            actor_kind: ActorKind::User,
            exp: (Utc::now() + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(self.jwt_secret.as_bytes()))
            .map_err(|e| Error::Internal(format!("jwt encode: {e}")))
    }

    /// Validates a bearer credential (HS256, `jwt_secret` from config) and
    /// resolves it to a principal. Fails closed: any decode error,
    /// including expiry, is `Unauthenticated`.
    pub fn validate_bearer(&self, token: &str) -> Result<Principal> {
        let data = jsonwebtoken::decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| Error::Unauthenticated)?;
        Ok(Principal {
            actor_kind: data.claims.actor_kind,
            actor_id: data.claims.sub,
            org_id: data.claims.org_id,
            org_role: Some(data.claims.org_role),
        })
    }

    /// Validates an agent's opaque bearer token against its stored hash in
    /// constant time, per §4.3/§4.8. Returns the agent's own org scope
    /// (`None` for a pool-shared agent) rather than a caller-supplied one.
    pub async fn validate_agent_token(&self, agent_id: AgentId, token: &str) -> Result<Option<OrgId>> {
        let stored = self
            .store
            .agents()
            .token_hash(agent_id)
            .await?
            .ok_or(Error::Unauthenticated)?;
        let presented = hash_token(token);
        if presented.as_bytes().ct_eq(stored.as_bytes()).unwrap_u8() != 1 {
            return Err(Error::Unauthenticated);
        }
        let agent = self.store.agents().get(None, agent_id).await?;
        Ok(agent.org_id)
    }

    /// Issues a fresh opaque token for an agent and stores only its hash,
    /// called once at the end of the gateway's connect handshake (§4.3's
    /// "agent token... hashed at rest").
    pub async fn issue_agent_token(&self, agent_id: AgentId) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        self.store.agents().set_token_hash(agent_id, hash_token(&token)).await?;
        Ok(token)
    }
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamspace_store::fake::FakeStore;
    use streamspace_types::agent::{AgentDescriptor, Platform};
    use std::collections::BTreeMap;

    #[test]
    fn bearer_round_trips_through_issue_and_validate() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let gate = AuthGate::new(store, "test-secret".to_string());
        let org_id = OrgId::new();
        let user_id = UserId::new();
        let token = gate
            .issue_bearer(user_id, org_id, OrgRole::Maintainer, chrono::Duration::minutes(5))
            .unwrap();

        let principal = gate.validate_bearer(&token).unwrap();
        assert_eq!(principal.org_id, org_id);
        assert_eq!(principal.actor_id, user_id.to_string());
        assert!(principal.has_permission(Permission::SessionCreate));
        assert!(!principal.has_permission(Permission::OrgManage));
    }

    #[test]
    fn bearer_with_wrong_secret_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let gate = AuthGate::new(store, "right-secret".to_string());
        let token = gate
            .issue_bearer(UserId::new(), OrgId::new(), OrgRole::Viewer, chrono::Duration::minutes(5))
            .unwrap();

        let other_store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let wrong_gate = AuthGate::new(other_store, "wrong-secret".to_string());
        assert!(matches!(wrong_gate.validate_bearer(&token), Err(Error::Unauthenticated)));
    }

    #[tokio::test]
    async fn agent_token_round_trips_and_rejects_garbage() {
        let store: Arc<dyn Store> = Arc::new(FakeStore::default());
        let gate = AuthGate::new(store.clone(), "test-secret".to_string());
        let org_id = OrgId::new();
        let agent = store
            .agents()
            .register(AgentDescriptor {
                org_id: Some(org_id),
                platform: Platform::Kubernetes,
                stable_key: "node-x".to_string(),
                labels: BTreeMap::new(),
                capacity: 1,
            })
            .await
            .unwrap();

        let token = gate.issue_agent_token(agent.id).await.unwrap();
        let resolved = gate.validate_agent_token(agent.id, &token).await.unwrap();
        assert_eq!(resolved, Some(org_id));

        assert!(matches!(
            gate.validate_agent_token(agent.id, "not-the-token").await,
            Err(Error::Unauthenticated)
        ));
    }
}
