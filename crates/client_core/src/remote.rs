//! The raw account and record service. Implementations speak the provider's
//! protocol; nothing above [`crate::gateway::PersistenceGateway`] sees the
//! untyped records returned here.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    domain::{Session, UserIdentity},
    protocol::{AuthEvent, Entity, PasswordCredentials, RecordQuery},
};
use tokio::sync::broadcast;

#[async_trait]
pub trait RemoteService: Send + Sync {
    /// The cached session, if any. Does not contact the auth server.
    async fn get_session(&self) -> Result<Option<Session>>;
    /// Re-validates the current access token against the auth server.
    async fn get_user(&self) -> Result<Option<UserIdentity>>;
    async fn sign_in_with_password(&self, credentials: &PasswordCredentials) -> Result<Session>;
    /// Returns `None` when the account still needs email confirmation.
    async fn sign_up(&self, credentials: &PasswordCredentials) -> Result<Option<Session>>;
    async fn sign_out(&self) -> Result<()>;
    async fn refresh_session(&self) -> Result<Session>;
    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    async fn query(&self, query: &RecordQuery) -> Result<Vec<Value>>;
    async fn create(&self, entity: Entity, record: Value) -> Result<Value>;
    async fn update(&self, query: &RecordQuery, patch: Value) -> Result<Value>;
}
