use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{
    domain::{
        Client, ClientInput, CompanyProfile, CompanyProfileInput, Invoice, NewInvoice, Session,
        UserId, UserIdentity,
    },
    protocol::{AuthEvent, Entity, PasswordCredentials, QueryOrder, RecordQuery},
};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::remote::RemoteService;

/// Typed access to the account and record service.
///
/// One gateway is created at start-up and shared by reference between
/// controllers. Only the sign-in, sign-up and sign-out operations change its
/// auth context; invoice and client flows only read it.
pub struct PersistenceGateway {
    remote: Arc<dyn RemoteService>,
}

#[derive(Serialize)]
struct CompanyRecord<'a> {
    user_id: UserId,
    #[serde(flatten)]
    input: &'a CompanyProfileInput,
}

impl PersistenceGateway {
    pub fn new(remote: Arc<dyn RemoteService>) -> Self {
        Self { remote }
    }

    pub async fn get_session(&self) -> Result<Option<Session>> {
        self.remote.get_session().await
    }

    pub async fn current_user(&self) -> Result<Option<UserIdentity>> {
        self.remote.get_user().await
    }

    pub fn on_auth_event(&self) -> AuthSubscription {
        AuthSubscription {
            events: self.remote.subscribe_auth_events(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        self.remote
            .sign_in_with_password(&credentials(email, password))
            .await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Session>> {
        self.remote.sign_up(&credentials(email, password)).await
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.remote.sign_out().await
    }

    pub async fn refresh_session(&self) -> Result<Session> {
        self.remote.refresh_session().await
    }

    /// At most one profile exists per user.
    pub async fn find_company(&self, user_id: UserId) -> Result<Option<CompanyProfile>> {
        let rows = self
            .remote
            .query(&RecordQuery::new(Entity::Companies).eq("user_id", user_id).limit(1))
            .await
            .with_context(|| format!("failed to look up company for user {user_id}"))?;
        rows.into_iter()
            .next()
            .map(|row| decode(Entity::Companies, row))
            .transpose()
    }

    pub async fn create_company(
        &self,
        user_id: UserId,
        input: &CompanyProfileInput,
    ) -> Result<CompanyProfile> {
        let created = self
            .remote
            .create(Entity::Companies, encode(&CompanyRecord { user_id, input })?)
            .await?;
        decode(Entity::Companies, created)
    }

    pub async fn update_company(
        &self,
        user_id: UserId,
        input: &CompanyProfileInput,
    ) -> Result<CompanyProfile> {
        let updated = self
            .remote
            .update(
                &RecordQuery::new(Entity::Companies).eq("user_id", user_id),
                encode(input)?,
            )
            .await?;
        decode(Entity::Companies, updated)
    }

    /// All clients visible to the signed-in account, newest first.
    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let rows = self
            .remote
            .query(&RecordQuery::new(Entity::Clients).order(QueryOrder::newest_first()))
            .await?;
        decode_all(Entity::Clients, rows)
    }

    pub async fn create_client(&self, input: &ClientInput) -> Result<Client> {
        let created = self.remote.create(Entity::Clients, encode(input)?).await?;
        decode(Entity::Clients, created)
    }

    pub async fn create_invoice(&self, invoice: &NewInvoice) -> Result<Invoice> {
        let created = self.remote.create(Entity::Invoices, encode(invoice)?).await?;
        decode(Entity::Invoices, created)
    }

    pub async fn list_invoices(&self, user_id: UserId) -> Result<Vec<Invoice>> {
        let rows = self
            .remote
            .query(
                &RecordQuery::new(Entity::Invoices)
                    .eq("user_id", user_id)
                    .order(QueryOrder::newest_first()),
            )
            .await?;
        decode_all(Entity::Invoices, rows)
    }
}

fn credentials(email: &str, password: &str) -> PasswordCredentials {
    PasswordCredentials {
        email: email.trim().to_string(),
        password: password.to_string(),
    }
}

fn encode<T: Serialize>(record: &T) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| anyhow!("failed to encode record: {e}"))
}

fn decode<T: DeserializeOwned>(entity: Entity, row: Value) -> Result<T> {
    serde_json::from_value(row)
        .map_err(|e| anyhow!("malformed {} record from data service: {e}", entity.table()))
}

fn decode_all<T: DeserializeOwned>(entity: Entity, rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(|row| decode(entity, row)).collect()
}

/// A live registration for auth notifications. Dropping it unsubscribes.
pub struct AuthSubscription {
    events: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// The next auth event, or `None` once the service has shut down.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth: subscriber lagged behind, skipping stale events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
