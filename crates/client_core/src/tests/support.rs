//! In-memory stand-in for the account and record service. Calls can be made
//! to fail or be held in flight until a test releases them.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use shared::{
    domain::{Session, UserId, UserIdentity},
    error::{ApiException, ErrorCode},
    protocol::{AuthEvent, AuthEventKind, Entity, PasswordCredentials, RecordQuery},
};
use tokio::sync::{broadcast, oneshot, Mutex};
use uuid::Uuid;

use crate::{gateway::PersistenceGateway, remote::RemoteService};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    GetSession,
    GetUser,
    SignIn,
    SignUp,
    SignOut,
    Refresh,
    Query(Entity),
    Create(Entity),
    Update(Entity),
}

struct Gate {
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// A call parked at a gate. Dropping it without `release` fails the call's wait
/// and lets it proceed.
pub struct HeldCall {
    entered: Option<oneshot::Receiver<()>>,
    release: oneshot::Sender<()>,
}

impl HeldCall {
    pub async fn entered(&mut self) {
        if let Some(entered) = self.entered.take() {
            let _ = entered.await;
        }
    }

    pub fn release(self) {
        let _ = self.release.send(());
    }
}

#[derive(Default)]
struct FakeState {
    session: Option<Session>,
    user_revoked: bool,
    tables: HashMap<Entity, Vec<Value>>,
    calls: Vec<Call>,
    failures: HashMap<Call, String>,
    gates: HashMap<Call, VecDeque<Gate>>,
}

pub struct FakeRemote {
    account: UserId,
    state: Mutex<FakeState>,
    events: broadcast::Sender<AuthEvent>,
}

pub fn session_for(user_id: UserId) -> Session {
    Session {
        access_token: format!("token-{}", Uuid::new_v4()),
        refresh_token: Some("refresh".to_string()),
        expires_at: None,
        user: UserIdentity {
            id: user_id,
            email: Some("owner@example.com".to_string()),
        },
    }
}

pub fn company_row(user_id: UserId, name: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "user_id": user_id,
        "name": name,
        "address": "12 Harbour Road",
        "email": "billing@acme.test",
        "phone": "555-0100",
        "tax_id": "GST-778",
        "currency": "INR - Indian Rupee",
        "tax_rate": 1,
        "website": "",
        "industry": "Design"
    })
}

pub fn client_row(name: &str, created_at: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "name": name,
        "email": format!("{}@clients.test", name.to_lowercase()),
        "phone": null,
        "address": null,
        "created_at": created_at
    })
}

fn column_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, query: &RecordQuery) -> bool {
    query.filters.iter().all(|filter| {
        row.get(&filter.column)
            .map(column_text)
            .is_some_and(|value| value == filter.value)
    })
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            account: UserId(Uuid::new_v4()),
            state: Mutex::new(FakeState::default()),
            events,
        })
    }

    pub fn gateway(self: &Arc<Self>) -> Arc<PersistenceGateway> {
        Arc::new(PersistenceGateway::new(Arc::clone(self) as Arc<dyn RemoteService>))
    }

    pub fn account(&self) -> UserId {
        self.account
    }

    pub async fn set_session(&self, session: Option<Session>) {
        self.state.lock().await.session = session;
    }

    /// Keeps the cached session but makes the auth server reject it.
    pub async fn revoke_user(&self) {
        self.state.lock().await.user_revoked = true;
    }

    pub async fn seed(&self, entity: Entity, row: Value) {
        self.state
            .lock()
            .await
            .tables
            .entry(entity)
            .or_default()
            .push(row);
    }

    pub async fn fail(&self, call: Call, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(call, message.to_string());
    }

    pub async fn clear_failure(&self, call: Call) {
        self.state.lock().await.failures.remove(&call);
    }

    /// Parks the next invocation of `call` until the returned handle is released.
    pub async fn hold(&self, call: Call) -> HeldCall {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.state
            .lock()
            .await
            .gates
            .entry(call)
            .or_default()
            .push_back(Gate {
                entered: entered_tx,
                release: release_rx,
            });
        HeldCall {
            entered: Some(entered_rx),
            release: release_tx,
        }
    }

    /// Updates the cached session and notifies subscribers, as the provider does.
    pub async fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        self.set_session(session.clone()).await;
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count(&self, call: Call) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|recorded| **recorded == call)
            .count()
    }

    pub async fn records(&self, entity: Entity) -> Vec<Value> {
        self.state
            .lock()
            .await
            .tables
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    /// Records the call, takes its gate if one is set, and reports a scripted failure.
    async fn enter(&self, call: Call) -> (Option<Gate>, Result<()>) {
        let mut state = self.state.lock().await;
        state.calls.push(call);
        let gate = state.gates.get_mut(&call).and_then(VecDeque::pop_front);
        let outcome = match state.failures.get(&call) {
            Some(message) => Err(ApiException::new(ErrorCode::Internal, message.clone()).into()),
            None => Ok(()),
        };
        (gate, outcome)
    }

    async fn pass(gate: Option<Gate>) {
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }
    }

    async fn start_session(&self, kind: AuthEventKind) -> Session {
        let session = session_for(self.account);
        self.emit(kind, Some(session.clone())).await;
        session
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn get_session(&self) -> Result<Option<Session>> {
        let (gate, outcome) = self.enter(Call::GetSession).await;
        let session = self.state.lock().await.session.clone();
        Self::pass(gate).await;
        outcome.map(|_| session)
    }

    async fn get_user(&self) -> Result<Option<UserIdentity>> {
        let (gate, outcome) = self.enter(Call::GetUser).await;
        Self::pass(gate).await;
        outcome?;
        let state = self.state.lock().await;
        if state.user_revoked {
            return Ok(None);
        }
        Ok(state.session.as_ref().map(|session| session.user.clone()))
    }

    async fn sign_in_with_password(&self, credentials: &PasswordCredentials) -> Result<Session> {
        let (gate, outcome) = self.enter(Call::SignIn).await;
        Self::pass(gate).await;
        outcome?;
        if credentials.password != "correct horse" {
            return Err(ApiException::new(ErrorCode::Validation, "Invalid login credentials").into());
        }
        Ok(self.start_session(AuthEventKind::SignedIn).await)
    }

    async fn sign_up(&self, _credentials: &PasswordCredentials) -> Result<Option<Session>> {
        let (gate, outcome) = self.enter(Call::SignUp).await;
        Self::pass(gate).await;
        outcome?;
        Ok(Some(self.start_session(AuthEventKind::SignedIn).await))
    }

    async fn sign_out(&self) -> Result<()> {
        let (gate, outcome) = self.enter(Call::SignOut).await;
        Self::pass(gate).await;
        outcome?;
        self.emit(AuthEventKind::SignedOut, None).await;
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let (gate, outcome) = self.enter(Call::Refresh).await;
        Self::pass(gate).await;
        outcome?;
        Ok(self.start_session(AuthEventKind::TokenRefreshed).await)
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<Value>> {
        let (gate, outcome) = self.enter(Call::Query(query.entity)).await;
        let mut rows: Vec<Value> = {
            let state = self.state.lock().await;
            state
                .tables
                .get(&query.entity)
                .map(|rows| rows.iter().filter(|row| matches(row, query)).cloned().collect())
                .unwrap_or_default()
        };
        Self::pass(gate).await;
        outcome?;

        if let Some(order) = &query.order {
            rows.sort_by_key(|row| row.get(&order.column).map(column_text).unwrap_or_default());
            if !order.ascending {
                rows.reverse();
            }
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn create(&self, entity: Entity, record: Value) -> Result<Value> {
        let (gate, outcome) = self.enter(Call::Create(entity)).await;
        Self::pass(gate).await;
        outcome?;

        let Value::Object(mut row) = record else {
            return Err(anyhow!("record must be an object"));
        };
        row.entry("id").or_insert_with(|| json!(Uuid::new_v4()));
        row.entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));
        let row = Value::Object(row);
        self.seed(entity, row.clone()).await;
        Ok(row)
    }

    async fn update(&self, query: &RecordQuery, patch: Value) -> Result<Value> {
        let (gate, outcome) = self.enter(Call::Update(query.entity)).await;
        Self::pass(gate).await;
        outcome?;

        let Value::Object(patch) = patch else {
            return Err(anyhow!("patch must be an object"));
        };
        let mut state = self.state.lock().await;
        let rows = state.tables.entry(query.entity).or_default();
        let mut updated = None;
        for row in rows.iter_mut().filter(|row| matches(row, query)) {
            if let Value::Object(fields) = row {
                for (key, value) in &patch {
                    fields.insert(key.clone(), value.clone());
                }
            }
            updated.get_or_insert_with(|| row.clone());
        }
        updated.ok_or_else(|| anyhow!("no {} record matched", query.entity.table()))
    }
}
