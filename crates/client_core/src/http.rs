use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{Session, UserIdentity},
    error::{ApiException, ErrorCode, ProviderErrorBody},
    protocol::{AuthEvent, AuthEventKind, Entity, PasswordCredentials, RecordQuery},
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::remote::RemoteService;

const AUTH_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    pub service_url: Url,
    pub api_key: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserIdentity,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
            user: self.user,
        }
    }
}

/// REST client for the hosted account and record service. Holds the
/// process-wide session and announces every change to it on an event channel.
pub struct HttpRemoteService {
    http: Client,
    base_url: Url,
    api_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl HttpRemoteService {
    pub fn new(config: HttpRemoteConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build http client")?;
        let mut base_url = config.service_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Ok(Self {
            http,
            base_url,
            api_key: config.api_key,
            session: RwLock::new(None),
            events,
        })
    }

    /// Installs a previously persisted session, e.g. one read from disk at start-up.
    pub async fn restore_session(&self, session: Session) {
        {
            let mut guard = self.session.write().await;
            *guard = Some(session.clone());
        }
        self.emit(AuthEventKind::InitialSession, Some(session));
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        debug!(?kind, "auth: emitting event");
        let _ = self.events.send(AuthEvent::new(kind, session));
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    async fn bearer(&self) -> String {
        let guard = self.session.read().await;
        guard
            .as_ref()
            .map(|session| session.access_token.clone())
            .unwrap_or_else(|| self.api_key.clone())
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.bearer().await;
        request.header("apikey", &self.api_key).bearer_auth(token)
    }

    async fn records(&self, query: &RecordQuery, request: RequestBuilder) -> RequestBuilder {
        let mut params: Vec<(String, String)> = vec![("select".into(), "*".into())];
        for filter in &query.filters {
            params.push((filter.column.clone(), format!("eq.{}", filter.value)));
        }
        if let Some(order) = &query.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".into(), format!("{}.{direction}", order.column)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".into(), limit.to_string()));
        }
        self.authorized(request.query(&params)).await
    }

    fn table_url(&self, entity: Entity) -> Result<Url> {
        self.endpoint(&format!("rest/v1/{}", entity.table()))
    }

    async fn store_session(&self, session: Session, kind: AuthEventKind) -> Session {
        {
            let mut guard = self.session.write().await;
            *guard = Some(session.clone());
        }
        self.emit(kind, Some(session.clone()));
        session
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ProviderErrorBody>(&body)
        .ok()
        .and_then(ProviderErrorBody::into_message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(ApiException::new(ErrorCode::from_http_status(status.as_u16()), message).into())
}

fn first_record(mut rows: Vec<Value>, entity: Entity) -> Result<Value> {
    if rows.is_empty() {
        return Err(anyhow!(
            "data service returned no {} record",
            entity.table()
        ));
    }
    Ok(rows.swap_remove(0))
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(self.session.read().await.clone())
    }

    async fn get_user(&self) -> Result<Option<UserIdentity>> {
        let token = {
            let guard = self.session.read().await;
            match guard.as_ref() {
                Some(session) => session.access_token.clone(),
                None => return Ok(None),
            }
        };

        let response = self
            .http
            .get(self.endpoint("auth/v1/user")?)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("auth: access token rejected while resolving current user");
            return Ok(None);
        }
        let user: UserIdentity = check(response).await?.json().await?;
        Ok(Some(user))
    }

    async fn sign_in_with_password(&self, credentials: &PasswordCredentials) -> Result<Session> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(credentials)
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        let session = self
            .store_session(token.into_session(), AuthEventKind::SignedIn)
            .await;
        info!(user_id = %session.user_id(), "auth: signed in");
        Ok(session)
    }

    async fn sign_up(&self, credentials: &PasswordCredentials) -> Result<Option<Session>> {
        let response = self
            .http
            .post(self.endpoint("auth/v1/signup")?)
            .header("apikey", &self.api_key)
            .json(credentials)
            .send()
            .await?;
        let body: Value = check(response).await?.json().await?;
        if body.get("access_token").is_none() {
            info!("auth: sign-up accepted, awaiting email confirmation");
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| anyhow!("malformed sign-up response: {e}"))?;
        let session = self
            .store_session(token.into_session(), AuthEventKind::SignedIn)
            .await;
        Ok(Some(session))
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = { self.session.write().await.take() };
        if let Some(session) = previous {
            let result = self
                .http
                .post(self.endpoint("auth/v1/logout")?)
                .header("apikey", &self.api_key)
                .bearer_auth(&session.access_token)
                .send()
                .await;
            match result {
                Ok(response) => {
                    if let Err(err) = check(response).await {
                        warn!("auth: remote logout failed, local session cleared anyway: {err}");
                    }
                }
                Err(err) => {
                    warn!("auth: remote logout unreachable, local session cleared anyway: {err}")
                }
            }
        }
        self.emit(AuthEventKind::SignedOut, None);
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = {
            let guard = self.session.read().await;
            guard
                .as_ref()
                .and_then(|session| session.refresh_token.clone())
                .ok_or_else(|| anyhow!("no refresh token available"))?
        };
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let response = self
            .http
            .post(url)
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        Ok(self
            .store_session(token.into_session(), AuthEventKind::TokenRefreshed)
            .await)
    }

    fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn query(&self, query: &RecordQuery) -> Result<Vec<Value>> {
        let request = self.http.get(self.table_url(query.entity)?);
        let response = self.records(query, request).await.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn create(&self, entity: Entity, record: Value) -> Result<Value> {
        let request = self
            .http
            .post(self.table_url(entity)?)
            .header("Prefer", "return=representation")
            .json(&[record]);
        let response = self.authorized(request).await.send().await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        first_record(rows, entity)
    }

    async fn update(&self, query: &RecordQuery, patch: Value) -> Result<Value> {
        let request = self
            .http
            .patch(self.table_url(query.entity)?)
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.records(query, request).await.send().await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        first_record(rows, query.entity)
    }
}
