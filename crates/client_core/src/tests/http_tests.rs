use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use shared::{
    error::{ApiException, ErrorCode},
    protocol::{AuthEventKind, Entity, PasswordCredentials, QueryOrder, RecordQuery},
};
use tokio::{net::TcpListener, sync::Mutex};
use url::Url;
use uuid::Uuid;

use crate::{
    http::{HttpRemoteConfig, HttpRemoteService},
    remote::RemoteService,
};

const API_KEY: &str = "anon-key";
const PASSWORD: &str = "correct horse";

#[derive(Debug, Clone)]
struct Seen {
    method: &'static str,
    path: String,
    params: HashMap<String, String>,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
}

#[derive(Default)]
struct Provider {
    user_id: Uuid,
    issued_tokens: Vec<String>,
    revoked: bool,
    logouts: usize,
    tables: HashMap<String, Vec<Value>>,
    rejected_inserts: HashMap<String, String>,
    broken_reads: HashSet<String>,
    seen: Vec<Seen>,
}

type SharedProvider = Arc<Mutex<Provider>>;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn row_matches(row: &Value, params: &HashMap<String, String>) -> bool {
    params.iter().all(|(column, condition)| match condition.strip_prefix("eq.") {
        Some(expected) => row.get(column).map(text).as_deref() == Some(expected),
        None => true,
    })
}

impl Provider {
    fn observe(
        &mut self,
        method: &'static str,
        path: String,
        params: HashMap<String, String>,
        headers: &HeaderMap,
    ) {
        self.seen.push(Seen {
            method,
            path,
            params,
            apikey: header(headers, "apikey"),
            authorization: header(headers, "authorization"),
            prefer: header(headers, "prefer"),
        });
    }

    fn token_body(&mut self) -> Value {
        let token = format!("access-{}", self.issued_tokens.len() + 1);
        self.issued_tokens.push(token.clone());
        json!({
            "access_token": token,
            "refresh_token": format!("refresh-{}", self.issued_tokens.len()),
            "expires_in": 3600,
            "token_type": "bearer",
            "user": { "id": self.user_id, "email": "owner@example.com" }
        })
    }
}

async fn token(
    State(state): State<SharedProvider>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut provider = state.lock().await;
    provider.observe("POST", "/auth/v1/token".into(), params.clone(), &headers);
    match params.get("grant_type").map(String::as_str) {
        Some("password") if body["password"] == PASSWORD => {
            Json(provider.token_body()).into_response()
        }
        Some("refresh_token") if body["refresh_token"].is_string() => {
            Json(provider.token_body()).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            })),
        )
            .into_response(),
    }
}

async fn signup(
    State(state): State<SharedProvider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let mut provider = state.lock().await;
    provider.observe("POST", "/auth/v1/signup".into(), HashMap::new(), &headers);
    let needs_confirmation = body["email"]
        .as_str()
        .is_some_and(|email| email.starts_with("confirm"));
    if needs_confirmation {
        Json(json!({ "id": Uuid::new_v4(), "email": body["email"] }))
    } else {
        Json(provider.token_body())
    }
}

async fn logout(State(state): State<SharedProvider>, headers: HeaderMap) -> StatusCode {
    let mut provider = state.lock().await;
    provider.observe("POST", "/auth/v1/logout".into(), HashMap::new(), &headers);
    provider.logouts += 1;
    StatusCode::NO_CONTENT
}

async fn user(State(state): State<SharedProvider>, headers: HeaderMap) -> Response {
    let mut provider = state.lock().await;
    provider.observe("GET", "/auth/v1/user".into(), HashMap::new(), &headers);
    let token = header(&headers, "authorization")
        .and_then(|value| value.strip_prefix("Bearer ").map(str::to_string));
    let valid = !provider.revoked && token.is_some_and(|token| provider.issued_tokens.contains(&token));
    if valid {
        Json(json!({ "id": provider.user_id, "email": "owner@example.com" })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" }))).into_response()
    }
}

async fn list_rows(
    State(state): State<SharedProvider>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut provider = state.lock().await;
    provider.observe("GET", format!("/rest/v1/{table}"), params.clone(), &headers);
    if provider.broken_reads.contains(&table) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    let mut rows: Vec<Value> = provider
        .tables
        .get(&table)
        .map(|rows| rows.iter().filter(|row| row_matches(row, &params)).cloned().collect())
        .unwrap_or_default();
    if params.get("order").is_some_and(|order| order == "created_at.desc") {
        rows.sort_by_key(|row| std::cmp::Reverse(text(&row["created_at"])));
    }
    if let Some(limit) = params.get("limit").and_then(|limit| limit.parse().ok()) {
        rows.truncate(limit);
    }
    Json(rows).into_response()
}

async fn insert_rows(
    State(state): State<SharedProvider>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(rows): Json<Vec<Value>>,
) -> Response {
    let mut provider = state.lock().await;
    provider.observe("POST", format!("/rest/v1/{table}"), HashMap::new(), &headers);
    if let Some(message) = provider.rejected_inserts.get(&table) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "code": "23505", "message": message })),
        )
            .into_response();
    }

    let created: Vec<Value> = rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(mut fields) => {
                fields.insert("id".into(), json!(Uuid::new_v4()));
                fields
                    .entry("created_at")
                    .or_insert_with(|| json!(Utc::now().to_rfc3339()));
                Some(Value::Object(fields))
            }
            _ => None,
        })
        .collect();
    provider
        .tables
        .entry(table)
        .or_default()
        .extend(created.iter().cloned());
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn update_rows(
    State(state): State<SharedProvider>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Json<Vec<Value>> {
    let mut provider = state.lock().await;
    provider.observe("PATCH", format!("/rest/v1/{table}"), params.clone(), &headers);
    let mut updated = Vec::new();
    for row in provider.tables.entry(table).or_default().iter_mut() {
        if !row_matches(row, &params) {
            continue;
        }
        if let (Value::Object(fields), Value::Object(changes)) = (&mut *row, &patch) {
            for (key, value) in changes {
                fields.insert(key.clone(), value.clone());
            }
        }
        updated.push(row.clone());
    }
    Json(updated)
}

async fn spawn_provider() -> anyhow::Result<(Url, SharedProvider)> {
    let state = Arc::new(Mutex::new(Provider {
        user_id: Uuid::new_v4(),
        ..Provider::default()
    }));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/logout", post(logout))
        .route("/auth/v1/user", get(user))
        .route(
            "/rest/v1/:table",
            get(list_rows).post(insert_rows).patch(update_rows),
        )
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((Url::parse(&format!("http://{addr}"))?, state))
}

async fn connect() -> (HttpRemoteService, SharedProvider) {
    let (url, provider) = spawn_provider().await.expect("spawn provider");
    let service = HttpRemoteService::new(HttpRemoteConfig {
        service_url: url,
        api_key: API_KEY.to_string(),
        request_timeout: Duration::from_secs(5),
    })
    .expect("http client");
    (service, provider)
}

fn credentials(email: &str, password: &str) -> PasswordCredentials {
    PasswordCredentials {
        email: email.to_string(),
        password: password.to_string(),
    }
}

fn api_exception(err: &anyhow::Error) -> &ApiException {
    err.downcast_ref::<ApiException>()
        .expect("error should come from the data service")
}

#[tokio::test]
async fn sign_in_stores_session_and_announces_it() {
    let (service, provider) = connect().await;
    let mut events = service.subscribe_auth_events();

    let session = service
        .sign_in_with_password(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign in");
    assert_eq!(session.access_token, "access-1");
    assert!(session.expires_at.is_some());
    assert_eq!(session.user_id().0, provider.lock().await.user_id);

    let event = events.recv().await.expect("event");
    assert_eq!(event.kind, AuthEventKind::SignedIn);
    assert_eq!(event.session.as_ref(), Some(&session));
    assert_eq!(service.get_session().await.expect("session"), Some(session.clone()));

    let user = service.get_user().await.expect("user").expect("signed in");
    assert_eq!(user.id, session.user_id());

    let seen = provider.lock().await.seen.clone();
    assert_eq!(seen[0].params.get("grant_type").map(String::as_str), Some("password"));
    assert_eq!(seen[0].apikey.as_deref(), Some(API_KEY));
}

#[tokio::test]
async fn rejected_sign_in_carries_the_provider_message() {
    let (service, _provider) = connect().await;

    let err = service
        .sign_in_with_password(&credentials("owner@example.com", "nope"))
        .await
        .unwrap_err();
    let api = api_exception(&err);
    assert_eq!(api.code, ErrorCode::Validation);
    assert_eq!(api.message, "Invalid login credentials");
    assert!(service.get_session().await.expect("session").is_none());
}

#[tokio::test]
async fn record_requests_carry_key_token_and_filters() {
    let (service, provider) = connect().await;

    service
        .query(&RecordQuery::new(Entity::Clients))
        .await
        .expect("anonymous query");
    let session = service
        .sign_in_with_password(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign in");
    service
        .query(
            &RecordQuery::new(Entity::Companies)
                .eq("user_id", session.user_id())
                .order(QueryOrder::newest_first())
                .limit(1),
        )
        .await
        .expect("company query");

    let seen = provider.lock().await.seen.clone();
    let anonymous = &seen[0];
    assert_eq!(anonymous.path, "/rest/v1/clients");
    assert_eq!(anonymous.authorization.as_deref(), Some("Bearer anon-key"));

    let lookup = seen.last().expect("company lookup");
    assert_eq!(lookup.method, "GET");
    assert_eq!(lookup.path, "/rest/v1/companies");
    assert_eq!(lookup.apikey.as_deref(), Some(API_KEY));
    assert_eq!(lookup.authorization.as_deref(), Some("Bearer access-1"));
    assert_eq!(lookup.params["select"], "*");
    assert_eq!(lookup.params["user_id"], format!("eq.{}", session.user_id()));
    assert_eq!(lookup.params["order"], "created_at.desc");
    assert_eq!(lookup.params["limit"], "1");
}

#[tokio::test]
async fn create_returns_the_stored_representation() {
    let (service, provider) = connect().await;

    let created = service
        .create(Entity::Clients, json!({ "name": "Globex" }))
        .await
        .expect("created");
    assert_eq!(created["name"], "Globex");
    assert!(created["id"].is_string());
    assert!(created["created_at"].is_string());

    let rows = service
        .query(&RecordQuery::new(Entity::Clients).eq("name", "Globex"))
        .await
        .expect("listed");
    assert_eq!(rows, vec![created]);

    let seen = provider.lock().await.seen.clone();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].prefer.as_deref(), Some("return=representation"));
}

#[tokio::test]
async fn rejected_create_maps_to_api_exception() {
    let (service, provider) = connect().await;
    provider.lock().await.rejected_inserts.insert(
        "invoices".into(),
        "duplicate key value violates unique constraint \"invoices_invoice_number_key\"".into(),
    );

    let err = service
        .create(Entity::Invoices, json!({ "invoice_number": "INV-1" }))
        .await
        .unwrap_err();
    let api = api_exception(&err);
    assert_eq!(api.code, ErrorCode::Conflict);
    assert!(api.message.starts_with("duplicate key value"));
}

#[tokio::test]
async fn unreadable_error_body_falls_back_to_status_reason() {
    let (service, provider) = connect().await;
    provider.lock().await.broken_reads.insert("invoices".into());

    let err = service
        .query(&RecordQuery::new(Entity::Invoices))
        .await
        .unwrap_err();
    let api = api_exception(&err);
    assert_eq!(api.code, ErrorCode::Internal);
    assert_eq!(api.message, "Internal Server Error");
}

#[tokio::test]
async fn update_patches_matching_rows() {
    let (service, provider) = connect().await;
    let owner = Uuid::new_v4();
    provider.lock().await.tables.insert(
        "companies".into(),
        vec![
            json!({ "id": Uuid::new_v4(), "user_id": owner, "name": "Acme" }),
            json!({ "id": Uuid::new_v4(), "user_id": Uuid::new_v4(), "name": "Other" }),
        ],
    );

    let updated = service
        .update(
            &RecordQuery::new(Entity::Companies).eq("user_id", owner),
            json!({ "name": "Acme Studio" }),
        )
        .await
        .expect("updated");
    assert_eq!(updated["name"], "Acme Studio");
    assert_eq!(provider.lock().await.tables["companies"][1]["name"], "Other");

    let err = service
        .update(
            &RecordQuery::new(Entity::Companies).eq("user_id", Uuid::new_v4()),
            json!({ "name": "Nobody" }),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no companies record"));
}

#[tokio::test]
async fn sign_up_without_session_awaits_confirmation() {
    let (service, _provider) = connect().await;

    let pending = service
        .sign_up(&credentials("confirm-me@example.com", PASSWORD))
        .await
        .expect("sign up accepted");
    assert!(pending.is_none());
    assert!(service.get_session().await.expect("session").is_none());

    let session = service
        .sign_up(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign up")
        .expect("immediate session");
    assert_eq!(service.get_session().await.expect("session"), Some(session));
}

#[tokio::test]
async fn current_user_is_none_without_a_valid_token() {
    let (service, provider) = connect().await;
    assert!(service.get_user().await.expect("no session").is_none());
    assert!(provider.lock().await.seen.is_empty());

    service
        .sign_in_with_password(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign in");
    provider.lock().await.revoked = true;
    assert!(service.get_user().await.expect("rejected token").is_none());
}

#[tokio::test]
async fn sign_out_clears_session_and_announces_it() {
    let (service, provider) = connect().await;
    service
        .sign_in_with_password(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign in");
    let mut events = service.subscribe_auth_events();

    service.sign_out().await.expect("sign out");
    let event = events.recv().await.expect("event");
    assert_eq!(event.kind, AuthEventKind::SignedOut);
    assert!(event.session.is_none());
    assert!(service.get_session().await.expect("session").is_none());
    assert_eq!(provider.lock().await.logouts, 1);

    service.sign_out().await.expect("second sign out is local only");
    assert_eq!(provider.lock().await.logouts, 1);
}

#[tokio::test]
async fn refresh_replaces_the_token() {
    let (service, _provider) = connect().await;
    assert!(service.refresh_session().await.is_err());

    service
        .sign_in_with_password(&credentials("owner@example.com", PASSWORD))
        .await
        .expect("sign in");
    let mut events = service.subscribe_auth_events();
    let refreshed = service.refresh_session().await.expect("refresh");
    assert_eq!(refreshed.access_token, "access-2");
    assert_eq!(
        events.recv().await.expect("event").kind,
        AuthEventKind::TokenRefreshed
    );
}

#[tokio::test]
async fn restored_session_is_announced_as_initial() {
    let (service, _provider) = connect().await;
    let mut events = service.subscribe_auth_events();
    let session = crate::support::session_for(shared::domain::UserId(Uuid::new_v4()));

    service.restore_session(session.clone()).await;
    let event = events.recv().await.expect("event");
    assert_eq!(event.kind, AuthEventKind::InitialSession);
    assert_eq!(service.get_session().await.expect("session"), Some(session));
}
