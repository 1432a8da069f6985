use serde::{Deserialize, Serialize};

use crate::domain::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self { kind, session }
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }
}

/// Record collections exposed by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Companies,
    Clients,
    Invoices,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Companies => "companies",
            Entity::Clients => "clients",
            Entity::Invoices => "invoices",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqFilter {
    pub column: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOrder {
    pub column: String,
    pub ascending: bool,
}

impl QueryOrder {
    pub fn newest_first() -> Self {
        Self {
            column: "created_at".to_string(),
            ascending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub entity: Entity,
    pub filters: Vec<EqFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<QueryOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl RecordQuery {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push(EqFilter {
            column: column.into(),
            value: value.to_string(),
        });
        self
    }

    pub fn order(mut self, order: QueryOrder) -> Self {
        self.order = Some(order);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordCredentials {
    pub email: String,
    pub password: String,
}
