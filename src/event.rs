//! Domain event contract.
//!
//! A `DomainEvent` is an immutable fact: who it happened to (`aggregate_id`),
//! when (`occurred_on`), what (`EventBody`), and a globally unique id. The
//! serialized JSON form is the durable outbox payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type discriminator for account creation.
pub const ACCOUNT_CREATED: &str = "account.created";

/// Something that happened in the business domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    event_id: String,
    aggregate_id: String,
    occurred_on: DateTime<Utc>,
    #[serde(flatten)]
    body: EventBody,
}

impl DomainEvent {
    /// Create a new event with a fresh id, stamped with the current time.
    pub fn new(aggregate_id: impl Into<String>, body: EventBody) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            aggregate_id: aggregate_id.into(),
            occurred_on: Utc::now(),
            body,
        }
    }

    /// Rebuild an event whose identity and timestamp are already known.
    pub fn from_parts(
        event_id: impl Into<String>,
        aggregate_id: impl Into<String>,
        occurred_on: DateTime<Utc>,
        body: EventBody,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            aggregate_id: aggregate_id.into(),
            occurred_on,
            body,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    /// Stable string discriminator, e.g. `account.created`.
    pub fn event_type(&self) -> &'static str {
        self.body.event_type()
    }

    /// Runtime kind used for handler routing.
    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Encode to the durable payload representation.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode a durable payload back into an event.
    pub fn from_payload(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Type-specific event data, tagged by event type in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    #[serde(rename = "account.created")]
    AccountCreated(AccountCreated),
}

impl EventBody {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventBody::AccountCreated(_) => ACCOUNT_CREATED,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventBody::AccountCreated(_) => EventKind::AccountCreated,
        }
    }
}

/// A new account was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    pub name: String,
    pub email: String,
    pub document: String,
}

impl AccountCreated {
    /// Build the event for a freshly created account.
    pub fn event(
        account_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
        document: impl Into<String>,
    ) -> DomainEvent {
        DomainEvent::new(
            account_id,
            EventBody::AccountCreated(AccountCreated {
                name: name.into(),
                email: email.into(),
                document: document.into(),
            }),
        )
    }
}

/// Event kinds, arranged as a closed hierarchy.
///
/// ```text
/// Any
/// └── Account
///     └── AccountCreated
/// ```
///
/// Handlers registered for a kind receive events of that kind and of every
/// kind below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Every domain event.
    Any,
    /// Events raised by the account aggregate.
    Account,
    AccountCreated,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Any, EventKind::Account, EventKind::AccountCreated];

    /// Immediate supertype, `None` for the root.
    pub fn parent(self) -> Option<EventKind> {
        match self {
            EventKind::Any => None,
            EventKind::Account => Some(EventKind::Any),
            EventKind::AccountCreated => Some(EventKind::Account),
        }
    }

    /// True if an event of kind `other` is assignable to this kind.
    pub fn accepts(self, other: EventKind) -> bool {
        let mut current = Some(other);
        while let Some(kind) = current {
            if kind == self {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}
