//! Syncable entity model.

use chrono::{DateTime, Utc};
use credential_store::AccountId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Entity attributes as a JSON object.
pub type Fields = Map<String, Value>;

/// Store-assigned row identity.
pub type LocalId = i64;

/// Kind of syncable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Journal,
    Activity,
    Contact,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Journal => "journal",
            EntityKind::Activity => "activity",
            EntityKind::Contact => "contact",
        }
    }

    /// Collection path segment on the domain API.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Journal => "journals",
            EntityKind::Activity => "activities",
            EntityKind::Contact => "contacts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "journal" => Ok(EntityKind::Journal),
            "activity" => Ok(EntityKind::Activity),
            "contact" => Ok(EntityKind::Contact),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Upload state of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not yet confirmed created on the server.
    LocalOnly,
    /// A create request is in flight.
    Uploading,
    /// Server id assigned.
    Synced,
}

/// Deletion state of a row. A deleted row no longer exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteState {
    Active,
    /// Tombstoned, waiting for the server to confirm the delete.
    PendingDelete,
}

/// A journal, activity or contact held in the local store.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncableEntity {
    pub local_id: LocalId,
    /// `None` until the server confirmed the create.
    pub server_id: Option<i64>,
    pub account_id: AccountId,
    pub kind: EntityKind,
    pub fields: Fields,
    pub tombstone: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncableEntity {
    pub fn is_local_only(&self) -> bool {
        self.server_id.is_none()
    }

    /// Row state as stored. `Uploading` is only known to the coordinator.
    pub fn sync_state(&self) -> SyncState {
        if self.server_id.is_some() {
            SyncState::Synced
        } else {
            SyncState::LocalOnly
        }
    }

    pub fn delete_state(&self) -> DeleteState {
        if self.tombstone {
            DeleteState::PendingDelete
        } else {
            DeleteState::Active
        }
    }

    /// Tombstoned and known to the server: a remote delete must happen
    /// before the row can go.
    pub fn needs_remote_delete(&self) -> bool {
        self.tombstone && self.server_id.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Row to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub account_id: AccountId,
    pub kind: EntityKind,
    /// Set when hydrating from a server fetch.
    pub server_id: Option<i64>,
    pub fields: Fields,
}

impl NewEntity {
    /// A locally created, not yet uploaded entity.
    pub fn local(account_id: AccountId, kind: EntityKind, fields: Fields) -> Self {
        Self {
            account_id,
            kind,
            server_id: None,
            fields,
        }
    }

    /// An entity hydrated from the server.
    pub fn fetched(account_id: AccountId, kind: EntityKind, server_id: i64, fields: Fields) -> Self {
        Self {
            account_id,
            kind,
            server_id: Some(server_id),
            fields,
        }
    }
}

/// Constraint on the server id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerIdFilter {
    #[default]
    Any,
    Unassigned,
    Assigned,
    Is(i64),
}

/// Row selection for [`LocalStore::query`](crate::LocalStore::query).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityFilter {
    pub account_id: Option<AccountId>,
    pub kind: Option<EntityKind>,
    pub tombstone: Option<bool>,
    pub server_id: ServerIdFilter,
}

impl EntityFilter {
    /// Every row of an account, tombstoned ones included.
    pub fn for_account(account_id: &AccountId) -> Self {
        Self {
            account_id: Some(account_id.clone()),
            ..Default::default()
        }
    }

    /// The UI-facing read path: tombstoned rows are excluded.
    pub fn visible(account_id: &AccountId, kind: EntityKind) -> Self {
        Self::for_account(account_id)
            .with_kind(kind)
            .with_tombstone(false)
    }

    /// Rows waiting for a server-side delete.
    pub fn pending_delete(account_id: &AccountId) -> Self {
        Self {
            tombstone: Some(true),
            server_id: ServerIdFilter::Assigned,
            ..Self::for_account(account_id)
        }
    }

    /// Rows waiting for a server-side create.
    pub fn local_only(account_id: &AccountId) -> Self {
        Self {
            tombstone: Some(false),
            server_id: ServerIdFilter::Unassigned,
            ..Self::for_account(account_id)
        }
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_tombstone(mut self, tombstone: bool) -> Self {
        self.tombstone = Some(tombstone);
        self
    }

    pub fn with_server_id(mut self, server_id: i64) -> Self {
        self.server_id = ServerIdFilter::Is(server_id);
        self
    }
}
