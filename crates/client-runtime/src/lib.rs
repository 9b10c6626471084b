//! Wayfarer client runtime.
//!
//! Wires the credential store, token provider, auth-gated executor, local
//! store and sync coordinator into one [`ClientRuntime`] handle, and
//! accepts the single inbound host notification: account removal.
//!
//! ```ignore
//! let paths = Paths::new()?;
//! let config = Config::load(&paths)?;
//! init_logging(&config.log_level);
//! let runtime = ClientRuntime::open(config, &paths).await?;
//! runtime.start();
//! runtime.sign_in(&"a@example.com".into(), "pw1234").await?;
//! let journals = runtime.fetch(EntityKind::Journal).await?;
//! ```

mod error;
mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use runtime::ClientRuntime;

pub use auth_engine::{AcquireMode, Registration};
pub use client_config_and_utils::{init_logging, Config, Paths};
pub use credential_store::{AccountId, Category, Profile};
pub use gated_executor::{ApiRequest, ErrorKind, RequestScope, ScopeTicket};
pub use local_store::{EntityKind, Fields, LocalId, StoreChange, SyncableEntity};
pub use sync_coordinator::{DeleteOutcome, SyncReport};
