//! Authentication for the Wayfarer client core.
//!
//! This crate provides:
//! - The authentication endpoint contract and a reqwest adapter
//! - `TokenProvider`: cached or freshly exchanged access tokens per account
//! - Sign-in, sign-up, credential confirmation and sign-out flows

mod endpoint;
mod error;
mod provider;

pub use endpoint::{
    AuthEndpoint, HttpAuthEndpoint, Registration, TokenGrant, TokenRequest,
    ACCOUNT_INACTIVE_CODE,
};
pub use error::{AuthError, AuthResult};
pub use provider::{AcquireMode, TokenProvider};
