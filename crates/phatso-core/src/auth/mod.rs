//! Authentication module for bearer credentials and session lifetime.
//!
//! This module provides:
//! - `BearerClaims`: unverified decode of a JWT payload
//! - `CredentialStore`: single-slot credential storage (memory, keyring, file)
//! - `Session`: explicit context pairing a store with a clock
//! - `SessionGuard`: periodic re-check plus a pre-expiry callback
//!
//! A credential is valid while it is present and `now < exp`. Anything that
//! fails to decode counts as expired.

pub mod claims;
pub mod clock;
pub mod credentials;
pub mod guard;
pub mod session;

pub use claims::{BearerClaims, CredentialError, DecodeError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
};
pub use guard::{pre_expiry_delay, GuardHandle, GuardState, SessionGuard};
pub use session::Session;
