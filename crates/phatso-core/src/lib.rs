//! Core library for phatso-admin.
//!
//! This crate holds everything the admin front ends share:
//!
//! - `auth`: bearer credential decoding, credential stores, the `Session`
//!   context and the `SessionGuard` that watches a credential for expiry
//! - `api`: the REST client for the queue-management auth endpoints
//! - `config`: web and local application configuration
//! - `models`: request/response types for the API
//! - `utils`: small formatting helpers

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{
    BearerClaims, Clock, CredentialError, CredentialStore, DecodeError, FileCredentialStore,
    GuardHandle, GuardState, KeyringCredentialStore, ManualClock, MemoryCredentialStore, Session,
    SessionGuard, SystemClock,
};
pub use config::{AppConfig, StoreKind, WebConfig};
