//! REST API client module for the queue-management service.
//!
//! This module provides the `ApiClient` for the authentication endpoints.
//! The client holds a `Session`, so the bearer credential it attaches is
//! always the one in that session's credential store.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;
