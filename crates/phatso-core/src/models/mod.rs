//! Request and response types for the queue-management API.
//!
//! Only the authentication contract lives here; rooms, printers, callers and
//! donvi resources are served by the same API but are not modelled.

pub mod auth;

pub use auth::{LoginRequest, LoginResponse};
