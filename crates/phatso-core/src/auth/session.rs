use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use tracing::{debug, info, warn};

use super::claims::{BearerClaims, CredentialError};
use super::clock::{Clock, SystemClock};
use super::credentials::CredentialStore;

/// Explicit session context: one credential slot and the clock it is judged
/// against. Clone is cheap; clones share the same store and clock.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CredentialStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current bearer credential, if any
    pub fn token(&self) -> Option<String> {
        self.store.get()
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Store a freshly issued credential, replacing any previous one
    pub fn sign_in(&self, token: &str) -> Result<()> {
        self.store.set(token)?;
        info!("Stored new bearer credential");
        Ok(())
    }

    /// Remove the stored credential
    pub fn sign_out(&self) -> Result<()> {
        self.store.clear()?;
        info!("Cleared bearer credential");
        Ok(())
    }

    /// Decoded claims of the stored credential
    pub fn claims(&self) -> Result<BearerClaims, CredentialError> {
        let token = self.store.get().ok_or(CredentialError::Missing)?;
        Ok(BearerClaims::decode(&token)?)
    }

    /// True only while a credential is stored and `now < exp`
    pub fn is_authenticated(&self) -> bool {
        match self.store.get() {
            Some(token) => !self.is_token_expired(Some(&token)),
            None => false,
        }
    }

    /// Missing or undecodable credentials count as expired
    pub fn is_token_expired(&self, token: Option<&str>) -> bool {
        let Some(token) = token else {
            return true;
        };

        match BearerClaims::decode(token) {
            Ok(claims) => self.clock.now_millis() >= claims.expires_at_millis(),
            Err(e) => {
                warn!(error = %e, "Failed to decode bearer credential, treating as expired");
                true
            }
        }
    }

    /// Absolute expiry in milliseconds since the epoch, or `None` if unknown
    pub fn token_expiration_time(&self, token: Option<&str>) -> Option<i64> {
        let token = token?;
        match BearerClaims::decode(token) {
            Ok(claims) => Some(claims.expires_at_millis()),
            Err(e) => {
                debug!(error = %e, "Expiry unknown for undecodable credential");
                None
            }
        }
    }

    /// `exp * 1000 - now`. Negative once the credential has expired;
    /// `None` when the credential is missing or cannot be decoded.
    pub fn time_until_expiration(&self, token: Option<&str>) -> Option<Duration> {
        let expires_at = self.token_expiration_time(token)?;
        Some(Duration::milliseconds(expires_at - self.clock.now_millis()))
    }

    /// Time left on the stored credential
    pub fn remaining(&self) -> Option<Duration> {
        self.time_until_expiration(self.store.get().as_deref())
    }
}
