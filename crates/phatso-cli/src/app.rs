//! Application state for the phatso-admin command line.
//!
//! `App` builds one `Session` from the local config and hands it to the API
//! client and to any guard it starts, so every command sees the same
//! credential slot.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use phatso_core::auth::CredentialError;
use phatso_core::models::LoginRequest;
use phatso_core::utils::{format_expiry, format_remaining};
use phatso_core::{
    ApiClient, AppConfig, GuardState, Session, SessionGuard, StoreKind, WebConfig,
};

/// Maximum length for username input.
const MAX_USERNAME_LENGTH: usize = 100;

const ENV_WEB_CONFIG: &str = "PHATSO_WEB_CONFIG";
const ENV_BASE_URL: &str = "PHATSO_API_BASE_URL";
const ENV_CREDENTIAL_STORE: &str = "PHATSO_CREDENTIAL_STORE";

pub struct App {
    config: AppConfig,
    session: Session,
    api: ApiClient,
}

impl App {
    pub fn new() -> Result<Self> {
        let mut config = AppConfig::load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        });

        if let Ok(kind) = std::env::var(ENV_CREDENTIAL_STORE) {
            config.credential_store = kind.parse::<StoreKind>()?;
        }
        if let Ok(path) = std::env::var(ENV_WEB_CONFIG) {
            config.web_config_path = Some(PathBuf::from(path));
        }

        let mut web = WebConfig::load_or_default(&config.web_config_path()?);
        if let Ok(base_url) = std::env::var(ENV_BASE_URL) {
            web = web.with_base_url(base_url);
        }
        info!(app = %web.app.name, version = %web.app.version, base_url = %web.base_url(), "Configuration ready");

        let session = Session::new(config.open_credential_store()?);
        let api = ApiClient::new(&web, session.clone())?;
        debug!(store = ?config.credential_store, "Session created");

        Ok(Self {
            config,
            session,
            api,
        })
    }

    /// Prompt for credentials and log in. Does nothing if the stored
    /// credential is still valid, unless `force` is set.
    pub async fn login(&mut self, username: Option<String>, force: bool) -> Result<()> {
        if self.session.is_authenticated() && !force {
            println!("Already logged in.");
            return self.status();
        }

        let username = match username {
            Some(name) => name,
            None => self.prompt_username()?,
        };
        if username.is_empty() || username.len() > MAX_USERNAME_LENGTH {
            return Err(anyhow::anyhow!("Username must be 1-{} characters", MAX_USERNAME_LENGTH));
        }

        let password = rpassword::prompt_password("Password: ")?;
        if password.is_empty() {
            return Err(anyhow::anyhow!("Username and password required"));
        }

        println!("Authenticating...");
        let response = self.api.login(&LoginRequest::new(&username, password)).await?;
        if response.token().is_none() {
            return Err(anyhow::anyhow!("Server did not issue a token"));
        }

        self.config.last_username = Some(username);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        println!("Login successful!");
        self.status()
    }

    fn prompt_username(&self) -> Result<String> {
        match self.config.last_username {
            Some(ref last) => print!("Username [{}]: ", last),
            None => print!("Username: "),
        }
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim();

        match (input.is_empty(), &self.config.last_username) {
            (true, Some(last)) => Ok(last.clone()),
            _ => Ok(input.to_string()),
        }
    }

    pub fn logout(&self) -> Result<()> {
        self.api.logout()?;
        println!("Logged out.");
        Ok(())
    }

    pub fn status(&self) -> Result<()> {
        println!("API:           {}", self.api.base_url());

        match self.session.claims() {
            Ok(claims) => {
                let authenticated = self.session.is_authenticated();
                println!("Authenticated: {}", if authenticated { "yes" } else { "no" });
                if let Some(ref sub) = claims.sub {
                    println!("Subject:       {}", sub);
                }
                println!("Expires:       {}", format_expiry(claims.expires_at_millis()));
                if let Some(remaining) = self.session.remaining() {
                    println!("Remaining:     {}", format_remaining(remaining));
                }
            }
            Err(CredentialError::Missing) => println!("Authenticated: no (not logged in)"),
            Err(CredentialError::Decode(e)) => {
                println!("Authenticated: no (stored credential unreadable: {})", e)
            }
        }
        Ok(())
    }

    pub async fn validate(&self) -> Result<()> {
        let body = self.api.validate().await.context("Validation failed")?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }

    pub async fn info(&self) -> Result<()> {
        let body = self.api.info().await?;
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    }

    /// Hold a guarded session open until it becomes invalid or the user
    /// presses Ctrl-C. Returns false if the session ended invalid.
    pub async fn watch(&self) -> Result<bool> {
        let expired = Arc::new(Notify::new());
        let signal = Arc::clone(&expired);
        let guard = SessionGuard::new(self.session.clone());
        let handle = guard.start(move || signal.notify_one());

        if handle.state() == GuardState::Invalid {
            println!("Not logged in. Run `phatso-admin login` first.");
            return Ok(false);
        }

        self.status()?;
        println!("Watching session (Ctrl-C to stop)...");

        tokio::select! {
            _ = expired.notified() => {
                drop(handle);
                warn!("Session expired while watching");
                if let Err(e) = self.session.sign_out() {
                    warn!(error = %e, "Failed to clear expired credential");
                }
                println!("Session expired. Please log in again.");
                Ok(false)
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                drop(handle);
                println!("Stopped.");
                Ok(true)
            }
        }
    }
}
