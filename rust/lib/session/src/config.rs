use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session lifecycle settings.
///
/// Usually embedded as the `[session]` table of the client config file;
/// every field has a default so an empty table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Mirror key holding the raw access token.
    pub token_key: String,

    /// Mirror key holding the serialized identity.
    pub identity_key: String,

    /// Upper bound for any single call to the auth provider or profile table.
    pub request_timeout_ms: u64,

    /// Delay between hiding the banner and clearing its text.
    pub notification_clear_ms: u64,

    /// How long an explicit logout keeps suppressing the expiry banner
    /// while waiting for the provider's SIGNED_OUT event.
    pub manual_logout_grace_ms: u64,

    /// Where the session guard sends anonymous visitors.
    pub login_route: String,

    /// Where the role guard sends signed-in users lacking the role.
    pub home_route: String,

    /// Locale for user-facing copy (`es` or `en`).
    pub locale: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_key: "token".to_string(),
            identity_key: "user".to_string(),
            request_timeout_ms: 10_000,
            notification_clear_ms: 300,
            manual_logout_grace_ms: 10_000,
            login_route: "/login".to_string(),
            home_route: "/".to_string(),
            locale: "es".to_string(),
        }
    }
}

impl SessionConfig {
    /// Apply command-line overrides on top of `self`.
    ///
    /// Supported flags:
    /// - `--timeout-ms=N`
    /// - `--locale=es|en`
    /// - `--token-key=KEY`
    /// - `--identity-key=KEY`
    ///
    /// Unknown flags and unparsable numbers are ignored.
    pub fn with_args(mut self, args: &[String]) -> Self {
        for arg in args {
            if let Some(val) = arg.strip_prefix("--timeout-ms=") {
                if let Ok(ms) = val.parse() {
                    self.request_timeout_ms = ms;
                }
            } else if let Some(val) = arg.strip_prefix("--locale=") {
                self.locale = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--token-key=") {
                self.token_key = val.to_string();
            } else if let Some(val) = arg.strip_prefix("--identity-key=") {
                self.identity_key = val.to_string();
            }
        }
        self
    }

    /// Parse configuration from command-line arguments over the defaults.
    pub fn from_args(args: &[String]) -> Self {
        Self::default().with_args(args)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn notification_clear_delay(&self) -> Duration {
        Duration::from_millis(self.notification_clear_ms)
    }

    pub fn manual_logout_grace(&self) -> Duration {
        Duration::from_millis(self.manual_logout_grace_ms)
    }
}
