//! `xiaozhi:` configuration section

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/frpc_loader.sock";
pub const DEFAULT_CLIENT_NAME: &str = "Xiaozhi";

/// Longest token lifetime handed out (100 years)
pub const MAX_TOKEN_LIFESPAN_DAYS: u32 = 36_500;

/// Settings for the Xiaozhi bridge
///
/// Every key is optional:
///
/// ```yaml
/// xiaozhi:
///   socket_path: /tmp/frpc_loader.sock
///   debounce_secs: 1
///   token_renew_before_days: 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XiaozhiConfig {
    /// Unix socket of the local loader process
    pub socket_path: PathBuf,
    /// Quiet period before registry changes are uploaded
    pub debounce_secs: f64,
    /// Limit for one whole socket exchange
    pub request_timeout_secs: f64,
    pub token_check_interval_hours: u64,
    /// Lifetime of a newly created long-lived token
    pub token_lifespan_days: u32,
    /// Renew the token once it expires within this many days
    pub token_renew_before_days: u32,
    /// User the token is issued for; the owner when unset
    pub user_id: Option<String>,
    pub client_name: String,
    /// Overrides the detected MAC address used in the snapshot key
    pub mac: Option<String>,
}

impl Default for XiaozhiConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            debounce_secs: 1.0,
            request_timeout_secs: 10.0,
            token_check_interval_hours: 24,
            token_lifespan_days: 3650,
            token_renew_before_days: 30,
            user_id: None,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            mac: None,
        }
    }
}

impl XiaozhiConfig {
    pub fn debounce(&self) -> Duration {
        seconds("debounce_secs", self.debounce_secs, Duration::from_secs(1))
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(
            "request_timeout_secs",
            self.request_timeout_secs,
            Duration::from_secs(10),
        )
    }

    /// Period of the token check; never zero
    pub fn token_check_interval(&self) -> Duration {
        Duration::from_secs(self.token_check_interval_hours.max(1).saturating_mul(3600))
    }

    /// Lifetime of new tokens, capped at [`MAX_TOKEN_LIFESPAN_DAYS`]
    pub fn token_lifespan(&self) -> chrono::Duration {
        let days = if self.token_lifespan_days > MAX_TOKEN_LIFESPAN_DAYS {
            warn!(
                "token_lifespan_days {} too large, using {}",
                self.token_lifespan_days, MAX_TOKEN_LIFESPAN_DAYS
            );
            MAX_TOKEN_LIFESPAN_DAYS
        } else {
            self.token_lifespan_days
        };
        chrono::Duration::days(i64::from(days))
    }

    pub fn token_renew_before(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.token_renew_before_days))
    }
}

fn seconds(key: &str, value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| {
        warn!("Invalid {} {}, using {:?}", key, value, fallback);
        fallback
    })
}
