//! Environment-backed server configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Everything the server reads from its environment at boot. The storage
/// backends themselves are wired up in `main`; the credential fields here
/// exist so a deployment can point them elsewhere without a rebuild.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: u8,

    pub db_user: String,
    pub db_pass: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,

    pub redis_host: String,
    pub redis_port: u16,

    pub geolocation_db_path: PathBuf,

    pub login_notification: Option<String>,
    pub maintenance_mode: bool,

    pub menu_icon_url: Option<String>,
    pub menu_onclick_url: Option<String>,

    pub general_anticheat_webhook: Option<String>,
    pub confidential_anticheat_webhook: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0:8080")
                .parse()
                .context("parsing BIND_ADDRESS")?,
            log_level: var_or("LOG_LEVEL", "2").parse().context("parsing LOG_LEVEL")?,
            db_user: var_or("DB_USER", "bancho"),
            db_pass: var_or("DB_PASS", ""),
            db_host: var_or("DB_HOST", "localhost"),
            db_port: var_or("DB_PORT", "3306").parse().context("parsing DB_PORT")?,
            db_name: var_or("DB_NAME", "bancho"),
            redis_host: var_or("REDIS_HOST", "localhost"),
            redis_port: var_or("REDIS_PORT", "6379")
                .parse()
                .context("parsing REDIS_PORT")?,
            geolocation_db_path: var_or("GEOLOCATION_DB_PATH", "GeoLite2-City.mmdb").into(),
            login_notification: var_opt("LOGIN_NOTIFICATION"),
            maintenance_mode: matches!(
                var_or("MAINTENANCE_MODE", "false").to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            ),
            menu_icon_url: var_opt("MAIN_MENU_ICON_URL"),
            menu_onclick_url: var_opt("MAIN_MENU_ON_CLICK_URL"),
            general_anticheat_webhook: var_opt("DISCORD_GENERAL_ANTICHEAT_WEBHOOK"),
            confidential_anticheat_webhook: var_opt("DISCORD_CONFIDENTIAL_ANTICHEAT_WEBHOOK"),
        })
    }

    /// Maps the numeric log level onto a tracing verbosity.
    pub fn tracing_level(&self) -> tracing::Level {
        match self.log_level {
            0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_level: 2,
            db_user: "bancho".into(),
            db_pass: String::new(),
            db_host: "localhost".into(),
            db_port: 3306,
            db_name: "bancho".into(),
            redis_host: "localhost".into(),
            redis_port: 6379,
            geolocation_db_path: "GeoLite2-City.mmdb".into(),
            login_notification: None,
            maintenance_mode: false,
            menu_icon_url: None,
            menu_onclick_url: None,
            general_anticheat_webhook: None,
            confidential_anticheat_webhook: None,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn var_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}
