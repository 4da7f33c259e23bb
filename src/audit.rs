//! Admin audit logging and best-effort anticheat webhooks.

use serde_json::json;
use tracing::{debug, warn};

use crate::db::Database;

const MAX_WEBHOOK_ATTEMPTS: usize = 5;

/// Which anticheat feed a report goes to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AnticheatChannel {
    General,
    Confidential,
}

/// Posts Discord-style embeds to the configured anticheat webhooks.
/// Delivery is best-effort: a few retries, then the report is dropped.
#[derive(Clone)]
pub struct WebhookClient {
    http: reqwest::Client,
    general_url: Option<String>,
    confidential_url: Option<String>,
}

impl WebhookClient {
    pub fn new(general_url: Option<String>, confidential_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            general_url,
            confidential_url,
        }
    }

    pub async fn anticheat(&self, message: &str, channel: AnticheatChannel) {
        warn!("anticheat: {message}");

        let url = match channel {
            AnticheatChannel::General => self.general_url.as_ref(),
            AnticheatChannel::Confidential => self.confidential_url.as_ref(),
        };

        let Some(url) = url else {
            return;
        };

        let payload = json!({
            "embeds": [{
                "color": 0x542cb8,
                "fields": [{ "name": "** **", "value": message }],
                "footer": { "text": "Akatsuki Anticheat" },
                "thumbnail": { "url": "https://akatsuki.pw/static/logos/logo.png" },
            }],
        });

        for attempt in 1..=MAX_WEBHOOK_ATTEMPTS {
            match self.http.post(url).json(&payload).send().await {
                Ok(_) => return,
                Err(e) => debug!(attempt, "anticheat webhook delivery failed: {e}"),
            }
        }
    }
}

/// Writes a line to the admin audit log, attributed to the chat bot.
pub async fn rap(db: &dyn Database, user_id: i32, message: &str) -> anyhow::Result<()> {
    db.insert_rap_log(user_id, message, "Aika").await
}
