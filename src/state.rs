//! The shared server state: one cheaply clonable handle over the backing
//! stores, the support services, and the live registries.

use std::sync::Arc;

use anyhow::Context;

use crate::audit::WebhookClient;
use crate::channel::{self, ChannelRegistry};
use crate::config::Config;
use crate::crypto::BcryptCache;
use crate::db::Database;
use crate::geo::GeoResolver;
use crate::kv::KeyValue;
use crate::lock::LockManager;
use crate::session::{self, NewSession, SessionRegistry};
use crate::stream::StreamRegistry;
use crate::users::BOT_USER_ID;

/// A handle on everything a request needs. Clones share one inner state.
#[derive(Clone)]
pub struct SharedState(Arc<SharedStateInner>);

struct SharedStateInner {
    config: Config,
    db: Arc<dyn Database>,
    kv: Arc<dyn KeyValue>,
    geo: Arc<dyn GeoResolver>,
    locks: LockManager,
    bcrypt: BcryptCache,
    webhooks: WebhookClient,
    sessions: SessionRegistry,
    streams: StreamRegistry,
    channels: ChannelRegistry,
}

impl SharedState {
    pub fn new(
        config: Config,
        db: Arc<dyn Database>,
        kv: Arc<dyn KeyValue>,
        geo: Arc<dyn GeoResolver>,
    ) -> Self {
        let locks = LockManager::new(Arc::clone(&kv));
        let bcrypt = BcryptCache::new(Arc::clone(&kv));
        let webhooks = WebhookClient::new(
            config.general_anticheat_webhook.clone(),
            config.confidential_anticheat_webhook.clone(),
        );

        Self(Arc::new(SharedStateInner {
            config,
            db,
            kv,
            geo,
            locks,
            bcrypt,
            webhooks,
            sessions: SessionRegistry::default(),
            streams: StreamRegistry::default(),
            channels: ChannelRegistry::default(),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.0.db
    }

    pub fn kv(&self) -> &Arc<dyn KeyValue> {
        &self.0.kv
    }

    pub fn geo(&self) -> &Arc<dyn GeoResolver> {
        &self.0.geo
    }

    pub fn locks(&self) -> &LockManager {
        &self.0.locks
    }

    pub fn bcrypt(&self) -> &BcryptCache {
        &self.0.bcrypt
    }

    pub fn webhooks(&self) -> &WebhookClient {
        &self.0.webhooks
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.0.sessions
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.0.streams
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.0.channels
    }

    /// Startup seeding: a live session for the bot, then the channel
    /// catalog. The bot account must exist persistently.
    pub async fn bootstrap(&self) -> anyhow::Result<()> {
        self.connect_bot().await?;
        channel::seed_from_catalog(self).await?;
        Ok(())
    }

    async fn connect_bot(&self) -> anyhow::Result<()> {
        if !self.sessions().fetch_by_user(BOT_USER_ID).is_empty() {
            return Ok(());
        }

        let bot = self
            .db()
            .fetch_user_by_id(BOT_USER_ID)
            .await?
            .context("bot user missing from the user store")?;

        session::create(
            self,
            NewSession {
                user_id: bot.id,
                username: bot.username,
                privileges: bot.privileges,
                whitelist: bot.whitelist,
                silence_end_time: bot.silence_end,
                ip: String::new(),
                utc_offset: 24,
                tournament: false,
                block_non_friends_dm: false,
            },
        )
        .await?;

        Ok(())
    }
}
