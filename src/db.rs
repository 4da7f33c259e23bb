//! The relational store interface. Only the operations the login/presence
//! core actually performs are exposed; the in-memory implementation backs
//! tests and single-node deployments.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::stats::{Gameplay, Mode, Stats};
use crate::users::User;

/// Badge ids granted alongside a supporter/premium tag.
const SUPPORTER_BADGES: [i32; 2] = [36, 59];

#[async_trait]
pub trait Database: Send + Sync {
    async fn fetch_user_by_id(&self, id: i32) -> anyhow::Result<Option<User>>;

    async fn fetch_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    /// Applies a partial update and returns the row as it now stands.
    async fn update_user(&self, id: i32, update: UserUpdate) -> anyhow::Result<User>;

    /// Counts one more sighting of `ip` for this user.
    async fn log_ip(&self, user_id: i32, ip: &str) -> anyhow::Result<()>;

    /// The user's website country acronym.
    async fn fetch_country(&self, user_id: i32) -> anyhow::Result<String>;

    /// Ids of the users this user has friended.
    async fn fetch_friends(&self, user_id: i32) -> anyhow::Result<Vec<i32>>;

    /// The user's stat row for one mode and gameplay variant.
    async fn fetch_stats(
        &self,
        user_id: i32,
        mode: Mode,
        gameplay: Gameplay,
    ) -> anyhow::Result<Option<Stats>>;

    /// Removes the supporter and premium badges.
    async fn delete_supporter_badges(&self, user_id: i32) -> anyhow::Result<()>;

    /// Revokes the ability to set and show a custom badge.
    async fn clear_custom_badge_flags(&self, user_id: i32) -> anyhow::Result<()>;

    async fn insert_rap_log(&self, user_id: i32, message: &str, author: &str)
        -> anyhow::Result<()>;

    /// The persisted channel catalog applied at startup.
    async fn fetch_seed_channels(&self) -> anyhow::Result<Vec<SeedChannel>>;
}

/// A typed partial update for a user row; unset fields are left untouched.
#[derive(Clone, Default, Debug)]
pub struct UserUpdate {
    privileges: Option<crate::users::Privileges>,
    frozen: Option<i64>,
    freeze_reason: Option<Option<String>>,
    notes: Option<String>,
}

impl UserUpdate {
    pub fn privileges(mut self, privileges: crate::users::Privileges) -> Self {
        self.privileges = Some(privileges);
        self
    }

    pub fn frozen(mut self, frozen: i64) -> Self {
        self.frozen = Some(frozen);
        self
    }

    pub fn freeze_reason(mut self, freeze_reason: Option<String>) -> Self {
        self.freeze_reason = Some(freeze_reason);
        self
    }

    pub fn notes(mut self, notes: String) -> Self {
        self.notes = Some(notes);
        self
    }

    fn apply(self, user: &mut User) {
        if let Some(privileges) = self.privileges {
            user.privileges = privileges;
        }
        if let Some(frozen) = self.frozen {
            user.frozen = frozen;
        }
        if let Some(freeze_reason) = self.freeze_reason {
            user.freeze_reason = freeze_reason;
        }
        if let Some(notes) = self.notes {
            user.notes = Some(notes);
        }
    }
}

/// A row of the persisted channel catalog.
#[derive(Clone, Debug)]
pub struct SeedChannel {
    pub name: String,
    pub description: String,
    pub public_read: bool,
    pub public_write: bool,
    pub instance: bool,
}

/// A line in the admin audit log.
#[derive(Clone, Debug)]
pub struct RapLog {
    pub user_id: i32,
    pub message: String,
    pub author: String,
}

#[derive(Default)]
struct DbState {
    users: FxHashMap<i32, User>,
    countries: FxHashMap<i32, String>,
    friends: FxHashMap<i32, Vec<i32>>,
    stats: FxHashMap<(i32, Mode, Gameplay), Stats>,
    badges: FxHashMap<i32, Vec<i32>>,
    custom_badge_flags: FxHashMap<i32, (bool, bool)>,
    ip_log: FxHashMap<(i32, String), u32>,
    rap_logs: Vec<RapLog>,
    seed_channels: Vec<SeedChannel>,
}

/// In-process [`Database`].
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<DbState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().users.insert(user.id, user);
    }

    pub fn set_country(&self, user_id: i32, country: &str) {
        self.state.lock().countries.insert(user_id, country.to_owned());
    }

    pub fn set_friends(&self, user_id: i32, friends: Vec<i32>) {
        self.state.lock().friends.insert(user_id, friends);
    }

    pub fn set_stats(&self, user_id: i32, mode: Mode, gameplay: Gameplay, stats: Stats) {
        self.state.lock().stats.insert((user_id, mode, gameplay), stats);
    }

    pub fn add_badge(&self, user_id: i32, badge: i32) {
        self.state.lock().badges.entry(user_id).or_default().push(badge);
    }

    pub fn set_custom_badge_flags(&self, user_id: i32, can: bool, show: bool) {
        self.state.lock().custom_badge_flags.insert(user_id, (can, show));
    }

    pub fn add_seed_channel(&self, channel: SeedChannel) {
        self.state.lock().seed_channels.push(channel);
    }

    pub fn user(&self, id: i32) -> Option<User> {
        self.state.lock().users.get(&id).cloned()
    }

    pub fn ip_occurrences(&self, user_id: i32, ip: &str) -> u32 {
        self.state
            .lock()
            .ip_log
            .get(&(user_id, ip.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    pub fn rap_logs(&self) -> Vec<RapLog> {
        self.state.lock().rap_logs.clone()
    }

    pub fn badges(&self, user_id: i32) -> Vec<i32> {
        self.state.lock().badges.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn custom_badge_flags(&self, user_id: i32) -> (bool, bool) {
        self.state
            .lock()
            .custom_badge_flags
            .get(&user_id)
            .copied()
            .unwrap_or((false, false))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn fetch_user_by_id(&self, id: i32) -> anyhow::Result<Option<User>> {
        Ok(self.state.lock().users.get(&id).cloned())
    }

    async fn fetch_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn update_user(&self, id: i32, update: UserUpdate) -> anyhow::Result<User> {
        let mut state = self.state.lock();
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("no user with id {id}"))?;

        update.apply(user);
        Ok(user.clone())
    }

    async fn log_ip(&self, user_id: i32, ip: &str) -> anyhow::Result<()> {
        *self
            .state
            .lock()
            .ip_log
            .entry((user_id, ip.to_owned()))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn fetch_country(&self, user_id: i32) -> anyhow::Result<String> {
        Ok(self
            .state
            .lock()
            .countries
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| "XX".to_owned()))
    }

    async fn fetch_friends(&self, user_id: i32) -> anyhow::Result<Vec<i32>> {
        Ok(self.state.lock().friends.get(&user_id).cloned().unwrap_or_default())
    }

    async fn fetch_stats(
        &self,
        user_id: i32,
        mode: Mode,
        gameplay: Gameplay,
    ) -> anyhow::Result<Option<Stats>> {
        let state = self.state.lock();

        if !state.users.contains_key(&user_id) {
            return Ok(None);
        }

        // Every account has a stats row per mode; absent seed data reads as
        // a fresh row.
        Ok(Some(
            state
                .stats
                .get(&(user_id, mode, gameplay))
                .copied()
                .unwrap_or_default(),
        ))
    }

    async fn delete_supporter_badges(&self, user_id: i32) -> anyhow::Result<()> {
        if let Some(badges) = self.state.lock().badges.get_mut(&user_id) {
            badges.retain(|badge| !SUPPORTER_BADGES.contains(badge));
        }
        Ok(())
    }

    async fn clear_custom_badge_flags(&self, user_id: i32) -> anyhow::Result<()> {
        self.state
            .lock()
            .custom_badge_flags
            .insert(user_id, (false, false));
        Ok(())
    }

    async fn insert_rap_log(
        &self,
        user_id: i32,
        message: &str,
        author: &str,
    ) -> anyhow::Result<()> {
        self.state.lock().rap_logs.push(RapLog {
            user_id,
            message: message.to_owned(),
            author: author.to_owned(),
        });
        Ok(())
    }

    async fn fetch_seed_channels(&self) -> anyhow::Result<Vec<SeedChannel>> {
        Ok(self.state.lock().seed_channels.clone())
    }
}
