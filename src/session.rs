//! The live session table: per-login tokens, their mutable presence state,
//! and the per-token outbound packet queues.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Context;
use bancho_protocol::frame;
use bancho_protocol::packets::{NotificationS2c, SendMessageS2c};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::state::SharedState;
use crate::stats::{self, Gameplay, Mode};
use crate::stream::MAIN_STREAM;
use crate::unix_now;
use crate::users::{Privileges, BOT_USER_ID};

/// What the player is currently doing, as reported by the client.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Action(pub u8);

impl Action {
    pub const IDLE: Action = Action(0);
}

/// A live session. Created on login, destroyed on logout or eviction; the
/// `token_id` is the session's identity on the wire.
#[derive(Clone, Debug)]
pub struct Token {
    pub token_id: Uuid,
    pub user_id: i32,
    pub username: String,
    /// Snapshot of the user's privileges at login, updated when login-time
    /// transitions (restriction, donor revocation) change them.
    pub privileges: Privileges,
    pub whitelist: i32,
    pub login_time: i64,
    pub ping_time: i64,
    pub utc_offset: i32,
    pub tournament: bool,
    pub block_non_friends_dm: bool,
    pub spectating_token_id: Option<Uuid>,
    pub spectating_user_id: Option<i32>,
    pub latitude: f32,
    pub longitude: f32,
    pub ip: String,
    pub country: u8,
    pub away_message: Option<String>,
    pub match_id: Option<i32>,
    pub last_np_beatmap_id: Option<i32>,
    pub last_np_mods: Option<i32>,
    pub last_np_accuracy: Option<f32>,
    pub silence_end_time: i64,
    pub protocol_version: i32,
    pub spam_rate: i32,
    pub action: Action,
    pub action_text: String,
    pub action_md5: String,
    pub action_beatmap_id: i32,
    pub action_mods: i32,
    pub mode: Mode,
    pub relax: bool,
    pub autopilot: bool,
    pub ranked_score: i64,
    pub accuracy: f32,
    pub playcount: i32,
    pub total_score: i64,
    pub global_rank: i32,
    pub pp: i32,
}

/// A typed partial update for a session; unset fields are left untouched.
#[derive(Clone, Default, Debug)]
pub struct TokenUpdate {
    privileges: Option<Privileges>,
    country: Option<u8>,
    latitude: Option<f32>,
    longitude: Option<f32>,
    ranked_score: Option<i64>,
    accuracy: Option<f32>,
    playcount: Option<i32>,
    total_score: Option<i64>,
    global_rank: Option<i32>,
    pp: Option<i32>,
}

impl TokenUpdate {
    pub fn privileges(mut self, privileges: Privileges) -> Self {
        self.privileges = Some(privileges);
        self
    }

    pub fn country(mut self, country: u8) -> Self {
        self.country = Some(country);
        self
    }

    pub fn location(mut self, latitude: f32, longitude: f32) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn stats(
        mut self,
        ranked_score: i64,
        accuracy: f32,
        playcount: i32,
        total_score: i64,
        global_rank: i32,
        pp: i32,
    ) -> Self {
        self.ranked_score = Some(ranked_score);
        self.accuracy = Some(accuracy);
        self.playcount = Some(playcount);
        self.total_score = Some(total_score);
        self.global_rank = Some(global_rank);
        self.pp = Some(pp);
        self
    }

    fn apply(self, token: &mut Token) {
        if let Some(privileges) = self.privileges {
            token.privileges = privileges;
        }
        if let Some(country) = self.country {
            token.country = country;
        }
        if let Some(latitude) = self.latitude {
            token.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            token.longitude = longitude;
        }
        if let Some(ranked_score) = self.ranked_score {
            token.ranked_score = ranked_score;
        }
        if let Some(accuracy) = self.accuracy {
            token.accuracy = accuracy;
        }
        if let Some(playcount) = self.playcount {
            token.playcount = playcount;
        }
        if let Some(total_score) = self.total_score {
            token.total_score = total_score;
        }
        if let Some(global_rank) = self.global_rank {
            token.global_rank = global_rank;
        }
        if let Some(pp) = self.pp {
            token.pp = pp;
        }
    }
}

/// One live session: the token state plus its outbound queue. The queue
/// mutex also serializes broadcast enqueues against drains.
pub struct Session {
    data: RwLock<Token>,
    queue: Mutex<VecDeque<Bytes>>,
}

impl Session {
    fn new(token: Token) -> Self {
        Self {
            data: RwLock::new(token),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// A point-in-time copy of the session state.
    pub fn snapshot(&self) -> Token {
        self.data.read().clone()
    }

    /// Appends one packet blob to the outbound queue.
    pub fn enqueue(&self, payload: Bytes) {
        self.queue.lock().push_back(payload);
    }

    /// Drains the queue: returns the concatenation of everything queued so
    /// far and leaves the queue empty, in one atomic step.
    pub fn dequeue_all(&self) -> Bytes {
        let mut queue = self.queue.lock();

        match queue.len() {
            0 => Bytes::new(),
            1 => queue.pop_front().unwrap_or_default(),
            _ => {
                let total: usize = queue.iter().map(Bytes::len).sum();
                let mut buf = BytesMut::with_capacity(total);
                for blob in queue.drain(..) {
                    buf.extend_from_slice(&blob);
                }
                buf.freeze()
            }
        }
    }
}

/// The authoritative table of live sessions, indexed by token id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<Uuid, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn insert(&self, token: Token) -> Arc<Session> {
        let token_id = token.token_id;
        let session = Arc::new(Session::new(token));
        self.sessions.write().insert(token_id, Arc::clone(&session));
        session
    }

    pub fn get(&self, token_id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(token_id).cloned()
    }

    pub fn fetch(&self, token_id: &Uuid) -> Option<Token> {
        self.get(token_id).map(|session| session.snapshot())
    }

    pub fn fetch_by_user(&self, user_id: i32) -> Vec<Token> {
        self.sessions
            .read()
            .values()
            .map(|session| session.snapshot())
            .filter(|token| token.user_id == user_id)
            .collect()
    }

    pub fn fetch_by_username(&self, username: &str) -> Option<Token> {
        self.sessions
            .read()
            .values()
            .map(|session| session.snapshot())
            .find(|token| token.username == username)
    }

    pub fn fetch_all(&self) -> Vec<Token> {
        self.sessions
            .read()
            .values()
            .map(|session| session.snapshot())
            .collect()
    }

    pub fn remove(&self, token_id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.write().remove(token_id)
    }

    /// Applies a partial update; returns the new state, or `None` for an
    /// unknown session.
    pub fn update(&self, token_id: &Uuid, update: TokenUpdate) -> Option<Token> {
        let session = self.get(token_id)?;
        let mut token = session.data.write();
        update.apply(&mut token);
        Some(token.clone())
    }

    /// Enqueues a blob for a session; `false` for an unknown session.
    pub fn enqueue(&self, token_id: &Uuid, payload: Bytes) -> bool {
        match self.get(token_id) {
            Some(session) => {
                session.enqueue(payload);
                true
            }
            None => false,
        }
    }

    /// Atomically drains a session's queue; `None` for an unknown session.
    pub fn dequeue(&self, token_id: &Uuid) -> Option<Bytes> {
        self.get(token_id).map(|session| session.dequeue_all())
    }
}

/// What a login brings to session creation; everything else starts at its
/// default and is enriched afterwards.
#[derive(Clone, Debug)]
pub struct NewSession {
    pub user_id: i32,
    pub username: String,
    pub privileges: Privileges,
    pub whitelist: i32,
    pub silence_end_time: i64,
    pub ip: String,
    pub utc_offset: i32,
    pub tournament: bool,
    pub block_non_friends_dm: bool,
}

/// Creates a session: inserts the token with default presence state,
/// refreshes the cached stat snapshot, and subscribes it to the presence
/// stream.
pub async fn create(state: &SharedState, args: NewSession) -> anyhow::Result<Token> {
    let now = unix_now();

    let token = Token {
        token_id: Uuid::new_v4(),
        user_id: args.user_id,
        username: args.username,
        privileges: args.privileges,
        whitelist: args.whitelist,
        login_time: now,
        ping_time: now,
        utc_offset: args.utc_offset,
        tournament: args.tournament,
        block_non_friends_dm: args.block_non_friends_dm,
        spectating_token_id: None,
        spectating_user_id: None,
        latitude: 0.0,
        longitude: 0.0,
        ip: args.ip,
        country: 0,
        away_message: None,
        match_id: None,
        last_np_beatmap_id: None,
        last_np_mods: None,
        last_np_accuracy: None,
        silence_end_time: args.silence_end_time,
        protocol_version: 0,
        spam_rate: 0,
        action: Action::IDLE,
        action_text: String::new(),
        action_md5: String::new(),
        action_beatmap_id: 0,
        action_mods: 0,
        mode: Mode::Std,
        relax: false,
        autopilot: false,
        ranked_score: 0,
        accuracy: 0.0,
        playcount: 0,
        total_score: 0,
        global_rank: 0,
        pp: 0,
    };

    let token_id = token.token_id;
    state.sessions().insert(token);

    let token = refresh_cached_stats(state, &token_id).await?;

    state.streams().ensure(MAIN_STREAM);
    state.streams().add(MAIN_STREAM, token_id);

    Ok(token)
}

/// Re-reads the session's stat snapshot from the stats source for its
/// current mode and gameplay variant.
pub async fn refresh_cached_stats(state: &SharedState, token_id: &Uuid) -> anyhow::Result<Token> {
    let token = state
        .sessions()
        .fetch(token_id)
        .context("unknown session")?;

    let gameplay = Gameplay::from_flags(token.relax, token.autopilot);

    let stats = state
        .db()
        .fetch_stats(token.user_id, token.mode, gameplay)
        .await?
        .with_context(|| format!("no stats row for user {}", token.user_id))?;

    let global_rank = stats::global_rank(state.kv(), token.user_id, token.mode, gameplay).await?;

    state
        .sessions()
        .update(
            token_id,
            TokenUpdate::default().stats(
                stats.ranked_score,
                stats.accuracy / 100.0,
                stats.playcount,
                stats.total_score,
                global_rank,
                stats.pp,
            ),
        )
        .context("session vanished during stats refresh")
}

/// Seconds of silence left on a session, never negative.
pub fn remaining_silence_seconds(silence_end_time: i64) -> i64 {
    (silence_end_time - unix_now()).max(0)
}

/// Frames a notification packet into a session's queue.
pub fn enqueue_notification(
    state: &SharedState,
    token_id: &Uuid,
    message: &str,
) -> anyhow::Result<()> {
    let packet = frame(&NotificationS2c {
        message: message.to_owned(),
    })?;

    state.sessions().enqueue(token_id, packet);
    Ok(())
}

/// Frames a chat message from one live session into another's queue. A
/// missing sender drops the message silently; a missing recipient is an
/// error.
pub fn enqueue_message(
    state: &SharedState,
    token_id: &Uuid,
    message: &str,
    sender_token_id: &Uuid,
) -> anyhow::Result<()> {
    let recipient = state
        .sessions()
        .fetch(token_id)
        .context("unknown recipient session")?;

    let Some(sender) = state.sessions().fetch(sender_token_id) else {
        return Ok(());
    };

    let packet = frame(&SendMessageS2c {
        sender: sender.username,
        message: message.to_owned(),
        recipient: recipient.username,
        sender_id: sender.user_id,
    })?;

    state.sessions().enqueue(token_id, packet);
    Ok(())
}

/// Frames a chat message from the bot into a session's queue.
pub fn enqueue_bot_message(
    state: &SharedState,
    token_id: &Uuid,
    message: &str,
) -> anyhow::Result<()> {
    let bot = state
        .sessions()
        .fetch_by_user(BOT_USER_ID)
        .into_iter()
        .next()
        .context("bot session missing")?;

    enqueue_message(state, token_id, message, &bot.token_id)
}

const RESTRICTED_MSG: &str = "Your account is currently in restricted mode. \
    Please visit Akatsuki's website for more information.";
const UNRESTRICTED_MSG: &str = "Your account has been unrestricted! Please log in again.";

/// Tells a fresh session about its restriction state when either the stored
/// user or the login-time snapshot is restricted. The message follows the
/// stored user's current state.
pub async fn check_restricted(state: &SharedState, token: &Token) -> anyhow::Result<()> {
    let was_restricted = token.privileges.is_restricted();

    let user = state
        .db()
        .fetch_user_by_id(token.user_id)
        .await?
        .context("user missing for live session")?;

    let restricted = user.privileges.is_restricted();

    if !restricted && !was_restricted {
        return Ok(());
    }

    let message = if restricted {
        RESTRICTED_MSG
    } else {
        UNRESTRICTED_MSG
    };

    enqueue_bot_message(state, &token.token_id, message)
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// Builds a plain unrestricted token for registry-level tests.
    pub(crate) fn make_token(user_id: i32, username: &str) -> Token {
        Token {
            token_id: Uuid::new_v4(),
            user_id,
            username: username.to_owned(),
            privileges: Privileges::USER_PUBLIC | Privileges::USER_NORMAL,
            whitelist: 0,
            login_time: 0,
            ping_time: 0,
            utc_offset: 0,
            tournament: false,
            block_non_friends_dm: false,
            spectating_token_id: None,
            spectating_user_id: None,
            latitude: 0.0,
            longitude: 0.0,
            ip: String::new(),
            country: 0,
            away_message: None,
            match_id: None,
            last_np_beatmap_id: None,
            last_np_mods: None,
            last_np_accuracy: None,
            silence_end_time: 0,
            protocol_version: 0,
            spam_rate: 0,
            action: Action::IDLE,
            action_text: String::new(),
            action_md5: String::new(),
            action_beatmap_id: 0,
            action_mods: 0,
            mode: Mode::Std,
            relax: false,
            autopilot: false,
            ranked_score: 0,
            accuracy: 0.0,
            playcount: 0,
            total_score: 0,
            global_rank: 0,
            pp: 0,
        }
    }

    /// Inserts a fresh session and returns its token id.
    pub(crate) fn insert_session(
        registry: &SessionRegistry,
        user_id: i32,
        username: &str,
    ) -> Uuid {
        let token = make_token(user_id, username);
        let token_id = token.token_id;
        registry.insert(token);
        token_id
    }
}
