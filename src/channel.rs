//! Chat channels: a metadata overlay on streams. A channel named `X` is
//! backed by the stream `chat/X`; membership *is* subscription to that
//! stream.

use anyhow::Context;
use bancho_protocol::frame;
use bancho_protocol::packets::{ChannelJoinSuccessS2c, ChannelKickS2c};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::info;
use uuid::Uuid;

use crate::session::Token;
use crate::state::SharedState;
use crate::users::{Privileges, BOT_USER_ID};

/// A chat room. `instance` channels belong to a transient session
/// (spectator, multiplayer) and disappear with their last subscriber.
#[derive(Clone, Debug)]
pub struct Channel {
    pub name: String,
    pub description: String,
    pub public_read: bool,
    pub public_write: bool,
    pub moderated: bool,
    pub instance: bool,
}

#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<FxHashMap<String, Channel>>,
}

impl ChannelRegistry {
    pub fn fetch(&self, name: &str) -> Option<Channel> {
        self.channels.read().get(name).cloned()
    }

    /// All channels, ordered by name so listings are stable.
    pub fn fetch_all(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.channels.read().values().cloned().collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }

    pub fn contains(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    fn insert(&self, channel: Channel) {
        self.channels.write().insert(channel.name.clone(), channel);
    }

    fn remove(&self, name: &str) {
        self.channels.write().remove(name);
    }
}

/// The stream a channel fans out through.
pub fn backing_stream(channel_name: &str) -> String {
    format!("chat/{channel_name}")
}

/// The name a client sees for a channel: session-scoped channels are
/// aliased back to `#spectator`/`#multiplayer`.
pub fn client_channel_name(channel_name: &str) -> &str {
    if channel_name.starts_with("#spect_") {
        "#spectator"
    } else if channel_name.starts_with("#multi_") {
        "#multiplayer"
    } else {
        channel_name
    }
}

/// Resolves the client-facing aliases onto the session-specific channel the
/// token actually belongs to. `None` when the alias cannot be resolved
/// (e.g. `#multiplayer` outside a match).
fn resolve_channel_name(token: &Token, channel_name: &str) -> Option<String> {
    match channel_name {
        "#spectator" => {
            let host_id = token.spectating_user_id.unwrap_or(token.user_id);
            Some(format!("#spect_{host_id}"))
        }
        "#multiplayer" => token.match_id.map(|match_id| format!("#multi_{match_id}")),
        _ => Some(channel_name.to_owned()),
    }
}

/// Creates a channel: backing stream first, then the metadata row, then the
/// bot joins as its permanent subscriber.
pub fn create(state: &SharedState, channel: Channel) -> anyhow::Result<Channel> {
    state.streams().ensure(&backing_stream(&channel.name));
    state.channels().insert(channel.clone());

    let bot = state
        .sessions()
        .fetch_by_user(BOT_USER_ID)
        .into_iter()
        .next()
        .context("bot session missing")?;

    join_channel(state, &bot.token_id, &channel.name)?;

    info!(channel = %channel.name, "created channel");
    Ok(channel)
}

/// Deletes a channel: every subscriber is kicked (with a channel_kick
/// packet), then the backing stream and the metadata row go away.
pub fn delete(state: &SharedState, channel_name: &str) -> anyhow::Result<()> {
    let stream = backing_stream(channel_name);

    for token_id in state.streams().subscribers(&stream) {
        state.streams().remove(&stream, &token_id);

        let packet = frame(&ChannelKickS2c {
            channel: client_channel_name(channel_name).to_owned(),
        })?;
        state.sessions().enqueue(&token_id, packet);
    }

    state.streams().delete(&stream);
    state.channels().remove(channel_name);

    info!(channel = %channel_name, "removed channel");
    Ok(())
}

/// The membership policy gate. Non-`#` names are DM targets and no-ops.
/// The channel must exist; joining twice is a no-op; visibility rules
/// (premium, supporter, staff-only) apply to everyone but the bot. On
/// success the token subscribes to the backing stream and receives a
/// join-success packet carrying the client-facing name.
pub fn join_channel(
    state: &SharedState,
    token_id: &Uuid,
    channel_name: &str,
) -> anyhow::Result<()> {
    if !channel_name.starts_with('#') {
        return Ok(());
    }

    let token = state
        .sessions()
        .fetch(token_id)
        .context("unknown session")?;

    let Some(channel_name) = resolve_channel_name(&token, channel_name) else {
        return Ok(());
    };

    let channel = state
        .channels()
        .fetch(&channel_name)
        .with_context(|| format!("channel {channel_name} does not exist"))?;

    let stream = backing_stream(&channel_name);

    if state.streams().contains(&stream, token_id) {
        return Ok(());
    }

    let denied = (channel_name == "#premium"
        && !token.privileges.intersects(Privileges::USER_PREMIUM))
        || (channel_name == "#supporter"
            && !token.privileges.intersects(Privileges::USER_DONOR))
        || (!channel.public_read && !token.privileges.is_staff());

    if denied && token.user_id != BOT_USER_ID {
        return Ok(());
    }

    state.streams().add(&stream, *token_id);

    let packet = frame(&ChannelJoinSuccessS2c {
        channel: client_channel_name(&channel_name).to_owned(),
    })?;
    state.sessions().enqueue(token_id, packet);

    Ok(())
}

/// The inverse of [`join_channel`]: resolves aliases, drops the stream
/// subscription, optionally sends a kick packet, and deletes an `instance`
/// channel that just lost its last subscriber.
pub fn leave_channel(
    state: &SharedState,
    token_id: &Uuid,
    channel_name: &str,
    kick: bool,
) -> anyhow::Result<()> {
    if !channel_name.starts_with('#') {
        return Ok(());
    }

    let token = state
        .sessions()
        .fetch(token_id)
        .context("unknown session")?;

    let Some(channel_name) = resolve_channel_name(&token, channel_name) else {
        return Ok(());
    };

    let channel = state
        .channels()
        .fetch(&channel_name)
        .with_context(|| format!("channel {channel_name} does not exist"))?;

    let stream = backing_stream(&channel_name);

    if !state.streams().contains(&stream, token_id) {
        return Ok(());
    }

    state.streams().remove(&stream, token_id);

    if kick {
        let packet = frame(&ChannelKickS2c {
            channel: client_channel_name(&channel_name).to_owned(),
        })?;
        state.sessions().enqueue(token_id, packet);
    }

    if channel.instance && state.streams().count(&stream) == 0 {
        delete(state, &channel_name)?;
    }

    Ok(())
}

/// Applies the persisted channel catalog, skipping channels that already
/// exist. Seeded channels are never moderated; the catalog's `temp` flag
/// becomes `instance`.
pub async fn seed_from_catalog(state: &SharedState) -> anyhow::Result<()> {
    for seed in state.db().fetch_seed_channels().await? {
        if state.channels().contains(&seed.name) {
            continue;
        }

        create(
            state,
            Channel {
                name: seed.name,
                description: seed.description,
                public_read: seed.public_read,
                public_write: seed.public_write,
                moderated: false,
                instance: seed.instance,
            },
        )?;
    }

    Ok(())
}
