//! Server→client packets used by the login and presence flow.
//!
//! Each struct encodes exactly its payload; framing (packet id, reserved
//! byte, payload length) is added by [`PacketEncoder`](crate::PacketEncoder)
//! or [`frame`](crate::frame).

use std::io::Write;

use anyhow::Context;

use crate::{Decode, Encode, Packet};

macro_rules! impl_packet {
    ($ty:ty, $id:literal) => {
        impl Packet for $ty {
            const ID: u16 = $id;
            const NAME: &'static str = stringify!($ty);
        }
    };
}

/// The outcome of a login attempt. Negative ids signal failure; `-1` is the
/// generic "invalid credentials" reply.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AccountIdS2c {
    pub user_id: i32,
}

impl_packet!(AccountIdS2c, 5);

impl Encode for AccountIdS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.user_id.encode(w)
    }
}

impl Decode<'_> for AccountIdS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            user_id: i32::decode(r)?,
        })
    }
}

/// A chat message, either to a channel or as a DM.
#[derive(Clone, PartialEq, Debug)]
pub struct SendMessageS2c {
    pub sender: String,
    pub message: String,
    pub recipient: String,
    pub sender_id: i32,
}

impl_packet!(SendMessageS2c, 7);

impl Encode for SendMessageS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.sender.encode(&mut w)?;
        self.message.encode(&mut w)?;
        self.recipient.encode(&mut w)?;
        self.sender_id.encode(w)
    }
}

impl Decode<'_> for SendMessageS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            sender: String::decode(r)?,
            message: String::decode(r)?,
            recipient: String::decode(r)?,
            sender_id: i32::decode(r)?,
        })
    }
}

/// The stat snapshot shown in a player's panel.
///
/// `accuracy` is a percentage in `0..=100`; the wire carries it divided
/// down to a fraction.
#[derive(Clone, PartialEq, Debug)]
pub struct UserStatsS2c {
    pub user_id: i32,
    pub action: u8,
    pub info_text: String,
    pub map_md5: String,
    pub mods: i32,
    pub mode: u8,
    pub map_id: i32,
    pub ranked_score: i64,
    pub accuracy: f32,
    pub playcount: i32,
    pub total_score: i64,
    pub global_rank: i32,
    pub pp: i16,
}

impl_packet!(UserStatsS2c, 11);

impl Encode for UserStatsS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.user_id.encode(&mut w)?;
        self.action.encode(&mut w)?;
        self.info_text.encode(&mut w)?;
        self.map_md5.encode(&mut w)?;
        self.mods.encode(&mut w)?;
        self.mode.encode(&mut w)?;
        self.map_id.encode(&mut w)?;
        self.ranked_score.encode(&mut w)?;
        (self.accuracy / 100.0).encode(&mut w)?;
        self.playcount.encode(&mut w)?;
        self.total_score.encode(&mut w)?;
        self.global_rank.encode(&mut w)?;
        self.pp.encode(w)
    }
}

impl Decode<'_> for UserStatsS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            user_id: i32::decode(r)?,
            action: u8::decode(r)?,
            info_text: String::decode(r)?,
            map_md5: String::decode(r)?,
            mods: i32::decode(r)?,
            mode: u8::decode(r)?,
            map_id: i32::decode(r)?,
            ranked_score: i64::decode(r)?,
            accuracy: f32::decode(r)? * 100.0,
            playcount: i32::decode(r)?,
            total_score: i64::decode(r)?,
            global_rank: i32::decode(r)?,
            pp: i16::decode(r)?,
        })
    }
}

/// A toast shown in the client's corner.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NotificationS2c {
    pub message: String,
}

impl_packet!(NotificationS2c, 24);

impl Encode for NotificationS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.message.encode(w)
    }
}

impl Decode<'_> for NotificationS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            message: String::decode(r)?,
        })
    }
}

/// Confirms a channel join. Carries the client-facing channel name, which
/// for session-scoped channels is the `#spectator`/`#multiplayer` alias.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelJoinSuccessS2c {
    pub channel: String,
}

impl_packet!(ChannelJoinSuccessS2c, 64);

impl Encode for ChannelJoinSuccessS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.channel.encode(w)
    }
}

impl Decode<'_> for ChannelJoinSuccessS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            channel: String::decode(r)?,
        })
    }
}

/// Advertises a joinable channel in the client's channel list.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelInfoS2c {
    pub channel: String,
    pub topic: String,
    pub user_count: u16,
}

impl_packet!(ChannelInfoS2c, 65);

impl Encode for ChannelInfoS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.channel.encode(&mut w)?;
        self.topic.encode(&mut w)?;
        self.user_count.encode(w)
    }
}

impl Decode<'_> for ChannelInfoS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            channel: String::decode(r)?,
            topic: String::decode(r)?,
            user_count: u16::decode(r)?,
        })
    }
}

/// Forces the client out of a channel.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelKickS2c {
    pub channel: String,
}

impl_packet!(ChannelKickS2c, 66);

impl Encode for ChannelKickS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.channel.encode(w)
    }
}

impl Decode<'_> for ChannelKickS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            channel: String::decode(r)?,
        })
    }
}

/// The reduced privilege bits shown to the client (see
/// [`bancho_privileges`](crate::bancho_privileges)).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PrivilegesS2c {
    pub privileges: i32,
}

impl_packet!(PrivilegesS2c, 71);

impl Encode for PrivilegesS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.privileges.encode(w)
    }
}

impl Decode<'_> for PrivilegesS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            privileges: i32::decode(r)?,
        })
    }
}

/// The user ids on the player's friends list.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FriendsListS2c {
    pub friends: Vec<i32>,
}

impl_packet!(FriendsListS2c, 72);

impl Encode for FriendsListS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        let count = u16::try_from(self.friends.len()).context("too many friends")?;
        count.encode(&mut w)?;

        for &friend in &self.friends {
            (friend as u32).encode(&mut w)?;
        }

        Ok(())
    }
}

impl Decode<'_> for FriendsListS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let count = u16::decode(r)?;
        let mut friends = Vec::with_capacity(usize::from(count));

        for _ in 0..count {
            friends.push(u32::decode(r)? as i32);
        }

        Ok(Self { friends })
    }
}

/// The protocol version the server speaks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProtocolVersionS2c {
    pub version: i32,
}

impl_packet!(ProtocolVersionS2c, 75);

impl Encode for ProtocolVersionS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.version.encode(w)
    }
}

impl Decode<'_> for ProtocolVersionS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            version: i32::decode(r)?,
        })
    }
}

/// The main menu banner; icon and click-through URLs joined by `|`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MainMenuIconS2c {
    pub icon_url: String,
    pub onclick_url: String,
}

impl_packet!(MainMenuIconS2c, 76);

impl Encode for MainMenuIconS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        format!("{}|{}", self.icon_url, self.onclick_url).encode(w)
    }
}

impl Decode<'_> for MainMenuIconS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let joined = String::decode(r)?;
        let (icon_url, onclick_url) = joined
            .split_once('|')
            .context("missing separator in main menu icon")?;

        Ok(Self {
            icon_url: icon_url.into(),
            onclick_url: onclick_url.into(),
        })
    }
}

/// A player's identity card: who they are and where they play from.
///
/// `utc_offset` is biased by +24 on the wire, and `mode` is packed into the
/// top three bits of the privilege byte.
#[derive(Clone, PartialEq, Debug)]
pub struct UserPresenceS2c {
    pub user_id: i32,
    pub username: String,
    pub utc_offset: i32,
    pub country: u8,
    pub privileges: u8,
    pub mode: u8,
    pub latitude: f32,
    pub longitude: f32,
    pub global_rank: i32,
}

impl_packet!(UserPresenceS2c, 83);

impl Encode for UserPresenceS2c {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        self.user_id.encode(&mut w)?;
        self.username.encode(&mut w)?;
        ((self.utc_offset + 24) as u8).encode(&mut w)?;
        self.country.encode(&mut w)?;
        (self.privileges | (self.mode << 5)).encode(&mut w)?;
        self.latitude.encode(&mut w)?;
        self.longitude.encode(&mut w)?;
        self.global_rank.encode(w)
    }
}

impl Decode<'_> for UserPresenceS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        let user_id = i32::decode(r)?;
        let username = String::decode(r)?;
        let utc_offset = i32::from(u8::decode(r)?) - 24;
        let country = u8::decode(r)?;
        let packed = u8::decode(r)?;

        Ok(Self {
            user_id,
            username,
            utc_offset,
            country,
            privileges: packed & 0b1_1111,
            mode: packed >> 5,
            latitude: f32::decode(r)?,
            longitude: f32::decode(r)?,
            global_rank: i32::decode(r)?,
        })
    }
}

/// Terminates the channel listing sent during login.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChannelInfoEndS2c;

impl_packet!(ChannelInfoEndS2c, 89);

impl Encode for ChannelInfoEndS2c {
    fn encode(&self, _w: impl Write) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Decode<'_> for ChannelInfoEndS2c {
    fn decode(_r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self)
    }
}

/// Seconds of silence remaining, never negative.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SilenceEndS2c {
    pub remaining_seconds: i32,
}

impl_packet!(SilenceEndS2c, 92);

impl Encode for SilenceEndS2c {
    fn encode(&self, w: impl Write) -> anyhow::Result<()> {
        self.remaining_seconds.encode(w)
    }
}

impl Decode<'_> for SilenceEndS2c {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self {
            remaining_seconds: i32::decode(r)?,
        })
    }
}
