//! Gameplay modes, stat snapshots and the leaderboard key layout.

use std::sync::Arc;

use crate::kv::KeyValue;

/// The four osu! game modes.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub enum Mode {
    #[default]
    Std = 0,
    Taiko = 1,
    Ctb = 2,
    Mania = 3,
}

impl Mode {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Std => "std",
            Mode::Taiko => "taiko",
            Mode::Ctb => "ctb",
            Mode::Mania => "mania",
        }
    }
}

/// Gameplay variant; relax and autopilot keep separate stats tables and
/// leaderboards.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub enum Gameplay {
    #[default]
    Vanilla = 0,
    Relax = 1,
    Autopilot = 2,
}

impl Gameplay {
    pub fn from_flags(relax: bool, autopilot: bool) -> Self {
        if relax {
            Gameplay::Relax
        } else if autopilot {
            Gameplay::Autopilot
        } else {
            Gameplay::Vanilla
        }
    }

    fn board(self) -> &'static str {
        match self {
            Gameplay::Vanilla => "leaderboard",
            Gameplay::Relax => "relaxboard",
            Gameplay::Autopilot => "autoboard",
        }
    }
}

/// A per-mode stat row, as read from the stats source. `accuracy` is a
/// percentage in `0..=100`.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct Stats {
    pub ranked_score: i64,
    pub accuracy: f32,
    pub playcount: i32,
    pub total_score: i64,
    pub pp: i32,
}

/// The sorted-set key holding the global leaderboard for a gameplay variant
/// and mode. Country-scoped boards append `:<country>`.
pub fn leaderboard_key(gameplay: Gameplay, mode: Mode) -> String {
    format!("ripple:{}:{}", gameplay.board(), mode.as_str())
}

/// A user's global rank: their reverse rank in the leaderboard sorted set
/// plus one, or `0` when they are not ranked at all.
pub async fn global_rank(
    kv: &Arc<dyn KeyValue>,
    user_id: i32,
    mode: Mode,
    gameplay: Gameplay,
) -> anyhow::Result<i32> {
    let key = leaderboard_key(gameplay, mode);

    Ok(match kv.zrevrank(&key, &user_id.to_string()).await? {
        Some(position) => position as i32 + 1,
        None => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaderboard_key_layout() {
        assert_eq!(leaderboard_key(Gameplay::Vanilla, Mode::Std), "ripple:leaderboard:std");
        assert_eq!(leaderboard_key(Gameplay::Relax, Mode::Taiko), "ripple:relaxboard:taiko");
        assert_eq!(leaderboard_key(Gameplay::Autopilot, Mode::Mania), "ripple:autoboard:mania");
    }

    #[test]
    fn gameplay_from_flags() {
        assert_eq!(Gameplay::from_flags(false, false), Gameplay::Vanilla);
        assert_eq!(Gameplay::from_flags(true, false), Gameplay::Relax);
        assert_eq!(Gameplay::from_flags(false, true), Gameplay::Autopilot);
    }
}
