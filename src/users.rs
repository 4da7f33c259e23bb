//! Persisted user accounts: the privilege bitmask and the account-state
//! transitions (restriction, freezes, donor expiry) the login flow can
//! trigger.

use anyhow::Context;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::audit::{self, AnticheatChannel};
use crate::db::UserUpdate;
use crate::state::SharedState;
use crate::stats::{leaderboard_key, Gameplay, Mode};
use crate::unix_now;

/// The user id of the server-owned chat bot. It must exist in the user store
/// and holds a permanent session.
pub const BOT_USER_ID: i32 = 999;

/// How long an armed account freeze runs before it escalates to a
/// restriction.
pub const FREEZE_GRACE_SECS: i64 = 86_400 * 7;

/// A persisted user account, as read through the user store. Only
/// `privileges`, `frozen`, `freeze_reason` and `notes` are ever written back
/// by this crate.
#[derive(Clone, Debug)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub username_safe: String,
    /// bcrypt hash of the md5 of the cleartext password.
    pub password_bcrypt: String,
    pub privileges: Privileges,
    pub whitelist: i32,
    pub silence_end: i64,
    pub donor_expire: i64,
    /// `0` = not frozen, `1` = freeze requested but the timer is not armed
    /// yet, anything larger = the unix-seconds restriction deadline.
    pub frozen: i64,
    pub freeze_reason: Option<String>,
    pub notes: Option<String>,
}

/// The server-side privilege bitmask.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Privileges(pub i32);

impl Privileges {
    pub const USER_PUBLIC: Privileges = Privileges(1 << 0);
    pub const USER_NORMAL: Privileges = Privileges(1 << 1);
    pub const USER_DONOR: Privileges = Privileges(1 << 2);
    pub const ADMIN_CHAT_MOD: Privileges = Privileges(1 << 18);
    pub const USER_PENDING_VERIFICATION: Privileges = Privileges(1 << 20);
    pub const USER_TOURNAMENT_STAFF: Privileges = Privileges(1 << 21);
    pub const USER_PREMIUM: Privileges = Privileges(1 << 23);

    /// Returns `true` if any of the given bits are set.
    pub fn intersects(self, bits: Privileges) -> bool {
        self.0 & bits.0 != 0
    }

    pub fn is_restricted(self) -> bool {
        !self.intersects(Self::USER_PUBLIC)
    }

    pub fn is_staff(self) -> bool {
        self.intersects(Self::ADMIN_CHAT_MOD)
    }

    pub fn is_tournament_staff(self) -> bool {
        self.intersects(Self::USER_TOURNAMENT_STAFF)
    }

    pub fn is_pending_verification(self) -> bool {
        self.intersects(Self::USER_PENDING_VERIFICATION)
    }
}

impl std::ops::BitOr for Privileges {
    type Output = Privileges;

    fn bitor(self, rhs: Privileges) -> Privileges {
        Privileges(self.0 | rhs.0)
    }
}

/// Restricts a user: clears `USER_PUBLIC`, announces the restriction on the
/// KV store's pub-sub, and drops them from every leaderboard. A no-op when
/// the user is already restricted.
pub async fn restrict(
    state: &SharedState,
    user_id: i32,
    current_privileges: Privileges,
) -> anyhow::Result<Privileges> {
    if current_privileges.is_restricted() {
        return Ok(current_privileges);
    }

    let user = state
        .db()
        .update_user(
            user_id,
            UserUpdate::default()
                .privileges(Privileges(current_privileges.0 & !Privileges::USER_PUBLIC.0)),
        )
        .await?;

    state.kv().publish("peppy:ban", &user_id.to_string()).await?;
    remove_from_leaderboards(state, user_id).await?;

    Ok(user.privileges)
}

/// Removes the user from all twelve leaderboard sorted sets, and from the
/// country-scoped variants when a usable country is on record.
pub async fn remove_from_leaderboards(state: &SharedState, user_id: i32) -> anyhow::Result<()> {
    let country = state.db().fetch_country(user_id).await?.to_lowercase();
    let member = user_id.to_string();

    for gameplay in [Gameplay::Vanilla, Gameplay::Relax, Gameplay::Autopilot] {
        for mode in [Mode::Std, Mode::Taiko, Mode::Ctb, Mode::Mania] {
            let key = leaderboard_key(gameplay, mode);
            state.kv().zrem(&key, &member).await?;

            if !country.is_empty() && country != "xx" {
                state.kv().zrem(&format!("{key}:{country}"), &member).await?;
            }
        }
    }

    Ok(())
}

/// Arms a requested freeze: the user has [`FREEZE_GRACE_SECS`] from now to
/// comply before login restricts them. Returns the deadline.
pub async fn begin_freeze_timer(state: &SharedState, user_id: i32) -> anyhow::Result<i64> {
    let deadline = unix_now() + FREEZE_GRACE_SECS;

    state
        .db()
        .update_user(user_id, UserUpdate::default().frozen(deadline))
        .await?;

    Ok(deadline)
}

/// Clears the freeze fields. With `log`, also writes the author note, the
/// audit line and the anticheat webhook; the quiet variant is for state
/// transitions that log on their own terms.
pub async fn unfreeze(
    state: &SharedState,
    user_id: i32,
    author_id: i32,
    log: bool,
) -> anyhow::Result<()> {
    state
        .db()
        .update_user(user_id, UserUpdate::default().frozen(0).freeze_reason(None))
        .await?;

    if !log {
        return Ok(());
    }

    let author = state
        .db()
        .fetch_user_by_id(author_id)
        .await?
        .context("unfreeze author does not exist")?;

    let user = state
        .db()
        .fetch_user_by_id(user_id)
        .await?
        .context("unfrozen user does not exist")?;

    append_notes(
        state,
        user_id,
        &format!("{} ({author_id}) unfroze this user.", author.username),
        true,
        true,
    )
    .await?;

    audit::rap(
        state.db().as_ref(),
        author.id,
        &format!("unfroze {} ({}).", user.username, user.id),
    )
    .await?;

    state
        .webhooks()
        .anticheat(
            &format!(
                "{} has unfrozen [{}](https://akatsuki.pw/u/{})",
                author.username, user.username, user.id
            ),
            AnticheatChannel::General,
        )
        .await;

    Ok(())
}

const NOTE_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Appends a line to a user's admin notes, by default prefixed with the
/// current date and pushed onto a fresh line. Returns the combined notes.
pub async fn append_notes(
    state: &SharedState,
    user_id: i32,
    note: &str,
    track_date: bool,
    add_newline: bool,
) -> anyhow::Result<String> {
    let mut note = note.to_owned();

    if track_date {
        let stamp = OffsetDateTime::now_utc()
            .format(NOTE_DATE_FORMAT)
            .context("formatting note timestamp")?;
        note = format!("[{stamp}] {note}");
    }

    if add_newline {
        note = format!("\n{note}");
    }

    let user = state
        .db()
        .fetch_user_by_id(user_id)
        .await?
        .context("user does not exist")?;

    let combined = format!("{}{note}", user.notes.unwrap_or_default());

    let user = state
        .db()
        .update_user(user_id, UserUpdate::default().notes(combined))
        .await?;

    user.notes.context("notes unset after update")
}

/// Revokes an expired supporter/premium tag: privileges, badges (36 =
/// supporter, 59 = premium), custom badge flags, plus the audit trail.
pub async fn revoke_supporter_privileges(
    state: &SharedState,
    user_id: i32,
    current_privileges: Privileges,
) -> anyhow::Result<Privileges> {
    let has_premium = current_privileges.intersects(Privileges::USER_PREMIUM);
    let role_name = if has_premium { "premium" } else { "supporter" };

    // The donor bit is known to be set here, so plain subtraction clears
    // exactly that bit.
    let next = Privileges(
        (current_privileges.0 - Privileges::USER_DONOR.0)
            | if has_premium {
                Privileges::USER_PREMIUM.0
            } else {
                0
            },
    );

    let user = state
        .db()
        .update_user(user_id, UserUpdate::default().privileges(next))
        .await?;

    state.db().delete_supporter_badges(user_id).await?;
    state.db().clear_custom_badge_flags(user_id).await?;

    state
        .webhooks()
        .anticheat(
            &format!(
                "[{}](https://akatsuki.pw/u/{})'s {role_name} subscription has expired.",
                user.username, user.id
            ),
            AnticheatChannel::Confidential,
        )
        .await;

    audit::rap(
        state.db().as_ref(),
        user.id,
        &format!("{role_name} subscription expired."),
    )
    .await?;

    Ok(user.privileges)
}
