//! The login state machine: payload parsing, credential and account-status
//! gating, the duplicate-session critical section, post-creation
//! enrichment, and the contractual response packet sequence.

use std::sync::OnceLock;

use anyhow::Context;
use bancho_protocol::packets::{
    AccountIdS2c, ChannelInfoEndS2c, ChannelInfoS2c, FriendsListS2c, MainMenuIconS2c,
    NotificationS2c, PrivilegesS2c, ProtocolVersionS2c, SendMessageS2c, SilenceEndS2c,
    UserPresenceS2c, UserStatsS2c,
};
use bancho_protocol::{bancho_privileges, frame, PacketEncoder, PROTOCOL_VERSION};
use regex::Regex;
use thiserror::Error;
use time::{Date, Month};
use tracing::{info, warn};

use crate::channel::{self, backing_stream};
use crate::geo;
use crate::http::BanchoResponse;
use crate::lock::TOKENS_LOCK;
use crate::session::{self, NewSession, Token, TokenUpdate};
use crate::state::SharedState;
use crate::stream::MAIN_STREAM;
use crate::unix_now;
use crate::users::{self, Privileges, User, BOT_USER_ID};

/// How old a client build may be before it is turned away.
const MAX_CLIENT_AGE_SECS: i64 = 365 * 86_400;

/// The textual login payload: three newline-separated lines, the third
/// carrying `|`-separated fields with a `:`-separated hash blob inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    /// Lowercase md5 of the cleartext password.
    pub password_md5: String,
    pub osu_version: String,
    pub utc_offset: i32,
    pub display_city: bool,
    pub pm_private: bool,
    pub client_md5: String,
    pub adapters_str: String,
    pub adapters_md5: String,
    pub uninstall_md5: String,
    pub disk_signature_md5: String,
}

impl LoginRequest {
    pub fn parse(body: &[u8]) -> anyhow::Result<Self> {
        let text = std::str::from_utf8(body).context("login payload is not UTF-8")?;

        let mut lines = text.splitn(3, '\n');
        let username = lines.next().context("missing username line")?;
        let password_md5 = lines.next().context("missing password line")?;
        let remainder = lines.next().context("missing client info line")?;

        let mut fields = remainder.splitn(5, '|');
        let osu_version = fields.next().context("missing osu! version")?;
        let utc_offset = fields
            .next()
            .context("missing utc offset")?
            .trim()
            .parse::<i32>()
            .context("parsing utc offset")?;
        let display_city = fields
            .next()
            .context("missing display-city flag")?
            .trim()
            .parse::<i32>()
            .context("parsing display-city flag")?
            != 0;
        let client_hashes = fields.next().context("missing client hashes")?;
        let pm_private = fields
            .next()
            .context("missing pm-private flag")?
            .trim()
            .parse::<i32>()
            .context("parsing pm-private flag")?
            != 0;

        let client_hashes = client_hashes
            .strip_suffix(':')
            .context("malformed client hash blob")?;
        let mut hashes = client_hashes.splitn(5, ':');
        let client_md5 = hashes.next().context("missing client md5")?;
        let adapters_str = hashes.next().context("missing adapters")?;
        let adapters_md5 = hashes.next().context("missing adapters md5")?;
        let uninstall_md5 = hashes.next().context("missing uninstall md5")?;
        let disk_signature_md5 = hashes.next().context("missing disk signature md5")?;

        Ok(Self {
            username: username.to_owned(),
            password_md5: password_md5.to_owned(),
            osu_version: osu_version.to_owned(),
            utc_offset,
            display_city,
            pm_private,
            client_md5: client_md5.to_owned(),
            adapters_str: adapters_str.to_owned(),
            adapters_md5: adapters_md5.to_owned(),
            uninstall_md5: uninstall_md5.to_owned(),
            disk_signature_md5: disk_signature_md5.to_owned(),
        })
    }
}

/// A parsed `osu_version` string: the build date and the release stream
/// tag, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientVersion {
    /// Midnight UTC of the build date, unix seconds.
    pub released_at: i64,
    pub stream: Option<String>,
}

impl ClientVersion {
    pub fn is_tournament(&self) -> bool {
        self.stream.as_deref() == Some("tourney")
    }
}

fn client_version_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();

    REGEX.get_or_init(|| {
        Regex::new(r"^b(\d{4})(\d{2})(\d{2})(?:\.(\d))?(beta|cuttingedge|dev|tourney)?$")
            .expect("client version regex is valid")
    })
}

/// Parses `b<yyyymmdd>[.<subver>][<stream>]`; `None` for anything
/// malformed, including impossible calendar dates.
pub fn parse_client_version(osu_version: &str) -> Option<ClientVersion> {
    let caps = client_version_regex().captures(osu_version)?;

    let year: i32 = caps[1].parse().ok()?;
    let month: u8 = caps[2].parse().ok()?;
    let day: u8 = caps[3].parse().ok()?;

    let date = Date::from_calendar_date(year, Month::try_from(month).ok()?, day).ok()?;

    Some(ClientVersion {
        released_at: date.midnight().assume_utc().unix_timestamp(),
        stream: caps.get(5).map(|m| m.as_str().to_owned()),
    })
}

/// The client-visible login rejections. The display text is exactly what
/// the notification packet carries.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoginDenied {
    #[error(
        "Akatsuki: You have entered an invalid username or password. \
         Please check your credentials and try again!"
    )]
    InvalidCredentials,
    #[error("Akatsuki: Something went wrong during your login attempt... Please try again!")]
    SomethingWentWrong,
    #[error(
        "You are banned. The earliest we accept appeals is 2 months after your \
         most recent offense, and we really only care for the truth."
    )]
    Banned,
    #[error(
        "Your account is locked. You can't log in, but your profile and scores \
         are still visible from the website. The earliest we accept appeals is \
         2 months after your most recent offense, and really only care for the truth."
    )]
    Locked,
    #[error(
        "Hey!\nThe osu! client you're trying to use is out of date.\n\
         Custom/out of date osu! clients are not allowed on Akatsuki.\n\
         Please relogin using the current osu! client - no fallback, sorry!"
    )]
    OutdatedClient,
    #[error("Akatsuki: You are already logged in somewhere else!")]
    AlreadyOnline,
    #[error("Akatsuki is currently in maintenance mode. Please try to login again later.")]
    Maintenance,
}

/// A failure response: `account_id(-1)` plus the explanatory notification,
/// under `cho-token: no`.
fn denied(reason: &LoginDenied) -> anyhow::Result<BanchoResponse> {
    let mut body = PacketEncoder::new();
    body.append_packet(&AccountIdS2c { user_id: -1 })?;
    body.append_packet(&NotificationS2c {
        message: reason.to_string(),
    })?;

    Ok(BanchoResponse::failure(body.into_bytes()))
}

/// Runs a login end to end and produces the HTTP-level reply.
pub async fn handle_login(
    state: &SharedState,
    body: &[u8],
    ip: String,
) -> anyhow::Result<BanchoResponse> {
    let Ok(request) = LoginRequest::parse(body) else {
        return denied(&LoginDenied::SomethingWentWrong);
    };

    let Some(user) = state.db().fetch_user_by_username(&request.username).await? else {
        return denied(&LoginDenied::InvalidCredentials);
    };

    // The bot never logs in over the wire.
    if user.id == BOT_USER_ID {
        return denied(&LoginDenied::SomethingWentWrong);
    }

    if !state
        .bcrypt()
        .verify_password(&request.password_md5, &user.password_bcrypt)
        .await?
    {
        return denied(&LoginDenied::InvalidCredentials);
    }

    if !user.privileges.is_pending_verification() {
        if !user
            .privileges
            .intersects(Privileges::USER_PUBLIC | Privileges::USER_NORMAL)
        {
            return denied(&LoginDenied::Banned);
        }

        if user.privileges.intersects(Privileges::USER_PUBLIC)
            && !user.privileges.intersects(Privileges::USER_NORMAL)
        {
            return denied(&LoginDenied::Locked);
        }
    }

    let Some(client) = parse_client_version(&request.osu_version) else {
        return denied(&LoginDenied::SomethingWentWrong);
    };

    if client.released_at < unix_now() - MAX_CLIENT_AGE_SECS {
        warn!(
            username = %user.username,
            osu_version = %request.osu_version,
            "denied login from outdated client"
        );
        return denied(&LoginDenied::OutdatedClient);
    }

    state.db().log_ip(user.id, &ip).await?;

    // The critical section: the duplicate check and session creation must
    // be indivisible, or two racing logins could both pass the check.
    let lock = state.locks().acquire(TOKENS_LOCK).await?;

    if !client.is_tournament() && !state.sessions().fetch_by_user(user.id).is_empty() {
        lock.release().await?;
        return denied(&LoginDenied::AlreadyOnline);
    }

    let created = session::create(
        state,
        NewSession {
            user_id: user.id,
            username: user.username.clone(),
            privileges: user.privileges,
            whitelist: user.whitelist,
            silence_end_time: user.silence_end,
            ip: ip.clone(),
            utc_offset: request.utc_offset,
            tournament: client.is_tournament(),
            block_non_friends_dm: request.pm_private,
        },
    )
    .await;

    lock.release().await?;
    let mut token = created?;

    info!(username = %user.username, ip = %ip, "successful login");

    session::check_restricted(state, &token).await?;

    let mut user = user;
    let mut response = PacketEncoder::new();
    let now = unix_now();

    apply_freeze_state(state, &mut user, &mut token, &mut response, now).await?;
    apply_donor_state(state, &mut user, &mut token, &mut response, now).await?;

    let silence_seconds = session::remaining_silence_seconds(token.silence_end_time);
    let user_restricted = token.privileges.is_restricted();
    let user_staff = token.privileges.is_staff();
    let user_tournament_staff = token.privileges.is_tournament_staff();

    // Donors show their website flag; everyone else resolves by IP.
    let (country_code, latitude, longitude) =
        if token.privileges.intersects(Privileges::USER_DONOR) {
            (state.db().fetch_country(user.id).await?, 0.0, 0.0)
        } else {
            let location = state.geo().resolve(&ip).await?;
            (location.country, location.latitude, location.longitude)
        };

    let country = geo::country_id(&country_code);
    token.country = country;
    token.latitude = latitude;
    token.longitude = longitude;
    state.sessions().update(
        &token.token_id,
        TokenUpdate::default()
            .country(country)
            .location(latitude, longitude),
    );

    if let Some(notification) = &state.config().login_notification {
        response.append_packet(&NotificationS2c {
            message: notification.clone(),
        })?;
    }

    if state.config().maintenance_mode {
        if !user_staff {
            // Abort the freshly-created session before rejecting.
            state.streams().remove(MAIN_STREAM, &token.token_id);
            state.sessions().remove(&token.token_id);

            response.append_packet(&AccountIdS2c { user_id: -1 })?;
            response.append_packet(&NotificationS2c {
                message: LoginDenied::Maintenance.to_string(),
            })?;

            return Ok(BanchoResponse::failure(response.into_bytes()));
        }

        response.append_packet(&NotificationS2c {
            message: "Akatsuki is currently in maintenance mode. \
                      Only admins have full access to the server.\n\
                      Type '!system maintenance off' in chat to disable maintenance mode."
                .to_owned(),
        })?;
    }

    let client_privileges = bancho_privileges(user_restricted, user_staff, user_tournament_staff);

    response.append_packet(&ProtocolVersionS2c {
        version: PROTOCOL_VERSION,
    })?;
    response.append_packet(&AccountIdS2c { user_id: user.id })?;
    response.append_packet(&SilenceEndS2c {
        remaining_seconds: silence_seconds as i32,
    })?;
    response.append_packet(&PrivilegesS2c {
        privileges: client_privileges,
    })?;
    response.append_packet(&self_presence(&token, client_privileges))?;
    response.append_packet(&UserStatsS2c {
        user_id: user.id,
        action: token.action.0,
        info_text: token.action_text.clone(),
        map_md5: token.action_md5.clone(),
        mods: token.action_mods,
        mode: token.mode.id(),
        map_id: token.action_beatmap_id,
        ranked_score: token.ranked_score,
        accuracy: token.accuracy,
        playcount: token.playcount,
        total_score: token.total_score,
        global_rank: token.global_rank,
        pp: token.pp as i16,
    })?;

    channel::join_channel(state, &token.token_id, "#osu")?;
    channel::join_channel(state, &token.token_id, "#announce")?;

    for chan in state.channels().fetch_all() {
        if chan.public_read && !chan.instance {
            let user_count = state.streams().count(&backing_stream(&chan.name));

            response.append_packet(&ChannelInfoS2c {
                channel: chan.name,
                topic: chan.description,
                user_count: user_count as u16,
            })?;
        }
    }
    response.append_packet(&ChannelInfoEndS2c)?;

    let friends = state.db().fetch_friends(user.id).await?;
    response.append_packet(&FriendsListS2c { friends })?;

    if let (Some(icon_url), Some(onclick_url)) = (
        &state.config().menu_icon_url,
        &state.config().menu_onclick_url,
    ) {
        response.append_packet(&MainMenuIconS2c {
            icon_url: icon_url.clone(),
            onclick_url: onclick_url.clone(),
        })?;
    }

    // Snapshot everyone else and announce ourselves, serialized against
    // concurrent logins so nobody is missed or double-announced.
    let lock = state.locks().acquire(TOKENS_LOCK).await?;

    for other in state.sessions().fetch_all() {
        if other.token_id == token.token_id || other.privileges.is_restricted() {
            continue;
        }

        let other_privileges = bancho_privileges(
            false,
            other.privileges.is_staff(),
            other.privileges.is_tournament_staff(),
        );
        response.append_packet(&self_presence(&other, other_privileges))?;
    }

    if !user_restricted {
        let presence = frame(&self_presence(&token, client_privileges))?;
        state
            .streams()
            .broadcast(state.sessions(), MAIN_STREAM, &presence, &[]);
    }

    lock.release().await?;

    Ok(BanchoResponse::success(
        token.token_id.to_string(),
        response.into_bytes(),
    ))
}

fn self_presence(token: &Token, client_privileges: i32) -> UserPresenceS2c {
    UserPresenceS2c {
        user_id: token.user_id,
        username: token.username.clone(),
        utc_offset: token.utc_offset,
        country: token.country,
        privileges: client_privileges as u8,
        mode: token.mode.id(),
        latitude: token.latitude,
        longitude: token.longitude,
        global_rank: token.global_rank,
    }
}

/// The freeze sub-state-machine. `frozen == 1` arms the timer; a live
/// timer warns via a bot DM; an elapsed timer restricts on the spot.
async fn apply_freeze_state(
    state: &SharedState,
    user: &mut User,
    token: &mut Token,
    response: &mut PacketEncoder,
    now: i64,
) -> anyhow::Result<()> {
    if user.frozen == 0 {
        return Ok(());
    }

    if user.frozen == 1 {
        user.frozen = users::begin_freeze_timer(state, user.id).await?;
    }

    let reason = match &user.freeze_reason {
        Some(reason) if !reason.is_empty() => format!(" as a result of:\n\n{reason}\n"),
        _ => String::new(),
    };

    if user.frozen > now {
        let opening = format!("Your account has been frozen by an administrator{reason}");
        let countdown = format!(
            "Time until account restriction: {}.",
            format_duration(user.frozen - now)
        );

        let message = [
            opening.as_str(),
            "This is not a restriction, but will lead to one if ignored.",
            "You are required to submit a liveplay using the (specified criteria)[https://pastebin.com/BwcXp6Cr]",
            "Please remember we are not stupid - we have done plenty of these before and have heard \
             every excuse in the book; if you are breaking rules, your best bet would be to admit to \
             a staff member, lying will only end up digging your grave deeper.",
            "-------------",
            "If you have any questions or are ready to liveplay, please contact an \
             (Akatsuki Administrator)[https://akatsuki.pw/team] {ingame, (Discord)[https://akatsuki.pw/discord], etc.}",
            countdown.as_str(),
        ]
        .join("\n");

        let bot = state
            .db()
            .fetch_user_by_id(BOT_USER_ID)
            .await?
            .context("bot user missing")?;

        response.append_packet(&SendMessageS2c {
            sender: bot.username,
            message,
            recipient: token.username.clone(),
            sender_id: bot.id,
        })?;
    } else {
        // Timer ran out while they were away.
        let next = users::restrict(state, user.id, user.privileges).await?;
        user.privileges = next;
        token.privileges = next;
        state
            .sessions()
            .update(&token.token_id, TokenUpdate::default().privileges(next));

        users::unfreeze(state, user.id, BOT_USER_ID, false).await?;
        user.frozen = 0;

        response.append_packet(&NotificationS2c {
            message: [
                "Your account has been automatically restricted due to an account \
                 freeze being left unhandled for over 7 days.",
                "You are still welcome to liveplay, although your account will \
                 remain in restricted mode unless this is handled.",
            ]
            .join("\n"),
        })?;

        crate::audit::rap(
            state.db().as_ref(),
            user.id,
            "has been automatically restricted due to a pending freeze.",
        )
        .await?;

        state
            .webhooks()
            .anticheat(
                &format!(
                    "[{}](https://akatsuki.pw/u/{}) has been automatically restricted \
                     due to a pending freeze.",
                    user.username, user.id
                ),
                crate::audit::AnticheatChannel::General,
            )
            .await;
    }

    Ok(())
}

/// The donor-expiry sub-state-machine: revoke an expired tag, or count
/// down the last week.
async fn apply_donor_state(
    state: &SharedState,
    user: &mut User,
    token: &mut Token,
    response: &mut PacketEncoder,
    now: i64,
) -> anyhow::Result<()> {
    if !user.privileges.intersects(Privileges::USER_DONOR) {
        return Ok(());
    }

    let has_premium = user.privileges.intersects(Privileges::USER_PREMIUM);
    let role_name = if has_premium { "premium" } else { "supporter" };

    if now >= user.donor_expire {
        let next = users::revoke_supporter_privileges(state, user.id, user.privileges).await?;
        user.privileges = next;
        token.privileges = next;
        state
            .sessions()
            .update(&token.token_id, TokenUpdate::default().privileges(next));

        let expired = format!("Your {role_name} tag has expired.");
        response.append_packet(&NotificationS2c {
            message: [
                expired.as_str(),
                "Whether you continue to support us or not, we'd like to thank you \
                 to the moon and back for your support so far - it really means \
                 everything to us.",
                "- cmyui, and the Akatsuki Team",
            ]
            .join("\n"),
        })?;
    } else if user.donor_expire - now <= 86_400 * 7 {
        response.append_packet(&NotificationS2c {
            message: format!(
                "Your {role_name} tag will expire in {:0>8}",
                format_duration(user.donor_expire - now)
            ),
        })?;
    }

    Ok(())
}

/// Renders a duration the way the freeze and donor countdowns expect:
/// `H:MM:SS`, with a leading `N day(s),` part past 24 hours.
fn format_duration(seconds: i64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;

    match days {
        0 => format!("{hours}:{minutes:02}:{secs:02}"),
        1 => format!("1 day, {hours}:{minutes:02}:{secs:02}"),
        _ => format!("{days} days, {hours}:{minutes:02}:{secs:02}"),
    }
}
