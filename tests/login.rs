//! End-to-end login scenarios against the in-process server.

mod common;

use bancho::login::handle_login;
use bancho::stats::{leaderboard_key, Gameplay, Mode};
use bancho::unix_now;
use bancho::users::Privileges;
use bancho_protocol::packets::{
    AccountIdS2c, ChannelInfoS2c, ChannelJoinSuccessS2c, NotificationS2c, PrivilegesS2c,
    SendMessageS2c, SilenceEndS2c, UserPresenceS2c,
};
use bancho_protocol::{Decode, Packet};
use common::*;
use pretty_assertions::assert_eq;
use uuid::Uuid;

const ALICE: i32 = 1000;

fn decode<P: for<'a> Decode<'a>>(frame: &bancho_protocol::PacketFrame) -> P {
    let mut r = &frame.body[..];
    P::decode(&mut r).expect("well-formed payload")
}

async fn login(
    server: &TestServer,
    username: &str,
    password_md5: &str,
    version: &str,
) -> bancho::http::BanchoResponse {
    handle_login(
        &server.state,
        &login_payload(username, password_md5, version),
        "127.0.0.1".to_owned(),
    )
    .await
    .expect("login request")
}

#[tokio::test]
async fn happy_path_login_emits_the_contractual_sequence() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));
    server.db.set_friends(ALICE, vec![2, 3]);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    // A fresh token.
    let token_id = Uuid::parse_str(&response.cho_token).expect("token is a uuid");

    let frames = decode_frames(&response.body);
    let ids: Vec<u16> = frames.iter().map(|f| f.id).collect();

    assert_eq!(
        ids,
        vec![
            bancho_protocol::packets::ProtocolVersionS2c::ID,
            AccountIdS2c::ID,
            SilenceEndS2c::ID,
            PrivilegesS2c::ID,
            UserPresenceS2c::ID,
            bancho_protocol::packets::UserStatsS2c::ID,
            ChannelInfoS2c::ID,
            ChannelInfoS2c::ID,
            bancho_protocol::packets::ChannelInfoEndS2c::ID,
            bancho_protocol::packets::FriendsListS2c::ID,
            // The other online players: just the bot on a fresh server.
            UserPresenceS2c::ID,
        ]
    );

    assert_eq!(decode::<AccountIdS2c>(&frames[1]).user_id, ALICE);
    assert_eq!(decode::<SilenceEndS2c>(&frames[2]).remaining_seconds, 0);
    assert_eq!(decode::<PrivilegesS2c>(&frames[3]).privileges, 5);

    let presence: UserPresenceS2c = decode(&frames[4]);
    assert_eq!(presence.user_id, ALICE);
    assert_eq!(presence.username, "alice");

    // Channel listing is stable by name: #announce, then #osu, both
    // counting the bot plus the fresh session.
    let announce: ChannelInfoS2c = decode(&frames[6]);
    assert_eq!(announce.channel, "#announce");
    assert_eq!(announce.user_count, 2);
    let osu: ChannelInfoS2c = decode(&frames[7]);
    assert_eq!(osu.channel, "#osu");
    assert_eq!(osu.user_count, 2);

    assert_eq!(
        decode::<bancho_protocol::packets::FriendsListS2c>(&frames[9]).friends,
        vec![2, 3]
    );
    assert_eq!(decode::<UserPresenceS2c>(&frames[10]).user_id, 999);

    // The auto-join confirmations and our own presence broadcast land in
    // the outbound queue, to be drained on the next poll.
    let queued = server.state.sessions().dequeue(&token_id).unwrap();
    let queued_frames = decode_frames(&queued);
    assert_eq!(
        queued_frames.iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![
            ChannelJoinSuccessS2c::ID,
            ChannelJoinSuccessS2c::ID,
            UserPresenceS2c::ID,
        ]
    );
    assert_eq!(decode::<ChannelJoinSuccessS2c>(&queued_frames[0]).channel, "#osu");
    assert_eq!(
        decode::<ChannelJoinSuccessS2c>(&queued_frames[1]).channel,
        "#announce"
    );

    // The ip sighting was counted.
    assert_eq!(server.db.ip_occurrences(ALICE, "127.0.0.1"), 1);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(
        &server,
        "alice",
        &"0".repeat(32),
        &version_days_ago(10, ""),
    )
    .await;

    assert_eq!(response.cho_token, "no");

    let frames = decode_frames(&response.body);
    assert_eq!(decode::<AccountIdS2c>(&frames[0]).user_id, -1);
    assert!(decode::<NotificationS2c>(&frames[1])
        .message
        .contains("invalid username or password"));

    assert!(server.state.sessions().fetch_by_user(ALICE).is_empty());
}

#[tokio::test]
async fn unknown_username_is_rejected() {
    let server = server().await;

    let response = login(&server, "nobody", PASSWORD_MD5, &version_days_ago(10, "")).await;

    assert_eq!(response.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&response.body)[1])
        .message
        .contains("invalid username or password"));
}

#[tokio::test]
async fn duplicate_login_is_rejected_and_leaves_one_session() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));

    let first = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(first.cho_token, "no");

    let second = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_eq!(second.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&second.body)[1])
        .message
        .contains("already logged in somewhere else"));

    assert_eq!(server.state.sessions().fetch_by_user(ALICE).len(), 1);
}

#[tokio::test]
async fn tournament_clients_may_hold_two_sessions() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));

    let first = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(first.cho_token, "no");

    let second = login(
        &server,
        "alice",
        PASSWORD_MD5,
        &version_days_ago(10, "tourney"),
    )
    .await;
    assert_ne!(second.cho_token, "no");

    let sessions = server.state.sessions().fetch_by_user(ALICE);
    assert_eq!(sessions.len(), 2);

    let second_token = Uuid::parse_str(&second.cho_token).unwrap();
    let second_session = server.state.sessions().fetch(&second_token).unwrap();
    assert!(second_session.tournament);
}

#[tokio::test]
async fn elapsed_freeze_restricts_on_login() {
    let server = server().await;

    let mut frozen = player(ALICE, "alice");
    frozen.frozen = unix_now() - 10;
    server.db.insert_user(frozen);
    server.db.set_country(ALICE, "US");

    // Ranked on the global and country boards beforehand.
    let key = leaderboard_key(Gameplay::Vanilla, Mode::Std);
    server.kv.zadd(&key, "1000", 12_345.0);
    server.kv.zadd(&format!("{key}:us"), "1000", 12_345.0);

    let mut bans = server.kv.subscribe("peppy:ban");

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");

    // The stored account and the session snapshot both lost USER_PUBLIC.
    let user = server.db.user(ALICE).unwrap();
    assert!(user.privileges.is_restricted());
    assert_eq!(user.frozen, 0);

    let token_id = Uuid::parse_str(&response.cho_token).unwrap();
    assert!(server
        .state
        .sessions()
        .fetch(&token_id)
        .unwrap()
        .privileges
        .is_restricted());

    // The body leads with the auto-restriction notice, and the privilege
    // bits drop the unrestricted flag.
    let frames = decode_frames(&response.body);
    assert_eq!(frames[0].id, NotificationS2c::ID);
    assert!(decode::<NotificationS2c>(&frames[0])
        .message
        .contains("automatically restricted"));

    let privileges = frames
        .iter()
        .find(|f| f.id == PrivilegesS2c::ID)
        .map(decode::<PrivilegesS2c>)
        .unwrap();
    assert_eq!(privileges.privileges, 1);

    // Leaderboards emptied, restriction announced, audit line written.
    assert!(server.kv.zset_members(&key).is_empty());
    assert!(server.kv.zset_members(&format!("{key}:us")).is_empty());
    assert_eq!(bans.recv().await.unwrap(), "1000");
    assert!(server
        .db
        .rap_logs()
        .iter()
        .any(|log| log.user_id == ALICE && log.message.contains("pending freeze")));
}

#[tokio::test]
async fn maintenance_mode_rejects_non_staff_and_tears_the_session_down() {
    let config = bancho::config::Config {
        maintenance_mode: true,
        ..bancho::config::Config::default()
    };
    let server = server_with_config(config).await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    assert_eq!(response.cho_token, "no");

    let frames = decode_frames(&response.body);
    assert_eq!(decode::<AccountIdS2c>(&frames[0]).user_id, -1);
    assert!(decode::<NotificationS2c>(&frames[1])
        .message
        .contains("maintenance mode"));

    // No session survives; only the bot subscribes to the presence stream.
    assert!(server.state.sessions().fetch_by_user(ALICE).is_empty());
    assert_eq!(server.state.streams().count("main"), 1);
}

#[tokio::test]
async fn maintenance_mode_admits_staff_with_a_notice() {
    let config = bancho::config::Config {
        maintenance_mode: true,
        ..bancho::config::Config::default()
    };
    let server = server_with_config(config).await;

    let mut staff = player(ALICE, "alice");
    staff.privileges = staff.privileges | Privileges::ADMIN_CHAT_MOD;
    server.db.insert_user(staff);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");

    let frames = decode_frames(&response.body);
    assert_eq!(frames[0].id, NotificationS2c::ID);
    assert!(decode::<NotificationS2c>(&frames[0])
        .message
        .contains("maintenance mode"));
}

#[tokio::test]
async fn banned_and_locked_accounts_are_turned_away() {
    let server = server().await;

    let mut banned = player(ALICE, "alice");
    banned.privileges = Privileges(0);
    server.db.insert_user(banned);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_eq!(response.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&response.body)[1])
        .message
        .contains("banned"));

    let mut locked = player(1001, "bob");
    locked.privileges = Privileges::USER_PUBLIC;
    server.db.insert_user(locked);

    let response = login(&server, "bob", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_eq!(response.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&response.body)[1])
        .message
        .contains("locked"));
}

#[tokio::test]
async fn pending_verification_bypasses_the_status_gates() {
    let server = server().await;

    let mut pending = player(ALICE, "alice");
    pending.privileges = Privileges::USER_PENDING_VERIFICATION;
    server.db.insert_user(pending);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");
}

#[tokio::test]
async fn client_age_boundary_is_exactly_365_days() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(365, "")).await;
    assert_eq!(response.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&response.body)[1])
        .message
        .contains("out of date"));

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(364, "")).await;
    assert_ne!(response.cho_token, "no");
}

#[tokio::test]
async fn malformed_version_is_rejected() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(&server, "alice", PASSWORD_MD5, "20230101").await;
    assert_eq!(response.cho_token, "no");
    assert!(decode::<NotificationS2c>(&decode_frames(&response.body)[1])
        .message
        .contains("Something went wrong"));
}

#[tokio::test]
async fn past_silence_reads_as_zero_remaining() {
    let server = server().await;

    let mut silenced = player(ALICE, "alice");
    silenced.silence_end = unix_now() - 100;
    server.db.insert_user(silenced);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    let silence = decode_frames(&response.body)
        .into_iter()
        .find(|f| f.id == SilenceEndS2c::ID)
        .unwrap();
    assert_eq!(decode::<SilenceEndS2c>(&silence).remaining_seconds, 0);
}

#[tokio::test]
async fn donor_expiring_exactly_now_is_revoked() {
    let server = server().await;

    let mut donor = player(ALICE, "alice");
    donor.privileges = donor.privileges | Privileges::USER_DONOR;
    donor.donor_expire = unix_now();
    server.db.insert_user(donor);
    server.db.add_badge(ALICE, 36);
    server.db.add_badge(ALICE, 59);
    server.db.set_custom_badge_flags(ALICE, true, true);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");

    let frames = decode_frames(&response.body);
    assert!(decode::<NotificationS2c>(&frames[0])
        .message
        .contains("supporter tag has expired"));

    let user = server.db.user(ALICE).unwrap();
    assert!(!user.privileges.intersects(Privileges::USER_DONOR));
    assert!(server.db.badges(ALICE).is_empty());
    assert_eq!(server.db.custom_badge_flags(ALICE), (false, false));
    assert!(server
        .db
        .rap_logs()
        .iter()
        .any(|log| log.message.contains("supporter subscription expired")));
}

#[tokio::test]
async fn donor_with_a_week_left_sees_a_countdown() {
    let server = server().await;

    let mut donor = player(ALICE, "alice");
    donor.privileges = donor.privileges | Privileges::USER_DONOR;
    donor.donor_expire = unix_now() + 3_600;
    server.db.insert_user(donor);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    let frames = decode_frames(&response.body);
    let notice: NotificationS2c = decode(&frames[0]);
    assert!(notice.message.contains("supporter tag will expire in"));

    // Still a donor.
    assert!(server
        .db
        .user(ALICE)
        .unwrap()
        .privileges
        .intersects(Privileges::USER_DONOR));
}

#[tokio::test]
async fn requested_freeze_arms_the_seven_day_timer() {
    let server = server().await;

    let mut frozen = player(ALICE, "alice");
    frozen.frozen = 1;
    frozen.freeze_reason = Some("multiaccounting".to_owned());
    server.db.insert_user(frozen);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");

    // The deadline landed a week out and the user is warned, not
    // restricted.
    let user = server.db.user(ALICE).unwrap();
    assert!(close_to(user.frozen, unix_now() + 7 * 86_400));
    assert!(!user.privileges.is_restricted());

    let frames = decode_frames(&response.body);
    assert_eq!(frames[0].id, SendMessageS2c::ID);

    let warning: SendMessageS2c = decode(&frames[0]);
    assert_eq!(warning.sender, "Aika");
    assert_eq!(warning.recipient, "alice");
    assert!(warning.message.contains("frozen by an administrator"));
    assert!(warning.message.contains("multiaccounting"));
    assert!(warning.message.contains("Time until account restriction"));
}

#[tokio::test]
async fn live_freeze_timer_warns_without_restricting() {
    let server = server().await;

    let mut frozen = player(ALICE, "alice");
    frozen.frozen = unix_now() + 1_000;
    server.db.insert_user(frozen);

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    assert_ne!(response.cho_token, "no");

    assert_eq!(decode_frames(&response.body)[0].id, SendMessageS2c::ID);
    assert!(!server.db.user(ALICE).unwrap().privileges.is_restricted());
}

#[tokio::test]
async fn login_notification_setting_prepends_a_notice() {
    let config = bancho::config::Config {
        login_notification: Some("Welcome back!".to_owned()),
        ..bancho::config::Config::default()
    };
    let server = server_with_config(config).await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    let frames = decode_frames(&response.body);
    assert_eq!(decode::<NotificationS2c>(&frames[0]).message, "Welcome back!");
}

#[tokio::test]
async fn configured_menu_icon_is_advertised() {
    let config = bancho::config::Config {
        menu_icon_url: Some("https://example.com/icon.png".to_owned()),
        menu_onclick_url: Some("https://example.com".to_owned()),
        ..bancho::config::Config::default()
    };
    let server = server_with_config(config).await;
    server.db.insert_user(player(ALICE, "alice"));

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    assert!(frame_ids(&response.body)
        .contains(&bancho_protocol::packets::MainMenuIconS2c::ID));
}

#[tokio::test]
async fn a_second_player_sees_and_is_seen_by_the_first() {
    let server = server().await;
    server.db.insert_user(player(ALICE, "alice"));
    server.db.insert_user(player(1001, "bob"));

    let alice = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;
    let alice_token = Uuid::parse_str(&alice.cho_token).unwrap();

    // Drop alice's login-time queue so only bob's broadcast remains after.
    server.state.sessions().dequeue(&alice_token).unwrap();

    let bob = login(&server, "bob", PASSWORD_MD5, &version_days_ago(10, "")).await;

    // Bob's response carries presence for the already-online players.
    let presences: Vec<UserPresenceS2c> = decode_frames(&bob.body)
        .iter()
        .filter(|f| f.id == UserPresenceS2c::ID)
        .map(decode::<UserPresenceS2c>)
        .collect();
    assert!(presences.iter().any(|p| p.user_id == ALICE));

    // And alice was told about bob through the presence stream.
    let queued = server.state.sessions().dequeue(&alice_token).unwrap();
    let announced: Vec<UserPresenceS2c> = decode_frames(&queued)
        .iter()
        .filter(|f| f.id == UserPresenceS2c::ID)
        .map(decode::<UserPresenceS2c>)
        .collect();
    assert!(announced.iter().any(|p| p.user_id == 1001));
}

#[tokio::test]
async fn donors_use_their_website_flag() {
    let server = server().await;

    let mut donor = player(ALICE, "alice");
    donor.privileges = donor.privileges | Privileges::USER_DONOR;
    donor.donor_expire = unix_now() + 365 * 86_400;
    server.db.insert_user(donor);
    server.db.set_country(ALICE, "US");

    let response = login(&server, "alice", PASSWORD_MD5, &version_days_ago(10, "")).await;

    let presence = decode_frames(&response.body)
        .into_iter()
        .find(|f| f.id == UserPresenceS2c::ID)
        .map(|f| decode::<UserPresenceS2c>(&f))
        .unwrap();

    assert_eq!(presence.country, 225);
    assert_eq!(presence.latitude, 0.0);
    assert_eq!(presence.longitude, 0.0);
}
