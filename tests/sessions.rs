//! Session messaging and the restriction notice on fresh logins.

mod common;

use bancho::login::handle_login;
use bancho::session::{self, NewSession};
use bancho::users::Privileges;
use bancho_protocol::packets::{NotificationS2c, SendMessageS2c};
use bancho_protocol::{Decode, Packet};
use common::*;
use uuid::Uuid;

fn decode<P: for<'a> Decode<'a>>(frame: &bancho_protocol::PacketFrame) -> P {
    let mut r = &frame.body[..];
    P::decode(&mut r).expect("well-formed payload")
}

#[tokio::test]
async fn notifications_and_bot_messages_reach_the_queue() {
    let server = server().await;
    server.db.insert_user(player(1000, "alice"));

    let token = session::create(
        &server.state,
        NewSession {
            user_id: 1000,
            username: "alice".to_owned(),
            privileges: Privileges::USER_PUBLIC | Privileges::USER_NORMAL,
            whitelist: 0,
            silence_end_time: 0,
            ip: String::new(),
            utc_offset: 0,
            tournament: false,
            block_non_friends_dm: false,
        },
    )
    .await
    .unwrap();

    session::enqueue_notification(&server.state, &token.token_id, "heads up").unwrap();
    session::enqueue_bot_message(&server.state, &token.token_id, "hello from Aika").unwrap();

    let frames = decode_frames(&server.state.sessions().dequeue(&token.token_id).unwrap());
    assert_eq!(frames.len(), 2);

    assert_eq!(frames[0].id, NotificationS2c::ID);
    assert_eq!(decode::<NotificationS2c>(&frames[0]).message, "heads up");

    assert_eq!(frames[1].id, SendMessageS2c::ID);
    let message: SendMessageS2c = decode(&frames[1]);
    assert_eq!(message.sender, "Aika");
    assert_eq!(message.sender_id, 999);
    assert_eq!(message.recipient, "alice");
    assert_eq!(message.message, "hello from Aika");
}

#[tokio::test]
async fn messages_from_vanished_senders_are_dropped() {
    let server = server().await;
    server.db.insert_user(player(1000, "alice"));

    let token = session::create(
        &server.state,
        NewSession {
            user_id: 1000,
            username: "alice".to_owned(),
            privileges: Privileges::USER_PUBLIC | Privileges::USER_NORMAL,
            whitelist: 0,
            silence_end_time: 0,
            ip: String::new(),
            utc_offset: 0,
            tournament: false,
            block_non_friends_dm: false,
        },
    )
    .await
    .unwrap();

    session::enqueue_message(&server.state, &token.token_id, "ghost mail", &Uuid::new_v4())
        .unwrap();

    assert_eq!(server.state.sessions().dequeue(&token.token_id).unwrap().len(), 0);
}

#[tokio::test]
async fn restricted_accounts_are_told_so_at_login() {
    let server = server().await;

    let mut restricted = player(1000, "alice");
    restricted.privileges = Privileges::USER_NORMAL;
    server.db.insert_user(restricted);

    let response = handle_login(
        &server.state,
        &login_payload("alice", PASSWORD_MD5, &version_days_ago(10, "")),
        "127.0.0.1".to_owned(),
    )
    .await
    .unwrap();
    assert_ne!(response.cho_token, "no");

    let token_id = Uuid::parse_str(&response.cho_token).unwrap();
    let queued = decode_frames(&server.state.sessions().dequeue(&token_id).unwrap());

    let notice = queued
        .iter()
        .find(|f| f.id == SendMessageS2c::ID)
        .map(decode::<SendMessageS2c>)
        .expect("restriction notice");
    assert_eq!(notice.sender, "Aika");
    assert!(notice.message.contains("restricted mode"));
}
