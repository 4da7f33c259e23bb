//! Shared scenario plumbing: an in-process server over the memory-backed
//! stores, plus helpers for seeding accounts and crafting login payloads.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::sync::Arc;

use bancho::config::Config;
use bancho::db::{Database, MemoryDatabase, SeedChannel};
use bancho::geo::StaticResolver;
use bancho::kv::{KeyValue, MemoryKv};
use bancho::users::{Privileges, User, BOT_USER_ID};
use bancho::SharedState;
use bancho_protocol::{PacketDecoder, PacketFrame};
use time::{Duration, OffsetDateTime};

/// The md5 of `"password"`.
pub const PASSWORD_MD5: &str = "5f4dcc3b5aa765d61d8327deb882cf99";

pub struct TestServer {
    pub state: SharedState,
    pub db: Arc<MemoryDatabase>,
    pub kv: Arc<MemoryKv>,
    pub geo: Arc<StaticResolver>,
}

/// Boots a server over fresh in-memory stores: bot account, bot session,
/// and the `#osu`/`#announce` catalog.
pub async fn server() -> TestServer {
    server_with_config(Config::default()).await
}

pub async fn server_with_config(config: Config) -> TestServer {
    let db = Arc::new(MemoryDatabase::new());

    db.insert_user(User {
        id: BOT_USER_ID,
        username: "Aika".to_owned(),
        username_safe: "aika".to_owned(),
        password_bcrypt: String::new(),
        privileges: Privileges::USER_PUBLIC | Privileges::USER_NORMAL,
        whitelist: 0,
        silence_end: 0,
        donor_expire: 0,
        frozen: 0,
        freeze_reason: None,
        notes: None,
    });

    for (name, description) in [("#osu", "Main discussion"), ("#announce", "Announcements")] {
        db.add_seed_channel(SeedChannel {
            name: name.to_owned(),
            description: description.to_owned(),
            public_read: true,
            public_write: true,
            instance: false,
        });
    }

    let kv = Arc::new(MemoryKv::new());
    let geo = Arc::new(StaticResolver::new());

    let state = SharedState::new(
        config,
        Arc::clone(&db) as Arc<dyn Database>,
        Arc::clone(&kv) as Arc<dyn KeyValue>,
        Arc::clone(&geo) as Arc<dyn bancho::geo::GeoResolver>,
    );

    state.bootstrap().await.expect("bootstrap");

    TestServer { state, db, kv, geo }
}

/// A plain unrestricted account whose password is [`PASSWORD_MD5`]'s
/// cleartext.
pub fn player(id: i32, username: &str) -> User {
    User {
        id,
        username: username.to_owned(),
        username_safe: username.to_lowercase(),
        password_bcrypt: bcrypt::hash(PASSWORD_MD5, 4).expect("bcrypt hash"),
        privileges: Privileges::USER_PUBLIC | Privileges::USER_NORMAL,
        whitelist: 0,
        silence_end: 0,
        donor_expire: 0,
        frozen: 0,
        freeze_reason: None,
        notes: None,
    }
}

/// A login body for the given credentials and client version.
pub fn login_payload(username: &str, password_md5: &str, osu_version: &str) -> Vec<u8> {
    format!("{username}\n{password_md5}\n{osu_version}|0|0|h1:a:h2:h3:h4:|0\n").into_bytes()
}

/// A `b<yyyymmdd>` version string dated the given number of days before
/// today, with an optional release stream suffix.
pub fn version_days_ago(days: i64, stream: &str) -> String {
    let date = (OffsetDateTime::now_utc() - Duration::days(days)).date();

    format!(
        "b{:04}{:02}{:02}{stream}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Splits a response body into its packet frames.
pub fn decode_frames(body: &[u8]) -> Vec<PacketFrame> {
    let mut decoder = PacketDecoder::new();
    decoder.queue_slice(body);

    let mut frames = vec![];
    while let Some(frame) = decoder.try_next_packet().expect("well-formed frames") {
        frames.push(frame);
    }
    frames
}

/// The ids of every frame in a response body, in order.
pub fn frame_ids(body: &[u8]) -> Vec<u16> {
    decode_frames(body).iter().map(|frame| frame.id).collect()
}

/// Shorthand for "roughly then", tolerating a slow test runner.
pub fn close_to(value: i64, expected: i64) -> bool {
    (value - expected).abs() <= 5
}
