use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use bancho::config::Config;
use bancho::db::{MemoryDatabase, SeedChannel};
use bancho::geo::StaticResolver;
use bancho::kv::MemoryKv;
use bancho::users::{Privileges, User, BOT_USER_ID};
use bancho::{http, SharedState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level())
        .init();

    info!("starting bancho");

    // Single-node wiring: in-process stores. Deployments with external
    // MySQL/Redis swap these Arcs for real backends.
    let db = Arc::new(seeded_database());
    let kv = Arc::new(MemoryKv::new());
    let geo = Arc::new(StaticResolver::new());

    let state = SharedState::new(config, db, kv, geo);
    state.bootstrap().await?;

    let addr = state.config().bind_address;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!("listening on {addr}");

    axum::serve(
        listener,
        http::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// The minimum persistent state the server refuses to start without: the
/// bot account and the default channel catalog.
fn seeded_database() -> MemoryDatabase {
    let db = MemoryDatabase::new();

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

    for (name, description) in [
        ("#osu", "Main discussion"),
        ("#announce", "Announcements"),
        ("#lobby", "Multiplayer lobby"),
    ] {
        db.add_seed_channel(SeedChannel {
            name: name.to_owned(),
            description: description.to_owned(),
            public_read: true,
            public_write: true,
            instance: false,
        });
    }

    db
}
