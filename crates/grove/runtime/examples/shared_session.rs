//! # Shared Session Example
//!
//! Two Grove instances collaborating over one directory, the way two
//! machines would over a network mount:
//! - presence heartbeats and the live roster
//! - room events appended by one side, monitored by the other
//! - shared memory both sides can search
//! - an approval-gated action recorded on the audit ledger
//!
//! Run with: `cargo run --example shared_session`

use std::time::Duration;

use grove_runtime::{Grove, GroveConfig, HeartbeatProfile, NewAction, NewMemory, TailerConfig};
use grove_types::{
    ActionDecision, ActionStatus, Event, EventKind, MemoryScope, PresenceId, RoomName,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("🌳 Grove - Shared Session Example\n");

    let deployment = tempfile::tempdir()?;
    println!("📁 Deployment root: {}\n", deployment.path().display());

    // Two instances with separate local trees, one shared root.
    let ada = connect(deployment.path(), "ada")?;
    let bob = connect(deployment.path(), "bob")?;
    println!(
        "✅ Connected: ada ({}), bob ({})\n",
        ada.client_id(),
        bob.client_id()
    );

    let general = RoomName::parse("general")?;

    // Presence: both sides announce themselves.
    let ada_beat = ada.spawn_heartbeat(HeartbeatProfile::new(general.clone(), "Ada"));
    let bob_beat = bob.spawn_heartbeat(HeartbeatProfile::new(general.clone(), "Bob"));
    tokio::time::sleep(Duration::from_millis(300)).await;

    println!("👥 Roster of #general:");
    for (identity, snapshot) in ada.presence(&general).list_live().await? {
        println!("   {} ({}, {})", snapshot.name, identity, snapshot.color);
    }
    println!();

    // Bob follows the room from its current end; Ada speaks.
    let bob_log = bob.room_log(&general);
    let mut monitor = bob_log.monitor(bob_log.end_cursor()?, bob.shutdown_signal());

    ada.room_log(&general)
        .append(&Event::new(
            EventKind::Chat,
            "Ada",
            "shipping the release today",
        ))
        .await?;

    if let Some(batch) = monitor.next_batch().await {
        for event in batch {
            println!("💬 [{}] {}: {}", event.ts, event.author, event.text);
        }
    }
    println!();

    // A shared memory Bob can find.
    ada.memory()
        .add(
            MemoryScope::Global,
            NewMemory::new("Ada", "release tag is v2.4.0"),
        )
        .await?;
    println!("🧠 Bob searches shared memory for \"release\":");
    for entry in bob.memory().search(&[MemoryScope::Global], "release")? {
        println!("   [{}] {}", entry.id, entry.summary);
    }
    println!();

    // An action proposed by Bob, approved by Ada, executed to completion.
    let actions = bob.actions();
    let request = actions
        .create(NewAction::new("Bob", "shell", "tag the release"))
        .await?;
    println!(
        "🔒 Action {} proposed, pending: {:?}",
        request.action_id,
        actions.list_pending().await?
    );
    actions
        .decide(&request.action_id, ActionDecision::Approved, "Ada")
        .await?;
    actions
        .update_status(&request.action_id, ActionStatus::Running, None, "Bob")
        .await?;
    actions
        .update_status(
            &request.action_id,
            ActionStatus::Completed,
            Some(serde_json::json!({ "exit_code": 0 })),
            "Bob",
        )
        .await?;
    let state = actions
        .get(&request.action_id)
        .await?
        .ok_or("action vanished from the ledger")?;
    println!("   Final status: {:?}, result: {:?}", state.status, state.result);
    println!();

    // Shutdown: heartbeats remove their presence files, monitors stop.
    ada.shutdown();
    bob.shutdown();
    ada_beat.stopped().await;
    bob_beat.stopped().await;
    monitor.finish().await;
    println!(
        "👋 Roster after shutdown: {} live",
        ada.presence(&general).list_live().await?.len()
    );

    println!("\n🎉 Example completed");
    Ok(())
}

fn connect(root: &std::path::Path, who: &str) -> Result<Grove, Box<dyn std::error::Error>> {
    let mut config = GroveConfig::new(
        root.join("share"),
        root.join(format!("{who}-local")),
        PresenceId::parse(who)?,
    );
    config.heartbeat_interval = Duration::from_millis(100);
    config.tailer = TailerConfig {
        min_interval: Duration::from_millis(20),
        active_interval: Duration::from_millis(40),
        max_interval: Duration::from_millis(200),
        ..TailerConfig::default()
    };
    Ok(Grove::init(config)?)
}
