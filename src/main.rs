use anyhow::Context;
use chatcall::application::call::{CallHistoryService, CallService, SessionStatus};
use chatcall::config::Config;
use chatcall::domain::call::{CallType, IncomingCallEvent};
use chatcall::domain::media::PeerConnectionState;
use chatcall::domain::shared::value_objects::{ChatId, UserId};
use chatcall::domain::signaling::{DocumentPath, Fields, SignalingStore};
use chatcall::infrastructure::call_metrics;
use chatcall::infrastructure::history::MemoryCallHistoryLog;
use chatcall::infrastructure::media::LoopbackMediaEngine;
use chatcall::infrastructure::signaling::InMemorySignalingStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting chatcall demo");
    call_metrics::describe_metrics();

    demo_call_lifecycle(&config).await?;

    info!("chatcall demo finished");
    Ok(())
}

/// u1 calls u2 in chat c1 over the loopback engine, u2 answers, u1 hangs up
async fn demo_call_lifecycle(config: &Config) -> anyhow::Result<()> {
    info!("=== Call Lifecycle Demo ===");

    let store = InMemorySignalingStore::new();
    let history = Arc::new(MemoryCallHistoryLog::default());
    let chat_id = ChatId::new("c1");
    let alice = UserId::new("u1");
    let bob = UserId::new("u2");

    store
        .write(
            &DocumentPath::chat(&chat_id),
            Fields::new().set("participants", json!([alice.as_str(), bob.as_str()])),
            false,
        )
        .await?;

    // Each participant is its own client
    let alice_client = CallService::new(
        Arc::new(store.clone()),
        Arc::new(LoopbackMediaEngine::new()),
        history.clone(),
        config,
    );
    let bob_client = CallService::new(
        Arc::new(store.clone()),
        Arc::new(LoopbackMediaEngine::new()),
        history.clone(),
        config,
    );

    let mut watcher = bob_client.open_chat(&chat_id, &bob).await?;

    let mut caller = alice_client
        .start_call(&chat_id, &alice, &bob, CallType::Audio)
        .await?;
    info!("Call placed: {} -> {}", alice, bob);

    match tokio::time::timeout(Duration::from_secs(5), watcher.next()).await {
        Ok(Some(IncomingCallEvent::Incoming { caller_uid, call_type })) => {
            info!("{} sees an incoming {} call from {}", bob, call_type.as_str(), caller_uid)
        }
        other => anyhow::bail!("expected an incoming call, got {:?}", other),
    }

    let mut callee = bob_client.answer_call(&chat_id, &bob).await?;

    let connected = |status: &SessionStatus| {
        status.connection == PeerConnectionState::Connected && status.remote_stream.is_some()
    };
    for (who, handle) in [("caller", &mut caller), ("callee", &mut callee)] {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_for(connected))
            .await
            .with_context(|| format!("{} never connected", who))??;
        info!("{} connected, phase {:?}", who, handle.phase());
    }

    tokio::time::sleep(Duration::from_millis(200)).await;

    caller.hangup().await?;
    let reason = callee.terminated().await;
    info!("Call ended, callee saw {:?}", reason);

    let history = CallHistoryService::new(history);
    for entry in history.chat_history(&chat_id, 10).await? {
        info!(
            "History: {} -> {} {} {} duration {:?}s",
            entry.caller_uid,
            entry.callee_uid,
            entry.call_type.as_str(),
            entry.status.as_str(),
            entry.duration
        );
    }

    info!("=== Call Lifecycle Demo Complete ===");
    Ok(())
}
