//! changa-watch - follow live campaign updates from the terminal
//!
//! Usage: `changa-watch <campaign-id>...`
//!
//! Signs in with `CHANGA_EMAIL`/`CHANGA_PASSWORD` when no stored session
//! exists, subscribes to each campaign and logs its funding total and comment
//! count whenever a live event updates them. Totals start at zero until the
//! first event for a campaign arrives.

use std::sync::Arc;

use anyhow::{bail, Context};
use changa_client::{
    CampaignState, CampaignStore, ClientConfig, EventDispatcher, FileStore, KeyValueStore,
    MemoryStore, RealtimeChannel, SessionClient, SessionEvent, TokenStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("changa_client=debug,changa_watch=info")),
        )
        .init();

    let campaign_ids: Vec<String> = std::env::args().skip(1).collect();
    if campaign_ids.is_empty() {
        bail!("usage: changa-watch <campaign-id>...");
    }

    let config = ClientConfig::from_env();
    let storage: Arc<dyn KeyValueStore> = match config
        .storage_dir
        .clone()
        .map(FileStore::new)
        .or_else(FileStore::in_config_dir)
    {
        Some(store) => {
            tracing::debug!(dir = %store.dir().display(), "using file storage");
            Arc::new(store)
        }
        None => {
            tracing::warn!("no config directory, session will not persist");
            Arc::new(MemoryStore::new())
        }
    };
    let tokens = Arc::new(TokenStore::load(storage));

    let client = SessionClient::new(config.clone(), tokens.clone())
        .context("failed to build HTTP client")?;

    if !tokens.is_authenticated() {
        let (Ok(email), Ok(password)) =
            (std::env::var("CHANGA_EMAIL"), std::env::var("CHANGA_PASSWORD"))
        else {
            bail!("no stored session; set CHANGA_EMAIL and CHANGA_PASSWORD to sign in");
        };
        let user = client
            .login(&email, &password)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message()))
            .context("sign in failed")?;
        tracing::info!(user_id = %user.id, name = %user.name, "signed in");
    }

    let mut session_events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = session_events.recv().await {
            match event {
                SessionEvent::Unauthenticated => {
                    tracing::warn!("session expired, sign in again to keep receiving updates")
                }
                other => tracing::debug!(?other, "session event"),
            }
        }
    });

    let (channel, events) = RealtimeChannel::from_config(&config, tokens.clone());
    let store = CampaignStore::new();
    for campaign_id in &campaign_ids {
        store.open(CampaignState::new(campaign_id.as_str(), 0.0));
        channel
            .subscribe(campaign_id)
            .with_context(|| format!("subscribe to campaign {campaign_id}"))?;
    }
    channel.connect();

    let dispatcher = EventDispatcher::new(tokens);
    let watcher = tokio::spawn({
        let store = store.clone();
        async move { dispatcher.run(events, store).await }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    channel.teardown();
    channel.join().await;
    drop(channel);
    let _ = watcher.await;

    for campaign_id in &campaign_ids {
        if let Some(state) = store.get(campaign_id) {
            tracing::info!(
                campaign_id = %campaign_id,
                current_funding = state.current_funding(),
                comments = state.comments_count(),
                "final state"
            );
        }
    }
    Ok(())
}
