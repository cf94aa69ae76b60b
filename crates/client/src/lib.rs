//! Changa client - session and realtime layer
//!
//! This crate holds the authenticated HTTP session, the realtime campaign
//! channel and the optimistic view state those two keep in sync.

pub mod config;
pub mod dispatcher;
pub mod session_client;
pub mod state;
pub mod storage;
pub mod stores;
pub mod token_store;
pub mod ws;

pub use config::ClientConfig;
pub use dispatcher::{Dispatch, EventDispatcher};
pub use session_client::{ApiResponse, RequestSpec, SessionClient, SessionEvent};
pub use state::{CampaignState, ReconciliationTarget};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use stores::CampaignStore;
pub use token_store::TokenStore;
pub use ws::{ChannelError, ChannelEvent, ChannelEvents, ChannelState, RealtimeChannel};

pub use changa_shared::ApiError;
