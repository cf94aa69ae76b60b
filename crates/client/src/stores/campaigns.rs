//! Store of open campaign views, keyed by campaign id.
//!
//! Views read from here; the dispatcher writes authoritative events into it
//! and the view itself writes optimistic mutations through [`CampaignStore::update`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use changa_shared::InboundEvent;

use crate::dispatcher::{Dispatch, EventDispatcher};
use crate::state::{CampaignState, ReconciliationTarget};

#[derive(Debug, Clone, Default)]
pub struct CampaignStore {
    views: Arc<RwLock<HashMap<String, CampaignState>>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a campaign view, replacing any previous state for it.
    pub fn open(&self, state: CampaignState) {
        let id = state.campaign_id().to_string();
        self.write().insert(id, state);
    }

    pub fn close(&self, campaign_id: &str) -> Option<CampaignState> {
        self.write().remove(campaign_id)
    }

    /// Snapshot of a campaign view.
    pub fn get(&self, campaign_id: &str) -> Option<CampaignState> {
        self.read().get(campaign_id).cloned()
    }

    pub fn is_open(&self, campaign_id: &str) -> bool {
        self.read().contains_key(campaign_id)
    }

    /// Apply a local (optimistic) mutation to an open view.
    pub fn update<R>(
        &self,
        campaign_id: &str,
        f: impl FnOnce(&mut CampaignState) -> R,
    ) -> Option<R> {
        self.write().get_mut(campaign_id).map(f)
    }

    /// Route an inbound event to the view it belongs to.
    pub fn apply(&self, dispatcher: &EventDispatcher, event: &InboundEvent) -> Dispatch {
        let mut views = self.write();
        match views.get_mut(event.campaign_id()) {
            Some(view) => dispatcher.dispatch(event, view),
            None => {
                tracing::debug!(
                    campaign_id = event.campaign_id(),
                    kind = event.kind(),
                    "event for a campaign with no open view"
                );
                Dispatch::Ignored
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CampaignState>> {
        self.views.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CampaignState>> {
        self.views.write().unwrap_or_else(|e| e.into_inner())
    }
}
