//! Applies realtime events to local campaign state.
//!
//! Events carry authoritative totals, so every counter is overwritten rather
//! than incremented. `is_liked` is per viewer: a like event only changes it
//! when the acting user is the signed-in one.

use std::sync::Arc;

use changa_shared::InboundEvent;
use futures_util::StreamExt;

use crate::state::ReconciliationTarget;
use crate::stores::CampaignStore;
use crate::token_store::TokenStore;
use crate::ws::{ChannelEvent, ChannelEvents};

/// Outcome of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Ignored,
}

#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tokens: Arc<TokenStore>,
}

impl EventDispatcher {
    pub fn new(tokens: Arc<TokenStore>) -> Self {
        Self { tokens }
    }

    pub fn dispatch<T>(&self, event: &InboundEvent, target: &mut T) -> Dispatch
    where
        T: ReconciliationTarget + ?Sized,
    {
        if event.campaign_id() != target.campaign_id() {
            tracing::trace!(
                event_campaign = event.campaign_id(),
                view_campaign = target.campaign_id(),
                "event for another campaign"
            );
            return Dispatch::Ignored;
        }

        match event {
            InboundEvent::CommentAdded { data, .. } => {
                target.apply_comment_added(data.comment.clone(), data.comments_count);
                Dispatch::Applied
            }
            InboundEvent::CommentLiked { data, .. } => {
                let own_action = self.tokens.user_id().as_deref() == Some(data.user_id.as_str());
                let is_liked = own_action.then_some(data.is_liked);
                if target.apply_comment_liked(&data.comment_id, data.likes_count, is_liked) {
                    Dispatch::Applied
                } else {
                    tracing::debug!(
                        comment_id = %data.comment_id,
                        "like for a comment not in view"
                    );
                    Dispatch::Ignored
                }
            }
            InboundEvent::ContributionAdded { data, .. } => {
                target.apply_contribution_added(data.current_funding);
                Dispatch::Applied
            }
            InboundEvent::Unknown { kind, .. } => {
                tracing::debug!(kind = %kind, "ignoring unhandled event type");
                Dispatch::Ignored
            }
        }
    }

    /// Drain a channel's event stream into `store` until the channel goes away.
    pub async fn run(&self, mut events: ChannelEvents, store: CampaignStore) {
        while let Some(event) = events.next().await {
            match event {
                ChannelEvent::Connected => tracing::info!("realtime updates live"),
                ChannelEvent::Disconnected { reason } => {
                    tracing::info!(reason = %reason, "realtime updates paused")
                }
                ChannelEvent::Event(event) => {
                    if store.apply(self, &event) != Dispatch::Applied {
                        continue;
                    }
                    if let Some(view) = store.get(event.campaign_id()) {
                        tracing::info!(
                            campaign_id = event.campaign_id(),
                            kind = event.kind(),
                            current_funding = view.current_funding(),
                            comments_count = view.comments_count(),
                            "campaign updated"
                        );
                    }
                }
            }
        }
        tracing::debug!("event stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::comment;
    use crate::state::CampaignState;
    use crate::token_store::tests::signed_in;
    use changa_shared::{CommentAddedData, CommentLikedData, ContributionAddedData};

    fn dispatcher(viewer: &str) -> EventDispatcher {
        EventDispatcher::new(signed_in(viewer, "tok"))
    }

    fn contribution(campaign_id: &str, current_funding: f64) -> InboundEvent {
        InboundEvent::ContributionAdded {
            campaign_id: campaign_id.to_string(),
            data: ContributionAddedData {
                current_funding,
                amount: Some(100.0),
            },
        }
    }

    fn liked(comment_id: &str, likes_count: u64, user_id: &str, is_liked: bool) -> InboundEvent {
        InboundEvent::CommentLiked {
            campaign_id: "c1".to_string(),
            data: CommentLikedData {
                comment_id: comment_id.to_string(),
                likes_count,
                user_id: user_id.to_string(),
                is_liked,
            },
        }
    }

    #[test]
    fn duplicate_contribution_event_is_idempotent() {
        let dispatcher = dispatcher("u1");
        let mut state = CampaignState::new("c1", 1000.0);
        let event = contribution("c1", 1100.0);

        assert_eq!(dispatcher.dispatch(&event, &mut state), Dispatch::Applied);
        assert_eq!(dispatcher.dispatch(&event, &mut state), Dispatch::Applied);
        assert_eq!(state.current_funding(), 1100.0);
    }

    #[test]
    fn contribution_overwrites_optimistic_total() {
        let dispatcher = dispatcher("u1");
        let mut state = CampaignState::new("c1", 1000.0);
        state.record_contribution(100.0);

        dispatcher.dispatch(&contribution("c1", 1150.0), &mut state);
        assert_eq!(state.current_funding(), 1150.0);
    }

    #[test]
    fn like_state_only_follows_own_actions() {
        let seed = || CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 4)], 1);
        let event = liked("m1", 5, "A", true);

        let mut actor_view = seed();
        dispatcher("A").dispatch(&event, &mut actor_view);
        let m1 = actor_view.comment("m1").unwrap();
        assert_eq!(m1.likes_count, 5);
        assert!(m1.is_liked);

        let mut other_view = seed();
        dispatcher("B").dispatch(&event, &mut other_view);
        let m1 = other_view.comment("m1").unwrap();
        assert_eq!(m1.likes_count, 5);
        assert!(!m1.is_liked);
    }

    #[test]
    fn own_like_confirms_optimistic_toggle() {
        let dispatcher = dispatcher("A");
        let mut state = CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 4)], 1);
        state.toggle_like("m1");

        // Another user liked concurrently, so the server count is 6.
        dispatcher.dispatch(&liked("m1", 6, "A", true), &mut state);
        let m1 = state.comment("m1").unwrap();
        assert_eq!(m1.likes_count, 6);
        assert!(m1.is_liked);
    }

    #[test]
    fn signed_out_viewer_never_takes_is_liked() {
        let dispatcher = EventDispatcher::new(Arc::new(TokenStore::in_memory()));
        let mut state = CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 0)], 1);
        dispatcher.dispatch(&liked("m1", 1, "A", true), &mut state);
        assert!(!state.comment("m1").unwrap().is_liked);
        assert_eq!(state.comment("m1").unwrap().likes_count, 1);
    }

    #[test]
    fn comment_added_dedupes_and_takes_server_count() {
        let dispatcher = dispatcher("u1");
        let mut state = CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 0)], 1);
        let event = InboundEvent::CommentAdded {
            campaign_id: "c1".to_string(),
            data: CommentAddedData {
                comment: comment("m2", 0),
                comments_count: 7,
            },
        };

        dispatcher.dispatch(&event, &mut state);
        dispatcher.dispatch(&event, &mut state);
        assert_eq!(state.comments().len(), 2);
        assert_eq!(state.comments()[0].id, "m2");
        assert_eq!(state.comments_count(), 7);
    }

    #[test]
    fn unknown_and_foreign_events_are_ignored() {
        let dispatcher = dispatcher("u1");
        let mut state = CampaignState::new("c1", 500.0);
        let before = state.clone();

        let unknown = InboundEvent::Unknown {
            campaign_id: "c1".to_string(),
            kind: "campaign_closed".to_string(),
        };
        assert_eq!(dispatcher.dispatch(&unknown, &mut state), Dispatch::Ignored);
        assert_eq!(
            dispatcher.dispatch(&contribution("c2", 9000.0), &mut state),
            Dispatch::Ignored
        );
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn run_applies_events_to_open_views() {
        let dispatcher = dispatcher("u1");
        let store = CampaignStore::new();
        store.open(CampaignState::new("c1", 100.0));

        let (tx, rx) = futures_channel::mpsc::unbounded();
        tx.unbounded_send(ChannelEvent::Connected).unwrap();
        // Ignored events must not stop the loop.
        tx.unbounded_send(ChannelEvent::Event(liked("ghost", 1, "u1", true))).unwrap();
        tx.unbounded_send(ChannelEvent::Event(contribution("c1", 250.0))).unwrap();
        tx.unbounded_send(ChannelEvent::Event(contribution("c9", 1.0))).unwrap();
        tx.unbounded_send(ChannelEvent::Disconnected {
            reason: "test".to_string(),
        })
        .unwrap();
        drop(tx);

        dispatcher.run(rx, store.clone()).await;

        assert_eq!(store.get("c1").unwrap().current_funding(), 250.0);
        assert!(!store.is_open("c9"));
    }

    #[test]
    fn store_update_and_close() {
        let store = CampaignStore::new();
        store.open(CampaignState::new("c1", 10.0));
        assert_eq!(store.update("c1", |s| s.record_contribution(5.0)), Some(()));
        assert_eq!(store.get("c1").unwrap().current_funding(), 15.0);
        assert!(store.update("c2", |s| s.record_contribution(5.0)).is_none());
        assert!(store.close("c1").is_some());
        assert!(store.get("c1").is_none());
    }
}
