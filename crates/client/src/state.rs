//! Optimistic view state for a campaign detail view.
//!
//! Local actions mutate the view immediately; authoritative events later
//! overwrite counters and totals instead of adding to them, so duplicate or
//! reordered delivery cannot double count.

use changa_shared::Comment;

/// The narrow write surface the event dispatcher gets on a consumer's view.
pub trait ReconciliationTarget {
    fn campaign_id(&self) -> &str;

    /// Prepend `comment` unless it is already shown, and take the server count.
    fn apply_comment_added(&mut self, comment: Comment, comments_count: u64);

    /// Take the server like count; touch `is_liked` only when `is_liked` is `Some`.
    /// Returns `false` when the comment is not in this view.
    fn apply_comment_liked(
        &mut self,
        comment_id: &str,
        likes_count: u64,
        is_liked: Option<bool>,
    ) -> bool;

    fn apply_contribution_added(&mut self, current_funding: f64);
}

/// Locally held, possibly optimistic, state of one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignState {
    campaign_id: String,
    current_funding: f64,
    /// Optimistic funding not yet confirmed by an authoritative total.
    unconfirmed_funding: f64,
    comments: Vec<Comment>,
    comments_count: u64,
}

impl CampaignState {
    pub fn new(campaign_id: impl Into<String>, current_funding: f64) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            current_funding,
            unconfirmed_funding: 0.0,
            comments: Vec::new(),
            comments_count: 0,
        }
    }

    /// Seed the comment list from a REST fetch, newest first.
    pub fn with_comments(mut self, comments: Vec<Comment>, comments_count: u64) -> Self {
        self.comments = comments;
        self.comments_count = comments_count;
        self
    }

    pub fn current_funding(&self) -> f64 {
        self.current_funding
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn comments_count(&self) -> u64 {
        self.comments_count
    }

    pub fn comment(&self, comment_id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.id == comment_id)
    }

    /// Whether the funding total includes amounts the server has not confirmed.
    pub fn has_unconfirmed_funding(&self) -> bool {
        self.unconfirmed_funding != 0.0
    }

    // --- Optimistic mutations ---

    /// Bump the total right after a donation call succeeds.
    pub fn record_contribution(&mut self, amount: f64) {
        self.current_funding += amount;
        self.unconfirmed_funding += amount;
    }

    /// Flip the viewer's like. Returns the new `is_liked`, or `None` if the
    /// comment is not shown.
    pub fn toggle_like(&mut self, comment_id: &str) -> Option<bool> {
        let comment = self.comments.iter_mut().find(|c| c.id == comment_id)?;
        comment.is_liked = !comment.is_liked;
        comment.likes_count = if comment.is_liked {
            comment.likes_count.saturating_add(1)
        } else {
            comment.likes_count.saturating_sub(1)
        };
        Some(comment.is_liked)
    }

    /// Show a comment the viewer just posted. Returns `false` if already shown.
    pub fn insert_comment(&mut self, comment: Comment) -> bool {
        if self.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        self.comments.insert(0, comment);
        self.comments_count = self.comments_count.saturating_add(1);
        true
    }
}

impl ReconciliationTarget for CampaignState {
    fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    fn apply_comment_added(&mut self, comment: Comment, comments_count: u64) {
        if !self.comments.iter().any(|c| c.id == comment.id) {
            self.comments.insert(0, comment);
        }
        self.comments_count = comments_count;
    }

    fn apply_comment_liked(
        &mut self,
        comment_id: &str,
        likes_count: u64,
        is_liked: Option<bool>,
    ) -> bool {
        let Some(comment) = self.comments.iter_mut().find(|c| c.id == comment_id) else {
            return false;
        };
        comment.likes_count = likes_count;
        if let Some(is_liked) = is_liked {
            comment.is_liked = is_liked;
        }
        true
    }

    fn apply_contribution_added(&mut self, current_funding: f64) {
        self.current_funding = current_funding;
        self.unconfirmed_funding = 0.0;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use changa_shared::CommentAuthor;
    use chrono::{TimeZone, Utc};

    pub(crate) fn comment(id: &str, likes_count: u64) -> Comment {
        Comment {
            id: id.to_string(),
            content: format!("comment {id}"),
            author: CommentAuthor {
                id: "author".to_string(),
                name: "Author".to_string(),
            },
            likes_count,
            is_liked: false,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn optimistic_contribution_is_overwritten_by_authoritative_total() {
        let mut state = CampaignState::new("c1", 1000.0);
        state.record_contribution(250.0);
        assert_eq!(state.current_funding(), 1250.0);
        assert!(state.has_unconfirmed_funding());

        // Server total already includes another donor's 100.
        state.apply_contribution_added(1350.0);
        assert_eq!(state.current_funding(), 1350.0);
        assert!(!state.has_unconfirmed_funding());
    }

    #[test]
    fn toggle_like_adjusts_count_locally() {
        let mut state = CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 3)], 1);
        assert_eq!(state.toggle_like("m1"), Some(true));
        assert_eq!(state.comment("m1").unwrap().likes_count, 4);
        assert_eq!(state.toggle_like("m1"), Some(false));
        assert_eq!(state.comment("m1").unwrap().likes_count, 3);
        assert_eq!(state.toggle_like("missing"), None);
    }

    #[test]
    fn posted_comment_is_not_duplicated_by_its_broadcast() {
        let mut state = CampaignState::new("c1", 0.0).with_comments(vec![comment("m1", 0)], 1);
        assert!(state.insert_comment(comment("m2", 0)));
        assert!(!state.insert_comment(comment("m2", 0)));
        assert_eq!(state.comments_count(), 2);

        state.apply_comment_added(comment("m2", 0), 2);
        let ids: Vec<_> = state.comments().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
        assert_eq!(state.comments_count(), 2);
    }

    #[test]
    fn like_for_unknown_comment_reports_miss() {
        let mut state = CampaignState::new("c1", 0.0);
        assert!(!state.apply_comment_liked("ghost", 5, Some(true)));
    }
}
