//! Wire protocol for the changa API and push channel.

use serde::{Deserialize, Serialize};

use crate::models::Comment;

/// Response header carrying a rotated bearer token.
pub const HEADER_NEW_TOKEN: &str = "x-new-token";

/// Endpoint used by the single-flight refresh path.
pub const REFRESH_TOKEN_PATH: &str = "/auth/refresh-token";

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const VERIFY_OTP_PATH: &str = "/auth/verify-otp";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// Endpoints that never carry a bearer token and never trigger a refresh.
pub const PUBLIC_AUTH_PATHS: &[&str] = &[
    LOGIN_PATH,
    REGISTER_PATH,
    VERIFY_OTP_PATH,
    FORGOT_PASSWORD_PATH,
    RESET_PASSWORD_PATH,
];

/// Format an `Authorization` header value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// Check if a host is a local/development address.
pub fn is_local_address(host: &str) -> bool {
    let host_part = host.split(':').next().unwrap_or(host);
    host_part == "localhost"
        || host_part == "127.0.0.1"
        || host_part == "0.0.0.0"
        || host_part.starts_with("192.168.")
        || host_part.starts_with("10.")
}

// =========================================
// Push channel
// =========================================

/// Frames sent by the client over the push channel.
///
/// Serialises as `{"type":"subscribe_campaign","campaignId":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubscribeCampaign {
        #[serde(rename = "campaignId")]
        campaign_id: String,
    },
    UnsubscribeCampaign {
        #[serde(rename = "campaignId")]
        campaign_id: String,
    },
}

impl ClientCommand {
    pub fn subscribe(campaign_id: impl Into<String>) -> Self {
        Self::SubscribeCampaign {
            campaign_id: campaign_id.into(),
        }
    }

    pub fn unsubscribe(campaign_id: impl Into<String>) -> Self {
        Self::UnsubscribeCampaign {
            campaign_id: campaign_id.into(),
        }
    }
}

/// Untyped inbound frame: `{"type": ..., "campaignId": ..., "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentAddedData {
    pub comment: Comment,
    pub comments_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentLikedData {
    pub comment_id: String,
    pub likes_count: u64,
    /// The user who liked or unliked the comment.
    pub user_id: String,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContributionAddedData {
    /// Authoritative campaign total after this contribution.
    pub current_funding: f64,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Typed inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    CommentAdded {
        campaign_id: String,
        data: CommentAddedData,
    },
    CommentLiked {
        campaign_id: String,
        data: CommentLikedData,
    },
    ContributionAdded {
        campaign_id: String,
        data: ContributionAddedData,
    },
    /// An event type this client does not handle.
    Unknown { campaign_id: String, kind: String },
}

impl InboundEvent {
    pub fn campaign_id(&self) -> &str {
        match self {
            InboundEvent::CommentAdded { campaign_id, .. }
            | InboundEvent::CommentLiked { campaign_id, .. }
            | InboundEvent::ContributionAdded { campaign_id, .. }
            | InboundEvent::Unknown { campaign_id, .. } => campaign_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            InboundEvent::CommentAdded { .. } => "comment_added",
            InboundEvent::CommentLiked { .. } => "comment_liked",
            InboundEvent::ContributionAdded { .. } => "contribution_added",
            InboundEvent::Unknown { kind, .. } => kind,
        }
    }

    /// Parse a text frame into a typed event.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let message: InboundMessage = serde_json::from_str(text)?;
        Self::try_from(message)
    }
}

impl TryFrom<InboundMessage> for InboundEvent {
    type Error = serde_json::Error;

    /// Fails only when a known event type carries a malformed `data` body.
    fn try_from(message: InboundMessage) -> Result<Self, Self::Error> {
        let InboundMessage {
            kind,
            campaign_id,
            data,
        } = message;

        let event = match kind.as_str() {
            "comment_added" => InboundEvent::CommentAdded {
                campaign_id,
                data: serde_json::from_value(data)?,
            },
            "comment_liked" => InboundEvent::CommentLiked {
                campaign_id,
                data: serde_json::from_value(data)?,
            },
            "contribution_added" => InboundEvent::ContributionAdded {
                campaign_id,
                data: serde_json::from_value(data)?,
            },
            _ => InboundEvent::Unknown { campaign_id, kind },
        };
        Ok(event)
    }
}
