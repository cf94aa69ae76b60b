//! Shared stores for application state.

pub mod campaigns;

pub use campaigns::CampaignStore;
