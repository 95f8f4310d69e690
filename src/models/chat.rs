//! Conversation-related models

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::Participant;

/// Listing category a conversation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Sale,
    Rent,
}

/// Directory query filter (`type` query parameter).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ListingFilter {
    #[default]
    All,
    Sale,
    Rent,
}

impl ListingFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingFilter::All => "all",
            ListingFilter::Sale => "sale",
            ListingFilter::Rent => "rent",
        }
    }

    /// Next filter in the all -> sale -> rent cycle.
    pub fn cycle(&self) -> Self {
        match self {
            ListingFilter::All => ListingFilter::Sale,
            ListingFilter::Sale => ListingFilter::Rent,
            ListingFilter::Rent => ListingFilter::All,
        }
    }
}

impl fmt::Display for ListingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The listing a conversation is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingSummary {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub listing_type: Option<ListingType>,
    #[serde(default)]
    pub cover_image: Option<String>,
}

/// Buyer/seller conversation about one listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub listing: Option<ListingSummary>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Unread counter per user id.
    #[serde(default)]
    pub unread: HashMap<String, u32>,
}

impl Conversation {
    /// Resolve the participant on the other side of the conversation.
    ///
    /// The first participant whose id differs from `current_user_id` wins.
    /// Degenerate records (only the current user, or duplicates of them)
    /// fall back to the first participant, which may be the current user.
    pub fn other_participant(&self, current_user_id: &str) -> Option<&Participant> {
        let other = self.participants.iter().find(|p| p.id != current_user_id);
        if other.is_some() {
            return other;
        }
        self.participants.first()
    }

    pub fn listing_title(&self) -> Option<&str> {
        self.listing.as_ref().and_then(|l| l.title.as_deref())
    }

    pub fn unread_for(&self, user_id: &str) -> u32 {
        self.unread.get(user_id).copied().unwrap_or(0)
    }

    /// Timestamp used for recency ordering.
    pub fn activity_at(&self) -> Option<DateTime<Utc>> {
        self.last_message_at.or(self.updated_at)
    }
}
