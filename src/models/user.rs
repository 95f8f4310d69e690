//! User-related models

use serde::{Deserialize, Serialize};

/// A party to a conversation (buyer or seller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Participant {
    /// Name for display: name, else email, else the raw id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .or_else(|| self.email.as_deref().filter(|e| !e.trim().is_empty()))
            .unwrap_or(&self.id)
    }
}
