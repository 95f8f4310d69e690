//! Conversation directory: the conversations visible to the current user.

use std::cmp::Ordering;

use anyhow::Result;

use super::ChatApi;
use crate::models::{Conversation, ListingFilter, Message};

/// Conversations of one listing filter, as last fetched.
#[derive(Debug, Default)]
pub struct ConversationDirectory {
    filter: ListingFilter,
    conversations: Vec<Conversation>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch conversations for `filter` and replace the held set.
    ///
    /// A failed fetch leaves an empty directory behind and returns the error.
    pub async fn load<A: ChatApi>(&mut self, api: &A, filter: ListingFilter) -> Result<()> {
        match api.list_conversations(filter).await {
            Ok(items) => {
                self.replace(filter, items);
                Ok(())
            }
            Err(e) => {
                self.replace(filter, Vec::new());
                Err(e)
            }
        }
    }

    /// Replace the held set with conversations fetched elsewhere.
    pub fn replace(&mut self, filter: ListingFilter, conversations: Vec<Conversation>) {
        tracing::debug!(
            "Directory now holds {} {} conversations",
            conversations.len(),
            filter
        );
        self.filter = filter;
        self.conversations = conversations;
    }

    pub fn filter(&self) -> ListingFilter {
        self.filter
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn get(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// Case-insensitive match on listing title, the other participant's
    /// name, or the last message. An empty query matches everything.
    pub fn search<'a>(&'a self, query: &str, current_user_id: &str) -> Vec<&'a Conversation> {
        let needle = query.trim().to_lowercase();
        self.conversations
            .iter()
            .filter(|c| needle.is_empty() || matches_query(c, &needle, current_user_id))
            .collect()
    }

    /// Conversations ordered by last activity, newest first.
    ///
    /// The returned iterator is `Clone`, so a view can be walked again
    /// without re-sorting.
    pub fn sorted_by_recency(&self) -> std::vec::IntoIter<&Conversation> {
        let mut view: Vec<&Conversation> = self.conversations.iter().collect();
        view.sort_by(|a, b| recency_order(a, b));
        view.into_iter()
    }

    /// Search results, newest first. What list views display.
    pub fn view<'a>(&'a self, query: &str, current_user_id: &str) -> Vec<&'a Conversation> {
        let mut view = self.search(query, current_user_id);
        view.sort_by(|a, b| recency_order(a, b));
        view
    }

    pub fn unread_count_for(&self, conversation_id: &str, user_id: &str) -> u32 {
        self.get(conversation_id)
            .map(|c| c.unread_for(user_id))
            .unwrap_or(0)
    }

    /// Fold a live message into its conversation's summary.
    ///
    /// Messages from other users bump the current user's unread counter
    /// unless their thread is the one currently open. Returns false when the
    /// conversation is not in the directory.
    pub fn record_message(
        &mut self,
        message: &Message,
        current_user_id: &str,
        open_thread: Option<&str>,
    ) -> bool {
        let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return false;
        };

        conv.last_message = Some(message.text.clone());
        conv.last_message_at = Some(message.created_at);

        let is_open = open_thread == Some(message.conversation_id.as_str());
        if !message.is_from(current_user_id) && !is_open {
            *conv.unread.entry(current_user_id.to_string()).or_insert(0) += 1;
        }
        true
    }

    /// Zero the local unread counter after a read receipt went through.
    pub fn mark_read(&mut self, conversation_id: &str, user_id: &str) {
        if let Some(conv) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conv.unread.remove(user_id);
        }
    }
}

fn matches_query(conv: &Conversation, needle: &str, current_user_id: &str) -> bool {
    let contains = |s: &str| s.to_lowercase().contains(needle);

    conv.listing_title().is_some_and(contains)
        || conv
            .other_participant(current_user_id)
            .is_some_and(|p| contains(p.display_name()))
        || conv.last_message.as_deref().is_some_and(contains)
}

/// Newest first; conversations without any timestamp sink to the end.
fn recency_order(a: &Conversation, b: &Conversation) -> Ordering {
    match (a.activity_at(), b.activity_at()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingSummary, Participant};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn conv(id: &str, title: &str, other: &str, last: &str, at: Option<i64>) -> Conversation {
        Conversation {
            id: id.to_string(),
            participants: vec![
                Participant {
                    id: "me".to_string(),
                    name: Some("Me Myself".to_string()),
                    email: None,
                },
                Participant {
                    id: format!("{}-other", id),
                    name: Some(other.to_string()),
                    email: None,
                },
            ],
            listing: Some(ListingSummary {
                id: format!("{}-listing", id),
                title: Some(title.to_string()),
                listing_type: None,
                cover_image: None,
            }),
            last_message: Some(last.to_string()),
            last_message_at: at.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            updated_at: None,
            unread: HashMap::new(),
        }
    }

    fn directory() -> ConversationDirectory {
        let mut dir = ConversationDirectory::new();
        dir.replace(
            ListingFilter::All,
            vec![
                conv("c1", "Sunny Loft", "Alice Moreau", "Is parking included?", Some(100)),
                conv("c2", "Farm House", "Bruno Lima", "See you Tuesday", Some(300)),
                conv("c3", "City Studio", "Carla Diaz", "What about the LOFT?", Some(200)),
            ],
        );
        dir
    }

    fn ids(convs: Vec<&Conversation>) -> Vec<&str> {
        convs.into_iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_search_matches_title_name_and_last_message() {
        let dir = directory();
        // "loft" hits c1's title and c3's last message, case-insensitively.
        assert_eq!(ids(dir.search("LoFt", "me")), vec!["c1", "c3"]);
        assert_eq!(ids(dir.search("bruno", "me")), vec!["c2"]);
        assert_eq!(ids(dir.search("tuesday", "me")), vec!["c2"]);
        assert!(dir.search("penthouse", "me").is_empty());
    }

    #[test]
    fn test_search_does_not_match_current_user_name() {
        let dir = directory();
        assert!(dir.search("myself", "me").is_empty());
    }

    #[test]
    fn test_search_empty_query_returns_all() {
        let dir = directory();
        assert_eq!(dir.search("  ", "me").len(), 3);
        assert_eq!(dir.len(), 3);
    }

    #[test]
    fn test_sorted_by_recency_is_restartable() {
        let mut dir = directory();
        let mut extra = conv("c4", "Barn", "Dee", "", None);
        extra.updated_at = Some(Utc.timestamp_opt(250, 0).unwrap());
        let undated = conv("c5", "Shed", "Eve", "", None);
        let mut items: Vec<Conversation> = dir.sorted_by_recency().cloned().collect();
        items.push(undated);
        items.push(extra);
        dir.replace(ListingFilter::All, items);

        let view = dir.sorted_by_recency();
        let first: Vec<&str> = view.clone().map(|c| c.id.as_str()).collect();
        let again: Vec<&str> = view.map(|c| c.id.as_str()).collect();
        assert_eq!(first, vec!["c2", "c4", "c3", "c1", "c5"]);
        assert_eq!(first, again);
    }

    #[test]
    fn test_view_filters_then_orders_by_recency() {
        let dir = directory();
        assert_eq!(ids(dir.view("loft", "me")), vec!["c3", "c1"]);
        assert_eq!(ids(dir.view("", "me")), vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn test_unread_count_for() {
        let mut dir = directory();
        assert_eq!(dir.unread_count_for("c1", "me"), 0);
        assert_eq!(dir.unread_count_for("missing", "me"), 0);

        let mut items: Vec<Conversation> = dir.sorted_by_recency().cloned().collect();
        items[0].unread.insert("me".to_string(), 4);
        dir.replace(ListingFilter::All, items);
        assert_eq!(dir.unread_count_for("c2", "me"), 4);
        assert_eq!(dir.unread_count_for("c2", "someone-else"), 0);
    }

    #[test]
    fn test_record_message_updates_summary_and_unread() {
        let mut dir = directory();
        let incoming = Message {
            id: Some("m9".to_string()),
            conversation_id: "c1".to_string(),
            from: "c1-other".to_string(),
            to: "me".to_string(),
            text: "Yes, one spot".to_string(),
            created_at: Utc.timestamp_opt(500, 0).unwrap(),
        };

        assert!(dir.record_message(&incoming, "me", None));
        let c1 = dir.get("c1").unwrap();
        assert_eq!(c1.last_message.as_deref(), Some("Yes, one spot"));
        assert_eq!(dir.unread_count_for("c1", "me"), 1);
        assert_eq!(dir.sorted_by_recency().next().unwrap().id, "c1");

        // Open thread: summary moves, counter does not.
        assert!(dir.record_message(&incoming, "me", Some("c1")));
        assert_eq!(dir.unread_count_for("c1", "me"), 1);

        dir.mark_read("c1", "me");
        assert_eq!(dir.unread_count_for("c1", "me"), 0);
    }

    #[test]
    fn test_record_own_message_does_not_count_unread() {
        let mut dir = directory();
        let own = Message {
            id: Some("m10".to_string()),
            conversation_id: "c2".to_string(),
            from: "me".to_string(),
            to: "c2-other".to_string(),
            text: "Thanks".to_string(),
            created_at: Utc.timestamp_opt(600, 0).unwrap(),
        };
        assert!(dir.record_message(&own, "me", None));
        assert_eq!(dir.unread_count_for("c2", "me"), 0);

        let stray = Message {
            conversation_id: "nope".to_string(),
            ..own
        };
        assert!(!dir.record_message(&stray, "me", None));
    }
}
