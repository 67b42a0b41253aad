//! Decoded platform REST objects consumed by the scanner.
//!
//! Only the fields the crawler reads are modelled; everything else in the
//! platform payloads is ignored during deserialization.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Channel kind discriminant for forum channels.
pub const CHANNEL_KIND_FORUM: u8 = 15;

/// A guild channel as returned by the channel-listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl ChannelInfo {
    pub fn is_forum(&self) -> bool {
        self.kind == CHANNEL_KIND_FORUM
    }
}

/// A thread descriptor. By platform convention the id of a forum thread
/// equals the id of its first message.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadRef {
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub applied_tags: Vec<String>,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub thread_metadata: Option<ThreadMetadata>,
}

impl ThreadRef {
    pub fn is_locked(&self) -> bool {
        self.thread_metadata.as_ref().map(|m| m.locked).unwrap_or(false)
    }

    pub fn archive_timestamp(&self) -> Option<DateTime<Utc>> {
        self.thread_metadata.as_ref().and_then(|m| m.archive_timestamp)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadMetadata {
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub archive_timestamp: Option<DateTime<Utc>>,
}

/// One page of a thread listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThreadListing {
    #[serde(default)]
    pub threads: Vec<ThreadRef>,
    #[serde(default)]
    pub has_more: bool,
}

/// A chat message; the crawler only ever fetches the first message of a thread.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub author: UserRef,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRef {
    pub id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reaction {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub emoji: Emoji,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Emoji {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl Emoji {
    /// Emoji identifier in the form the reactions endpoint expects:
    /// `name:id` for custom emoji, the bare name for unicode emoji.
    pub fn api_name(&self) -> String {
        match (self.name.as_deref(), self.id.as_deref()) {
            (Some(name), Some(id)) => format!("{name}:{id}"),
            (Some(name), None) => name.to_string(),
            (None, Some(id)) => id.to_string(),
            (None, None) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_api_name_forms() {
        let custom = Emoji {
            name: Some("blobwave".into()),
            id: Some("12345".into()),
        };
        assert_eq!(custom.api_name(), "blobwave:12345");

        let unicode = Emoji {
            name: Some("👍".into()),
            id: None,
        };
        assert_eq!(unicode.api_name(), "👍");
    }

    #[test]
    fn forum_channel_detection() {
        let forum: ChannelInfo = serde_json::from_str(
            r#"{"id": "c1", "name": "builds", "type": 15, "parent_id": "cat1"}"#,
        )
        .unwrap();
        assert!(forum.is_forum());

        let text: ChannelInfo =
            serde_json::from_str(r#"{"id": "c2", "name": "general", "type": 0}"#).unwrap();
        assert!(!text.is_forum());
    }

    #[test]
    fn thread_metadata_defaults() {
        let thread: ThreadRef = serde_json::from_str(r#"{"id": "t1"}"#).unwrap();
        assert!(!thread.is_locked());
        assert!(thread.archive_timestamp().is_none());

        let archived: ThreadRef = serde_json::from_str(
            r#"{"id": "t2", "thread_metadata": {"locked": true, "archive_timestamp": "2024-05-01T12:00:00Z"}}"#,
        )
        .unwrap();
        assert!(archived.is_locked());
        assert!(archived.archive_timestamp().is_some());
    }
}
