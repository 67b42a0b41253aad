use serde::{Deserialize, Serialize};

/// Maximum number of codepoints kept from a thread's first message.
pub const CONTENT_PREVIEW_CODEPOINTS: usize = 512;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostStatus {
    Active,
    Archived,
    Deleted,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Active => "active",
            PostStatus::Archived => "archived",
            PostStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PostStatus::Active),
            "archived" => Some(PostStatus::Archived),
            "deleted" => Some(PostStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScanMode {
    Full,
    Incremental,
}

impl ScanMode {
    pub fn is_full(self) -> bool {
        matches!(self, ScanMode::Full)
    }

    pub fn label(self) -> &'static str {
        match self {
            ScanMode::Full => "full",
            ScanMode::Incremental => "partial",
        }
    }
}

/// One forum post row, keyed by `thread_id` within its channel table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub thread_id: String,
    pub channel_id: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub content: String,
    pub tags: String,
    pub message_count: i64,
    pub timestamp: i64,
    pub cover_image_url: String,
    pub total_reactions: i64,
    pub unique_reactions: i64,
}

/// Truncate message content to the preview limit. The cut falls on a
/// codepoint boundary, never inside a multi-byte sequence.
pub fn content_preview(content: &str) -> String {
    match content.char_indices().nth(CONTENT_PREVIEW_CODEPOINTS) {
        Some((byte_idx, _)) => content[..byte_idx].to_string(),
        None => content.to_string(),
    }
}
