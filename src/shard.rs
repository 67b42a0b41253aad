//! Per-guild shard store.
//!
//! One SQLite file per guild holds one `channel_<id>` table per indexed forum
//! channel plus a guild-wide `exclusions` table. The pool is cheap to clone;
//! the guild loop that opened a shard is responsible for closing it once its
//! partitions are done.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::model::{Post, PostStatus};

#[derive(Debug, Clone)]
pub struct ShardStore {
    pool: SqlitePool,
}

impl ShardStore {
    /// Open (or create) the shard file at `db_path`. The parent directory is
    /// created if missing, and the guild-wide `exclusions` table is ensured.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create shard directory {}", parent.display())
                })?;
            }
        }

        // Enable WAL and stricter durability.
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = SqlitePool::connect_with(opts)
            .await
            .with_context(|| format!("failed to open shard database {}", db_path.display()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS exclusions (
                thread_id TEXT PRIMARY KEY,
                guild_id TEXT,
                channel_id TEXT,
                reason TEXT,
                timestamp INTEGER
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create exclusions table")?;

        debug!(path = %db_path.display(), "shard database opened");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Channel ids are spliced into table names; only snowflake-shaped ids
    /// are accepted.
    fn table_name(channel_id: &str) -> Result<String> {
        if channel_id.is_empty()
            || !channel_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("invalid channel id: {channel_id}");
        }
        Ok(format!("channel_{channel_id}"))
    }

    /// Idempotent create of the per-channel table. Shards written before the
    /// status column existed get it added here.
    pub async fn ensure_channel_table(&self, channel_id: &str) -> Result<()> {
        let table = Self::table_name(channel_id)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                db_id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT UNIQUE,
                channel_id TEXT,
                title TEXT,
                author TEXT,
                author_id TEXT,
                content TEXT,
                tags TEXT,
                message_count INTEGER,
                timestamp INTEGER,
                cover_image_url TEXT,
                total_reactions INTEGER,
                unique_reactions INTEGER,
                status TEXT DEFAULT 'active'
            )"
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to create table {table}"))?;

        let alter = format!("ALTER TABLE {table} ADD COLUMN status TEXT DEFAULT 'active'");
        if let Err(err) = sqlx::query(&alter).execute(&self.pool).await {
            // Expected on tables that already carry the column.
            debug!(%table, %err, "status column already present");
        }
        Ok(())
    }

    /// Phase A of a full scan: park every row; the live walk flips survivors
    /// back to active via upsert.
    pub async fn archive_all(&self, channel_id: &str) -> Result<u64> {
        let table = Self::table_name(channel_id)?;
        let result = sqlx::query(&format!("UPDATE {table} SET status = 'archived'"))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to archive posts in {table}"))?;
        Ok(result.rows_affected())
    }

    /// Insert a newly observed post, or replace an existing row with fresh
    /// metadata. Either way the row ends up `active`.
    pub async fn upsert_active(&self, channel_id: &str, post: &Post) -> Result<()> {
        let table = Self::table_name(channel_id)?;
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {table} (
                thread_id, channel_id, title, author, author_id, content, tags,
                message_count, timestamp, cover_image_url, total_reactions, unique_reactions, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active')"
        ))
        .bind(&post.thread_id)
        .bind(&post.channel_id)
        .bind(&post.title)
        .bind(&post.author)
        .bind(&post.author_id)
        .bind(&post.content)
        .bind(&post.tags)
        .bind(post.message_count)
        .bind(post.timestamp)
        .bind(&post.cover_image_url)
        .bind(post.total_reactions)
        .bind(post.unique_reactions)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert post {} into {table}", post.thread_id))?;
        Ok(())
    }

    /// All thread ids present in a channel table. An absent table is an empty
    /// set, not an error.
    pub async fn list_post_ids(&self, channel_id: &str) -> Result<HashSet<String>> {
        let table = Self::table_name(channel_id)?;
        if !self.table_exists(&table).await? {
            return Ok(HashSet::new());
        }
        let ids = sqlx::query_scalar::<_, String>(&format!("SELECT thread_id FROM {table}"))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to query post ids from {table}"))?;
        Ok(ids.into_iter().collect())
    }

    /// Used by external collaborators (e.g. a thread-delete listener) to flip
    /// a single row's status.
    pub async fn update_status(
        &self,
        channel_id: &str,
        thread_id: &str,
        status: PostStatus,
    ) -> Result<()> {
        let table = Self::table_name(channel_id)?;
        sqlx::query(&format!("UPDATE {table} SET status = ? WHERE thread_id = ?"))
            .bind(status.as_str())
            .bind(thread_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update status of {thread_id} in {table}"))?;
        Ok(())
    }

    /// Permanently exclude a thread from future scans. Re-adding updates the
    /// reason and timestamp.
    pub async fn add_exclusion(
        &self,
        guild_id: &str,
        channel_id: &str,
        thread_id: &str,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO exclusions (thread_id, guild_id, channel_id, reason, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(guild_id)
        .bind(channel_id)
        .bind(reason)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to add exclusion for thread {thread_id}"))?;
        Ok(())
    }

    pub async fn list_exclusions(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<HashSet<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT thread_id FROM exclusions WHERE guild_id = ? AND channel_id = ?",
        )
        .bind(guild_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to query exclusions")?;
        Ok(ids.into_iter().collect())
    }

    /// Fetch one post row with its status. Returns None for unknown threads.
    pub async fn fetch_post(
        &self,
        channel_id: &str,
        thread_id: &str,
    ) -> Result<Option<(Post, PostStatus)>> {
        let table = Self::table_name(channel_id)?;
        if !self.table_exists(&table).await? {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            "SELECT thread_id, channel_id, title, author, author_id, content, tags,
                    message_count, timestamp, cover_image_url, total_reactions,
                    unique_reactions, status
             FROM {table} WHERE thread_id = ?"
        ))
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to fetch post {thread_id} from {table}"))?;

        Ok(row.map(|r| {
            let post = Post {
                thread_id: r.get("thread_id"),
                channel_id: r.get("channel_id"),
                title: r.get("title"),
                author: r.get("author"),
                author_id: r.get("author_id"),
                content: r.get("content"),
                tags: r.get("tags"),
                message_count: r.get("message_count"),
                timestamp: r.get("timestamp"),
                cover_image_url: r.get("cover_image_url"),
                total_reactions: r.get("total_reactions"),
                unique_reactions: r.get("unique_reactions"),
            };
            let status: Option<String> = r.get("status");
            let status = status
                .as_deref()
                .and_then(PostStatus::parse)
                .unwrap_or(PostStatus::Active);
            (post, status)
        }))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .context("failed to query sqlite_master")?;
        Ok(count > 0)
    }
}
