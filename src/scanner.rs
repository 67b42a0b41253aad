//! Concurrent forum scanner.
//!
//! A scan walks every configured guild, expands its categories into forum
//! channels, and hands each channel to a fixed worker pool as one
//! [`PartitionTask`]. Workers refresh the channel's posts in three phases:
//! mark-stale (full scans), active threads, archived pagination (full scans).
//! A process-wide semaphore caps concurrent platform calls independently of
//! the structural parallelism.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CategoryEntry, GuildConfig, ScanningConfig};
use crate::model::{content_preview, Post, ScanMode};
use crate::platform::model::ThreadRef;
use crate::platform::{PlatformError, PlatformResult, PlatformService};
use crate::shard::ShardStore;

/// Worker count and submission-queue capacity.
pub const MAX_PARTITION_CONCURRENCY: usize = 45;
/// Upper bound on concurrent chunk tasks within one channel.
pub const MAX_THREAD_CONCURRENCY_PER_PARTITION: usize = 24;
/// Process-wide ceiling on in-flight platform calls.
pub const MAX_CONCURRENT_API_CALLS: usize = 50;
/// Page size for archived-thread pagination.
pub const ARCHIVED_PAGE_SIZE: u8 = 100;
/// Page size for reaction-user fetches.
pub const REACTION_USER_PAGE_SIZE: u8 = 100;

/// Counting gate over in-flight platform calls. Waiting acquisitions are
/// abandoned when the scan is cancelled.
#[derive(Clone)]
pub struct RateGate {
    permits: Arc<Semaphore>,
}

impl RateGate {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    /// None means the scan was cancelled while waiting for a permit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        }
    }
}

/// Progress counters shared by every task of one scan.
#[derive(Debug, Default)]
pub struct ScanCounters {
    pub total_partitions: AtomicI64,
    pub partitions_done: AtomicI64,
    pub new_or_refreshed: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub guilds: usize,
    pub partitions: i64,
    pub posts_found: i64,
    pub elapsed: Duration,
}

/// Advisory result of a scan invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed(ScanSummary),
    Skipped,
}

/// Singleton scan entry point. Owns the only two pieces of process-wide
/// state: the busy flag and the rate gate.
pub struct Scanner {
    platform: Arc<dyn PlatformService>,
    rate_gate: RateGate,
    scan_in_progress: AtomicBool,
    shutdown: CancellationToken,
}

/// One forum channel's worth of scanning work.
struct PartitionTask {
    store: ShardStore,
    guild: Arc<GuildConfig>,
    channel_id: String,
    category_key: String,
    mode: ScanMode,
    counters: Arc<ScanCounters>,
    // Dropped when the task finishes; the guild barrier watches for it.
    _done: mpsc::Sender<()>,
}

/// Per-worker handles shared across tasks.
#[derive(Clone)]
struct WorkerCtx {
    platform: Arc<dyn PlatformService>,
    gate: RateGate,
    cancel: CancellationToken,
}

/// Per-partition state shared by that partition's chunk tasks.
struct PartitionCtx {
    platform: Arc<dyn PlatformService>,
    gate: RateGate,
    cancel: CancellationToken,
    store: ShardStore,
    guild: Arc<GuildConfig>,
    channel_id: String,
    counters: Arc<ScanCounters>,
    // Guarded thread-id set: excluded and already-indexed threads. Never held
    // across an await.
    seen: RwLock<HashSet<String>>,
}

impl Scanner {
    pub fn new(platform: Arc<dyn PlatformService>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            platform,
            rate_gate: RateGate::new(MAX_CONCURRENT_API_CALLS),
            scan_in_progress: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Run one scan over `config`. At most one scan runs per process at any
    /// time; a second invocation returns [`ScanOutcome::Skipped`] without
    /// touching the platform.
    pub async fn run_scan(self: &Arc<Self>, config: &ScanningConfig, mode: ScanMode) -> ScanOutcome {
        if self
            .scan_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(mode = mode.label(), "a scan is already in progress; skipping");
            return ScanOutcome::Skipped;
        }
        let outcome = self.scan_all(config, mode).await;
        self.scan_in_progress.store(false, Ordering::SeqCst);
        outcome
    }

    async fn scan_all(self: &Arc<Self>, config: &ScanningConfig, mode: ScanMode) -> ScanOutcome {
        let started = Instant::now();
        info!(mode = mode.label(), "starting scan");

        if config.is_empty() {
            warn!("no valid guild configurations found");
            return ScanOutcome::Skipped;
        }

        let cancel = self.shutdown.child_token();
        let counters = Arc::new(ScanCounters::default());

        let (task_tx, task_rx) = mpsc::channel::<PartitionTask>(MAX_PARTITION_CONCURRENCY);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let worker_ctx = WorkerCtx {
            platform: Arc::clone(&self.platform),
            gate: self.rate_gate.clone(),
            cancel: cancel.clone(),
        };
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(MAX_PARTITION_CONCURRENCY);
        for _ in 0..MAX_PARTITION_CONCURRENCY {
            workers.push(tokio::spawn(worker(
                worker_ctx.clone(),
                Arc::clone(&task_rx),
            )));
        }

        let mut guild_jobs: Vec<JoinHandle<()>> = Vec::with_capacity(config.len());
        for (guild_id, guild) in config {
            let guild_id = guild_id.clone();
            let guild = Arc::new(guild.clone());
            let ctx = worker_ctx.clone();
            let counters = Arc::clone(&counters);
            let task_tx = task_tx.clone();
            guild_jobs.push(tokio::spawn(async move {
                scan_guild(ctx, guild_id, guild, mode, counters, task_tx).await;
            }));
        }
        drop(task_tx);

        for job in guild_jobs {
            let _ = job.await;
        }
        // Every guild barrier has released and the submission side is closed;
        // let the pool drain.
        for w in workers {
            let _ = w.await;
        }

        let summary = ScanSummary {
            guilds: config.len(),
            partitions: counters.total_partitions.load(Ordering::SeqCst),
            posts_found: counters.new_or_refreshed.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        info!(
            mode = mode.label(),
            guilds = summary.guilds,
            partitions = summary.partitions,
            posts_found = summary.posts_found,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "scan finished"
        );
        ScanOutcome::Completed(summary)
    }
}

async fn scan_guild(
    ctx: WorkerCtx,
    guild_id: String,
    guild: Arc<GuildConfig>,
    mode: ScanMode,
    counters: Arc<ScanCounters>,
    task_tx: mpsc::Sender<PartitionTask>,
) {
    info!(guild = %guild.name, %guild_id, "preparing to scan guild");
    let store = match ShardStore::open(Path::new(&guild.db_path)).await {
        Ok(store) => store,
        Err(err) => {
            warn!(%guild_id, ?err, "failed to open shard database; skipping guild");
            return;
        }
    };

    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
    for (category_key, category) in &guild.data {
        let channels = match resolve_channels(&ctx, &guild.guild_id, category).await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(%guild_id, category = %category_key, ?err, "failed to resolve category channels");
                continue;
            }
        };
        for channel_id in channels {
            counters.total_partitions.fetch_add(1, Ordering::SeqCst);
            let task = PartitionTask {
                store: store.clone(),
                guild: Arc::clone(&guild),
                channel_id,
                category_key: category_key.clone(),
                mode,
                counters: Arc::clone(&counters),
                _done: done_tx.clone(),
            };
            if task_tx.send(task).await.is_err() {
                // Pool already shut down; nothing more to submit.
                break;
            }
        }
    }
    drop(done_tx);

    // Per-guild barrier: each submitted task holds a sender clone.
    while done_rx.recv().await.is_some() {}
    store.close().await;
}

/// Expand a category entry into forum channel ids: either the explicit list,
/// or every forum channel parented under the category.
async fn resolve_channels(
    ctx: &WorkerCtx,
    guild_id: &str,
    category: &CategoryEntry,
) -> PlatformResult<Vec<String>> {
    if !category.channel_ids.is_empty() {
        return Ok(category.channel_ids.clone());
    }
    let channels = match ctx.gate.acquire(&ctx.cancel).await {
        Some(_permit) => ctx.platform.guild_channels(guild_id).await?,
        None => return Ok(Vec::new()),
    };
    Ok(channels
        .into_iter()
        .filter(|c| c.is_forum() && c.parent_id.as_deref() == Some(category.id.as_str()))
        .map(|c| c.id)
        .collect())
}

async fn worker(ctx: WorkerCtx, tasks: Arc<Mutex<mpsc::Receiver<PartitionTask>>>) {
    loop {
        let task = { tasks.lock().await.recv().await };
        let Some(task) = task else { break };
        if ctx.cancel.is_cancelled() {
            task.counters.partitions_done.fetch_add(1, Ordering::SeqCst);
            continue;
        }
        scan_partition(&ctx, task).await;
    }
}

async fn scan_partition(ctx: &WorkerCtx, task: PartitionTask) {
    let started = Instant::now();
    let channel_id = task.channel_id.clone();

    if let Err(err) = task.store.ensure_channel_table(&channel_id).await {
        warn!(channel = %channel_id, ?err, "failed to ensure channel table; skipping partition");
        task.counters.partitions_done.fetch_add(1, Ordering::SeqCst);
        return;
    }

    if task.mode.is_full() {
        // Phase A: park every known row; the live walk below reactivates
        // whatever still exists.
        if let Err(err) = task.store.archive_all(&channel_id).await {
            warn!(channel = %channel_id, ?err, "failed to archive existing posts");
        }
    }

    let mut seen = HashSet::new();
    if !task.mode.is_full() {
        match task.store.list_post_ids(&channel_id).await {
            Ok(ids) => seen = ids,
            Err(err) => warn!(channel = %channel_id, ?err, "failed to load existing post ids"),
        }
    }
    match task
        .store
        .list_exclusions(&task.guild.guild_id, &channel_id)
        .await
    {
        Ok(ids) => seen.extend(ids),
        Err(err) => warn!(channel = %channel_id, ?err, "failed to load excluded threads"),
    }

    let partition = Arc::new(PartitionCtx {
        platform: Arc::clone(&ctx.platform),
        gate: ctx.gate.clone(),
        cancel: ctx.cancel.clone(),
        store: task.store.clone(),
        guild: Arc::clone(&task.guild),
        channel_id: channel_id.clone(),
        counters: Arc::clone(&task.counters),
        seen: RwLock::new(seen),
    });

    // Phase B: threads the platform lists as live right now.
    let listing = match ctx.gate.acquire(&ctx.cancel).await {
        Some(_permit) => ctx.platform.list_active_threads(&channel_id).await,
        None => {
            task.counters.partitions_done.fetch_add(1, Ordering::SeqCst);
            return;
        }
    };
    match listing {
        Ok(listing) => process_threads(&partition, listing.threads, "active").await,
        Err(err) => {
            warn!(channel = %channel_id, ?err, "failed to list active threads");
            task.counters.partitions_done.fetch_add(1, Ordering::SeqCst);
            return;
        }
    }

    // Phase C: archived pagination, full scans only.
    if task.mode.is_full() {
        paginate_archived(&partition).await;
    }

    info!(
        category = %task.category_key,
        guild = %task.guild.name,
        channel = %channel_id,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "partition scan completed"
    );
    task.counters.partitions_done.fetch_add(1, Ordering::SeqCst);
}

async fn paginate_archived(ctx: &Arc<PartitionCtx>) {
    let mut before: Option<DateTime<Utc>> = None;
    let mut page = 0u32;
    loop {
        page += 1;
        if ctx.cancel.is_cancelled() {
            info!(channel = %ctx.channel_id, "scan cancelled during archived pagination");
            return;
        }

        let listing = match ctx.gate.acquire(&ctx.cancel).await {
            Some(_permit) => {
                ctx.platform
                    .list_archived_threads(&ctx.channel_id, before, ARCHIVED_PAGE_SIZE)
                    .await
            }
            None => return,
        };
        let listing = match listing {
            Ok(listing) => listing,
            Err(err) => {
                warn!(channel = %ctx.channel_id, page, ?err, "failed to list archived threads");
                return;
            }
        };
        debug!(
            channel = %ctx.channel_id,
            page,
            fetched = listing.threads.len(),
            has_more = listing.has_more,
            "archived page fetched"
        );
        if listing.threads.is_empty() {
            return;
        }

        let has_more = listing.has_more;
        // The next page starts strictly before the last archive timestamp of
        // this one. Threads sharing that exact timestamp may be skipped.
        let next_before = listing.threads.last().and_then(|t| t.archive_timestamp());
        process_threads(ctx, listing.threads, "archived").await;

        if !has_more {
            return;
        }
        match next_before {
            Some(ts) => before = Some(ts),
            None => {
                warn!(channel = %ctx.channel_id, "archived thread missing metadata; stopping pagination");
                return;
            }
        }
    }
}

/// Process one listing's threads with bounded intra-channel concurrency:
/// contiguous chunks, each handled sequentially by its own task.
async fn process_threads(ctx: &Arc<PartitionCtx>, threads: Vec<ThreadRef>, kind: &'static str) {
    if threads.is_empty() {
        return;
    }
    debug!(channel = %ctx.channel_id, count = threads.len(), kind, "processing threads");

    let chunk_size = threads
        .len()
        .div_ceil(MAX_THREAD_CONCURRENCY_PER_PARTITION)
        .max(1);
    let chunk_gate = Arc::new(Semaphore::new(MAX_THREAD_CONCURRENCY_PER_PARTITION));
    let mut chunk_jobs = Vec::new();
    for chunk in chunk_threads(threads, chunk_size) {
        let ctx = Arc::clone(ctx);
        let chunk_gate = Arc::clone(&chunk_gate);
        chunk_jobs.push(tokio::spawn(async move {
            let Ok(_permit) = chunk_gate.acquire_owned().await else {
                return;
            };
            for thread in chunk {
                process_thread(&ctx, thread).await;
            }
        }));
    }
    for job in chunk_jobs {
        let _ = job.await;
    }
}

/// Split threads into contiguous chunks of at most `chunk_size`.
fn chunk_threads(threads: Vec<ThreadRef>, chunk_size: usize) -> Vec<Vec<ThreadRef>> {
    let mut chunks = Vec::new();
    let mut rest = threads;
    while rest.len() > chunk_size {
        let tail = rest.split_off(chunk_size);
        chunks.push(rest);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

async fn process_thread(ctx: &PartitionCtx, thread: ThreadRef) {
    // One permit covers every platform call made for this thread.
    let Some(_permit) = ctx.gate.acquire(&ctx.cancel).await else {
        return;
    };
    if ctx.cancel.is_cancelled() {
        return;
    }

    if thread.is_locked() {
        return;
    }
    if ctx.seen.read().unwrap().contains(&thread.id) {
        return;
    }

    // The first message of a thread shares the thread's id.
    let message = match ctx.platform.fetch_message(&thread.id, &thread.id).await {
        Ok(message) => message,
        Err(PlatformError::NotFound) => {
            info!(thread = %thread.id, "thread first message not found; adding to exclusion list");
            match ctx
                .store
                .add_exclusion(&ctx.guild.guild_id, &ctx.channel_id, &thread.id, "Not Found")
                .await
            {
                Ok(()) => {
                    ctx.seen.write().unwrap().insert(thread.id.clone());
                }
                Err(err) => warn!(thread = %thread.id, ?err, "failed to record exclusion"),
            }
            return;
        }
        Err(err) => {
            warn!(thread = %thread.id, ?err, "failed to fetch first message");
            return;
        }
    };

    let mut total_reactions = 0i64;
    let mut unique_users: HashSet<String> = HashSet::new();
    for reaction in &message.reactions {
        total_reactions += reaction.count;
        if ctx.cancel.is_cancelled() {
            return;
        }
        let emoji = reaction.emoji.api_name();
        match ctx
            .platform
            .fetch_reaction_users(&thread.id, &message.id, &emoji, REACTION_USER_PAGE_SIZE)
            .await
        {
            Ok(users) => unique_users.extend(users.into_iter().map(|u| u.id)),
            Err(err) => {
                warn!(thread = %thread.id, %emoji, ?err, "failed to fetch reaction users")
            }
        }
    }

    let post = Post {
        thread_id: thread.id.clone(),
        channel_id: thread.parent_id.clone(),
        title: thread.name.clone(),
        author: message.author.username.clone(),
        author_id: message.author.id.clone(),
        content: content_preview(&message.content),
        tags: thread.applied_tags.join(","),
        message_count: thread.message_count,
        timestamp: message.timestamp.timestamp(),
        cover_image_url: message
            .attachments
            .first()
            .map(|a| a.url.clone())
            .unwrap_or_default(),
        total_reactions,
        unique_reactions: unique_users.len() as i64,
    };

    match ctx.store.upsert_active(&ctx.channel_id, &post).await {
        Ok(()) => {
            // The upsert happened before this insertion, so later chunks never
            // re-process a just-indexed thread.
            {
                let mut seen = ctx.seen.write().unwrap();
                seen.insert(post.thread_id.clone());
                ctx.counters.new_or_refreshed.fetch_add(1, Ordering::SeqCst);
            }
            debug!(thread = %post.thread_id, channel = %ctx.channel_id, "post saved");
        }
        Err(err) => warn!(thread = %post.thread_id, ?err, "failed to upsert post"),
    }
}
