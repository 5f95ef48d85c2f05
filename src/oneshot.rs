use std::sync::Arc;
use std::time::Duration;

use futures::future;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::cluster::{ChunkSink, ClusterAdapter, LogStreamRequest, StreamEvent};
use crate::errors::AppResult;
use crate::follow::follower::STREAM_IDLE_TIMEOUT;
use crate::parse;
use crate::types::{ContainerRef, Converter, LogEntry, LogLevel, Resource};

/// Cap on lines buffered across all containers in one collection pass.
pub const MAX_LOG_LINES_IN_MEMORY: usize = 100_000;

#[derive(Clone, Debug)]
pub struct OneShotOpts {
    pub tail: Option<i64>,
    pub since: Option<Duration>,
    /// Total line budget; the per-container tail is derived from it when the
    /// caller sets no explicit tail.
    pub max_lines: usize,
}

impl Default for OneShotOpts {
    fn default() -> Self {
        Self {
            tail: None,
            since: None,
            max_lines: MAX_LOG_LINES_IN_MEMORY,
        }
    }
}

/// Read a bounded suffix from every target container in parallel and write
/// the merged entries to the consumer, sorted by timestamp ascending.
/// Completes once every container has been drained.
pub async fn collect<E>(
    adapter: Arc<dyn ClusterAdapter>,
    namespace: &str,
    resources: &[Resource],
    convert: Converter<E>,
    consumer: &mpsc::UnboundedSender<E>,
    opts: OneShotOpts,
) -> AppResult<()> {
    let containers = adapter.enumerate_containers(namespace, resources).await?;

    let targets: Vec<ContainerRef> = containers.into_iter().filter(|c| !c.is_system()).collect();

    if targets.is_empty() {
        tracing::debug!(namespace, "no containers found for the requested resources");
        return Ok(());
    }

    // Split the budget evenly so one noisy container cannot monopolize it.
    let tail = opts
        .tail
        .unwrap_or((opts.max_lines / targets.len()) as i64);

    let fetches = targets
        .into_iter()
        .map(|container| fetch_container(Arc::clone(&adapter), container, tail, opts.since));

    let mut entries: Vec<LogEntry> = future::join_all(fetches).await.into_iter().flatten().collect();

    // stable: ties keep per-container arrival order
    entries.sort_by_key(|e| e.timestamp);

    for entry in entries {
        if consumer.send(convert(entry)).is_err() {
            break;
        }
    }

    Ok(())
}

/// Drain one container's bounded log suffix. Failures are logged and yield an
/// empty batch; they never fail the whole collection.
async fn fetch_container(
    adapter: Arc<dyn ClusterAdapter>,
    container: ContainerRef,
    tail: i64,
    since: Option<Duration>,
) -> Vec<LogEntry> {
    let key = container.conn_key();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = CollectSink { tx };

    let request = LogStreamRequest {
        container: container.clone(),
        follow: false,
        timestamps: true,
        tail_lines: Some(tail),
        since,
        limit_bytes: None,
        idle_timeout: Some(STREAM_IDLE_TIMEOUT),
    };

    let mut handle = match adapter.open_log_stream(request, Box::new(sink)).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "log fetch failed; skipping container");
            return Vec::new();
        }
    };

    // the adapter drops the sink at stream end, so this drains to completion
    let mut entries = Vec::new();
    while let Some(chunk) = rx.recv().await {
        let text = String::from_utf8_lossy(&chunk);
        for line in parse::split_chunk(&text) {
            let parsed = parse::parse_line(line);
            entries.push(LogEntry {
                timestamp: parsed.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
                message: parsed.message,
                container: container.container.clone(),
                level: LogLevel::Info,
            });
        }
    }

    while let Some(event) = handle.events.recv().await {
        if let StreamEvent::Error(e) = event {
            tracing::debug!(key = %key, error = %e, "log fetch ended with error");
        }
    }

    entries
}

struct CollectSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChunkSink for CollectSink {
    fn write(&mut self, chunk: &[u8]) {
        let _ = self.tx.send(chunk.to_vec());
    }
}
