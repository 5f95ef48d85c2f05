use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterAdapter, LogStreamRequest, StreamEvent};
use crate::dedup::{DedupBuffer, DEFAULT_DEDUP_CAPACITY};
use crate::follow::connection::{
    spawn_event_pump, ConnEvent, ConnKey, ConnMsg, ConnStatus, Connection, KeyedSink,
};
use crate::parse;
use crate::types::{ContainerRef, Converter, LogEntry, LogLevel, Resource};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// On reconnect we re-fetch only this much recent history. Tailing from the
/// caller's `since` again would replay a window far larger than the dedup
/// buffer can absorb.
pub const RETRY_SINCE: Duration = Duration::from_secs(10);

/// Options for one follow session.
///
/// `limit_bytes` has no default on purpose: every caller states whether the
/// per-stream read is bounded (`Some(n)`) or unbounded (`None`).
#[derive(Clone, Debug)]
pub struct FollowOpts {
    pub tail: Option<i64>,
    pub since: Option<Duration>,
    pub limit_bytes: Option<i64>,
}

/// Tuning knobs; the defaults are the production values.
#[derive(Clone, Debug)]
pub struct FollowerSettings {
    pub retry_interval: Duration,
    pub dedup_capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for FollowerSettings {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            idle_timeout: STREAM_IDLE_TIMEOUT,
        }
    }
}

/// Continuously discovers the containers behind `resources` and keeps one log
/// stream per container flowing into the consumer.
///
/// All state (registry, dedup windows) is owned by a single task; streams feed
/// it through a channel, so there is exactly one writer and no locks.
pub struct LogFollower<E> {
    adapter: Arc<dyn ClusterAdapter>,
    namespace: String,
    resources: Vec<Resource>,
    convert: Converter<E>,
    consumer: mpsc::UnboundedSender<E>,
    settings: FollowerSettings,
    cancel: CancellationToken,
}

impl<E: Send + 'static> LogFollower<E> {
    pub fn new(
        adapter: Arc<dyn ClusterAdapter>,
        namespace: impl Into<String>,
        resources: Vec<Resource>,
        convert: Converter<E>,
        consumer: mpsc::UnboundedSender<E>,
    ) -> Self {
        Self {
            adapter,
            namespace: namespace.into(),
            resources,
            convert,
            consumer,
            settings: FollowerSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settings(mut self, settings: FollowerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Tie the follower to an external cancellation source. Cancelling the
    /// token and calling `stop()` on the handle are equivalent.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Spawn the control loop. The returned handle's `wait()` resolves only
    /// once `stop()` (or the cancellation token) fires; the loop never ends
    /// on its own.
    pub fn start(self, opts: FollowOpts) -> FollowerHandle {
        let cancel = self.cancel.clone();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let dedup = DedupBuffer::new(self.settings.dedup_capacity);

        let task = FollowerTask {
            adapter: self.adapter,
            namespace: self.namespace,
            resources: self.resources,
            convert: self.convert,
            consumer: self.consumer,
            settings: self.settings,
            opts,
            cancel: self.cancel,
            connections: HashMap::new(),
            dedup,
            conn_tx,
            conn_rx,
            next_generation: 0,
            consumer_gone: false,
        };

        let join = tokio::spawn(task.run());

        FollowerHandle { cancel, join }
    }
}

/// Control for a running follower.
pub struct FollowerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl FollowerHandle {
    /// Idempotent: aborts every live stream, cancels the polling loop, and
    /// releases `wait()`.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the loop has shut down. Pending until `stop()`.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

struct FollowerTask<E> {
    adapter: Arc<dyn ClusterAdapter>,
    namespace: String,
    resources: Vec<Resource>,
    convert: Converter<E>,
    consumer: mpsc::UnboundedSender<E>,
    settings: FollowerSettings,
    opts: FollowOpts,
    cancel: CancellationToken,
    connections: HashMap<ConnKey, Connection>,
    dedup: DedupBuffer,
    conn_tx: mpsc::UnboundedSender<ConnMsg>,
    conn_rx: mpsc::UnboundedReceiver<ConnMsg>,
    next_generation: u64,
    consumer_gone: bool,
}

impl<E: Send + 'static> FollowerTask<E> {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.settings.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.reconcile().await,
                Some(msg) = self.conn_rx.recv() => self.on_conn_msg(msg),
            }
        }

        self.shutdown();
    }

    /// Bring the registry in line with the cluster: skip live connections,
    /// reopen dead ones, attach new containers. Stream opens fan out
    /// concurrently so one slow container cannot stall the rest; registry
    /// transitions are applied here, serially, as the opens resolve. Failures
    /// wait for the next tick, which also caps reconnect storms at one
    /// attempt per interval.
    async fn reconcile(&mut self) {
        let containers = match self
            .adapter
            .enumerate_containers(&self.namespace, &self.resources)
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                tracing::debug!(error = %e, "container discovery failed; retrying on next tick");
                return;
            }
        };

        let targets: Vec<ContainerRef> =
            containers.into_iter().filter(|c| !c.is_system()).collect();

        if targets.is_empty() {
            tracing::debug!(
                namespace = %self.namespace,
                "no containers found for the requested resources"
            );
            return;
        }

        let mut attaches = Vec::new();

        for container in targets {
            let key = container.conn_key();

            let retry = match self.connections.get(&key) {
                Some(conn) if conn.is_live() => continue,
                Some(_) => true,
                None => false,
            };

            self.next_generation += 1;
            let generation = self.next_generation;

            let request = LogStreamRequest {
                container: container.clone(),
                follow: true,
                timestamps: true,
                tail_lines: if retry { None } else { self.opts.tail },
                since: if retry { Some(RETRY_SINCE) } else { self.opts.since },
                limit_bytes: self.opts.limit_bytes,
                idle_timeout: Some(self.settings.idle_timeout),
            };

            let sink = KeyedSink::new(key.clone(), generation, self.conn_tx.clone());
            let adapter = Arc::clone(&self.adapter);

            attaches.push(async move {
                let result = adapter.open_log_stream(request, Box::new(sink)).await;
                (key, container, retry, generation, result)
            });
        }

        for (key, container, retry, generation, result) in future::join_all(attaches).await {
            match result {
                Ok(handle) => {
                    tracing::trace!(key = %key, retry, "log stream attached");
                    spawn_event_pump(key.clone(), generation, handle.events, self.conn_tx.clone());
                    self.connections.insert(
                        key,
                        Connection {
                            container,
                            abort: handle.abort,
                            status: ConnStatus::Connected,
                            generation,
                        },
                    );
                }
                Err(e) if e.is_not_ready() => {} // pod still starting; next tick retries
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "failed to open log stream; retrying on next tick");
                }
            }
        }
    }

    fn on_conn_msg(&mut self, msg: ConnMsg) {
        match msg.event {
            ConnEvent::Data(chunk) => self.on_chunk(&msg.key, &chunk),
            ConnEvent::Lifecycle(event) => self.on_lifecycle(&msg.key, msg.generation, event),
        }
    }

    /// The synchronous pipeline: split, parse, dedup, convert, write.
    fn on_chunk(&mut self, key: &str, chunk: &[u8]) {
        let Some(conn) = self.connections.get(key) else {
            return;
        };

        let dedup_key = conn.container.dedup_key();
        let container = conn.container.container.clone();

        let text = String::from_utf8_lossy(chunk);
        for line in parse::split_chunk(&text) {
            let parsed = parse::parse_line(line);
            let time_ms = parse::time_ms(parsed.timestamp);

            if !self.dedup.accept(&dedup_key, &parsed.message, time_ms) {
                continue;
            }

            let entry = LogEntry {
                timestamp: parsed.timestamp.unwrap_or_else(OffsetDateTime::now_utc),
                message: parsed.message,
                container: container.clone(),
                level: LogLevel::Info,
            };

            self.emit(entry);
        }
    }

    fn on_lifecycle(&mut self, key: &str, generation: u64, event: StreamEvent) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if conn.generation != generation {
            return; // event from a stream this key has already replaced
        }

        match event {
            StreamEvent::SocketAttached => {
                tracing::trace!(key = %key, "socket attached");
            }
            StreamEvent::Error(e) => {
                conn.status = ConnStatus::Error;
                tracing::trace!(key = %key, error = %e, "log stream error");
            }
            StreamEvent::Closed => {
                // an error's trailing close is the same underlying event and
                // stays silent; a direct close is worth a trace
                if conn.status != ConnStatus::Error {
                    tracing::trace!(key = %key, "log stream closed");
                }
                conn.status = ConnStatus::Closed;
            }
        }
    }

    fn emit(&mut self, entry: LogEntry) {
        if self.consumer_gone {
            return;
        }
        if self.consumer.send((self.convert)(entry)).is_err() {
            self.consumer_gone = true;
            tracing::debug!("consumer stream closed; dropping further entries");
        }
    }

    fn shutdown(&mut self) {
        for (_, conn) in self.connections.drain() {
            conn.abort.abort();
        }
        tracing::trace!("follower stopped");
    }
}
