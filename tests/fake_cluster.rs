use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use podtail::cluster::{
    AbortHandle, BoxChunkSink, ClusterAdapter, LogStreamRequest, StreamEvent, StreamHandle,
};
use podtail::errors::StreamError;
use podtail::follow::{FollowOpts, FollowerSettings, LogFollower};
use podtail::oneshot::{self, OneShotOpts};
use podtail::types::{ContainerRef, Converter, LogEntry, Resource, ResourceKind};

fn container(pod: &str, name: &str) -> ContainerRef {
    ContainerRef {
        namespace: "default".to_string(),
        pod: pod.to_string(),
        container: name.to_string(),
    }
}

fn resources() -> Vec<Resource> {
    vec![Resource {
        kind: ResourceKind::Deployment,
        name: "web".to_string(),
    }]
}

#[derive(Clone)]
struct OpenRecord {
    key: String,
    follow: bool,
    tail: Option<i64>,
    since: Option<Duration>,
    abort: AbortHandle,
}

#[derive(Default)]
struct FakeState {
    containers: Vec<ContainerRef>,
    /// Per connection key, the scripted stream sessions in order; each session
    /// is the chunk sequence delivered before the stream closes. A key with no
    /// session left gets a stream that stays open silently until aborted.
    sessions: HashMap<String, VecDeque<Vec<&'static str>>>,
    opened: Vec<OpenRecord>,
}

struct FakeAdapter {
    state: Mutex<FakeState>,
}

impl FakeAdapter {
    fn new(containers: Vec<ContainerRef>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                containers,
                ..FakeState::default()
            }),
        }
    }

    fn script(&self, key: &str, chunks: Vec<&'static str>) {
        self.state
            .lock()
            .unwrap()
            .sessions
            .entry(key.to_string())
            .or_default()
            .push_back(chunks);
    }

    fn opened(&self) -> Vec<OpenRecord> {
        self.state.lock().unwrap().opened.clone()
    }
}

#[async_trait]
impl ClusterAdapter for FakeAdapter {
    async fn enumerate_containers(
        &self,
        _namespace: &str,
        _resources: &[Resource],
    ) -> Result<Vec<ContainerRef>, StreamError> {
        Ok(self.state.lock().unwrap().containers.clone())
    }

    async fn open_log_stream(
        &self,
        request: LogStreamRequest,
        mut sink: BoxChunkSink,
    ) -> Result<StreamHandle, StreamError> {
        let key = request.container.conn_key();
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let (event_tx, event_rx) = mpsc::channel(4);

        let session = {
            let mut state = self.state.lock().unwrap();
            state.opened.push(OpenRecord {
                key: key.clone(),
                follow: request.follow,
                tail: request.tail_lines,
                since: request.since,
                abort: AbortHandle::new(cancel.clone()),
            });
            state.sessions.get_mut(&key).and_then(|s| s.pop_front())
        };

        tokio::spawn(async move {
            let _ = event_tx.send(StreamEvent::SocketAttached).await;

            match session {
                Some(chunks) => {
                    for chunk in chunks {
                        sink.write(chunk.as_bytes());
                    }
                }
                None => child.cancelled().await,
            }

            drop(sink);
            let _ = event_tx.send(StreamEvent::Closed).await;
        });

        Ok(StreamHandle {
            events: event_rx,
            abort: AbortHandle::new(cancel),
        })
    }
}

fn identity() -> Converter<LogEntry> {
    Arc::new(|entry| entry)
}

fn fast_settings() -> FollowerSettings {
    FollowerSettings {
        retry_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn follow_opts() -> FollowOpts {
    FollowOpts {
        tail: Some(5),
        since: None,
        limit_bytes: None,
    }
}

async fn recv_n(rx: &mut mpsc::UnboundedReceiver<LogEntry>, n: usize) -> Vec<LogEntry> {
    let mut out = Vec::new();
    for _ in 0..n {
        let entry = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for entry")
            .expect("consumer channel closed");
        out.push(entry);
    }
    out
}

#[tokio::test]
async fn delivers_lines_in_order_with_parsed_timestamps() {
    let adapter = Arc::new(FakeAdapter::new(vec![container("p1", "app")]));
    adapter.script(
        "p1/app",
        vec![
            "2024-01-01T00:00:00Z m0\n",
            "2024-01-01T00:00:01Z m1\n",
            "2024-01-01T00:00:02Z m2\n",
            "2024-01-01T00:00:03Z m3\n",
            "2024-01-01T00:00:04Z m4\n",
            "2024-01-01T00:00:05Z m5\n",
            "2024-01-01T00:00:06Z m6\n",
            "2024-01-01T00:00:07Z m7\n",
            "2024-01-01T00:00:08Z m8\n",
            "2024-01-01T00:00:09Z m9\n",
        ],
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = LogFollower::new(adapter, "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    let entries = recv_n(&mut rx, 10).await;

    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.message, format!("m{i}"));
        assert_eq!(entry.container, "app");
        let expected = datetime!(2024-01-01 00:00:00 UTC) + Duration::from_secs(i as u64);
        assert_eq!(entry.timestamp, expected);
    }

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn reconnect_replay_is_deduplicated() {
    let adapter = Arc::new(FakeAdapter::new(vec![container("p1", "app")]));
    adapter.script(
        "p1/app",
        vec!["2024-01-01T00:00:00Z a\n", "2024-01-01T00:00:01Z b\n"],
    );
    adapter.script(
        "p1/app",
        vec!["2024-01-01T00:00:01Z b\n", "2024-01-01T00:00:02Z c\n"],
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = LogFollower::new(adapter.clone(), "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    let entries = recv_n(&mut rx, 3).await;
    let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["a", "b", "c"]);

    // nothing else arrives: the replayed "b" was suppressed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    // the reattach narrowed its fetch window instead of re-tailing
    let opened = adapter.opened();
    assert!(opened.len() >= 2);
    assert_eq!(opened[0].tail, Some(5));
    assert_eq!(opened[0].since, None);
    assert_eq!(opened[1].tail, None);
    assert_eq!(opened[1].since, Some(Duration::from_secs(10)));
    assert!(opened.iter().all(|o| o.follow));

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn unparseable_line_becomes_message_stamped_now() {
    let adapter = Arc::new(FakeAdapter::new(vec![container("p1", "app")]));
    adapter.script("p1/app", vec!["hello world\n"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let before = OffsetDateTime::now_utc();
    let handle = LogFollower::new(adapter, "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    let entries = recv_n(&mut rx, 1).await;
    let after = OffsetDateTime::now_utc();

    assert_eq!(entries[0].message, "hello world");
    assert!(entries[0].timestamp >= before && entries[0].timestamp <= after);

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn infrastructure_containers_are_never_attached() {
    let adapter = Arc::new(FakeAdapter::new(vec![
        container("p1", "app"),
        container("p1", "garden-sync"),
    ]));
    adapter.script("p1/app", vec!["2024-01-01T00:00:00Z up\n"]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = LogFollower::new(adapter.clone(), "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    let entries = recv_n(&mut rx, 1).await;
    assert_eq!(entries[0].container, "app");

    // let a few reconcile passes run
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(adapter
        .opened()
        .iter()
        .all(|o| !o.key.contains("garden-sync")));

    handle.stop();
    handle.wait().await;
}

#[tokio::test]
async fn stop_aborts_live_streams_and_releases_wait() {
    // no scripts: both streams stay open until aborted
    let adapter = Arc::new(FakeAdapter::new(vec![
        container("p1", "app"),
        container("p2", "app"),
    ]));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = LogFollower::new(adapter.clone(), "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    // wait for both attaches
    for _ in 0..100 {
        if adapter.opened().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let opened = adapter.opened();
    assert_eq!(opened.len(), 2);
    assert!(opened.iter().all(|o| !o.abort.is_aborted()));

    handle.stop();
    tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("wait() did not resolve after stop()");

    assert!(adapter.opened().iter().all(|o| o.abort.is_aborted()));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn stop_twice_is_harmless() {
    let adapter = Arc::new(FakeAdapter::new(vec![container("p1", "app")]));

    let (tx, _rx) = mpsc::unbounded_channel();
    let handle = LogFollower::new(adapter, "default", resources(), identity(), tx)
        .with_settings(fast_settings())
        .start(follow_opts());

    handle.stop();
    handle.stop();
    tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("wait() did not resolve");
}

// one-shot collection against a corpus-backed fake

struct CorpusAdapter {
    containers: Vec<ContainerRef>,
    corpus: HashMap<String, Vec<String>>,
    opened: Mutex<Vec<(String, Option<i64>)>>,
}

impl CorpusAdapter {
    fn new(containers: Vec<ContainerRef>, corpus: HashMap<String, Vec<String>>) -> Self {
        Self {
            containers,
            corpus,
            opened: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ClusterAdapter for CorpusAdapter {
    async fn enumerate_containers(
        &self,
        _namespace: &str,
        _resources: &[Resource],
    ) -> Result<Vec<ContainerRef>, StreamError> {
        Ok(self.containers.clone())
    }

    async fn open_log_stream(
        &self,
        request: LogStreamRequest,
        mut sink: BoxChunkSink,
    ) -> Result<StreamHandle, StreamError> {
        let key = request.container.conn_key();
        self.opened
            .lock()
            .unwrap()
            .push((key.clone(), request.tail_lines));

        let lines = self.corpus.get(&key).cloned().unwrap_or_default();
        let tail = request.tail_lines.unwrap_or(lines.len() as i64).max(0) as usize;
        let suffix: Vec<String> = lines
            .iter()
            .skip(lines.len().saturating_sub(tail))
            .cloned()
            .collect();

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let _ = event_tx.send(StreamEvent::SocketAttached).await;
            for line in suffix {
                sink.write(line.as_bytes());
            }
            drop(sink);
            let _ = event_tx.send(StreamEvent::Closed).await;
        });

        Ok(StreamHandle {
            events: event_rx,
            abort: AbortHandle::new(cancel),
        })
    }
}

fn rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&time::format_description::well_known::Rfc3339)
        .unwrap()
}

#[tokio::test]
async fn oneshot_splits_the_line_budget_and_sorts_globally() {
    let base = datetime!(2024-03-01 12:00:00 UTC);

    let mut containers = Vec::new();
    let mut corpus = HashMap::new();
    for c in 0..10u64 {
        let pod = format!("p{c}");
        containers.push(container(&pod, "app"));
        // interleaved timestamps across containers
        let lines: Vec<String> = (0..1_000u64)
            .map(|i| {
                let ts = base + Duration::from_millis(i * 1_000 + c);
                format!("{} {}-line-{}\n", rfc3339(ts), pod, i)
            })
            .collect();
        corpus.insert(format!("{pod}/app"), lines);
    }
    // an infrastructure container must affect neither the budget nor the output
    containers.push(container("p0", "garden-exporter"));

    let adapter = Arc::new(CorpusAdapter::new(containers, corpus));

    let (tx, mut rx) = mpsc::unbounded_channel();
    oneshot::collect(
        adapter.clone(),
        "default",
        &resources(),
        identity(),
        &tx,
        OneShotOpts {
            tail: None,
            since: None,
            max_lines: 1_000,
        },
    )
    .await
    .unwrap();
    drop(tx);

    let opened = adapter.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 10);
    assert!(opened.iter().all(|(key, tail)| {
        !key.contains("garden-exporter") && *tail == Some(100)
    }));

    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }

    assert_eq!(entries.len(), 1_000);
    assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    // only each container's 100-line suffix was fetched
    assert!(entries.iter().all(|e| {
        let index: u64 = e.message.rsplit('-').next().unwrap().parse().unwrap();
        index >= 900
    }));
}

#[tokio::test]
async fn oneshot_caller_tail_wins_over_the_derived_one() {
    let base = datetime!(2024-03-01 12:00:00 UTC);

    let lines: Vec<String> = (0..50u64)
        .map(|i| format!("{} line-{}\n", rfc3339(base + Duration::from_secs(i)), i))
        .collect();

    let mut corpus = HashMap::new();
    corpus.insert("p1/app".to_string(), lines);
    let adapter = Arc::new(CorpusAdapter::new(vec![container("p1", "app")], corpus));

    let (tx, mut rx) = mpsc::unbounded_channel();
    oneshot::collect(
        adapter.clone(),
        "default",
        &resources(),
        identity(),
        &tx,
        OneShotOpts {
            tail: Some(7),
            since: None,
            max_lines: 1_000,
        },
    )
    .await
    .unwrap();
    drop(tx);

    let mut entries = Vec::new();
    while let Some(entry) = rx.recv().await {
        entries.push(entry);
    }

    assert_eq!(entries.len(), 7);
    assert_eq!(entries[0].message, "line-43");
    assert_eq!(entries[6].message, "line-49");
}
