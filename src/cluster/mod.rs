pub mod dev;
pub mod kube;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamError;
use crate::types::{ContainerRef, Resource};

/// Receives raw log bytes for one container stream. The follower supplies one
/// sink per stream; the adapter calls it from its own pump task.
pub trait ChunkSink: Send + 'static {
    fn write(&mut self, chunk: &[u8]);
}

pub type BoxChunkSink = Box<dyn ChunkSink>;

/// Lifecycle of one open log stream. `Closed` is terminal; an `Error` is
/// always followed by `Closed`.
#[derive(Debug)]
pub enum StreamEvent {
    SocketAttached,
    Error(StreamError),
    Closed,
}

/// Cancels the stream's pump task. Cheap to clone; aborting twice is a no-op.
#[derive(Clone)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to one open log stream: lifecycle events plus the abort control.
/// Adapters guarantee every sink write happens before the terminal `Closed`
/// event and drop the sink when the stream ends.
pub struct StreamHandle {
    pub events: mpsc::Receiver<StreamEvent>,
    pub abort: AbortHandle,
}

/// Parameters for opening one container log stream.
#[derive(Clone, Debug)]
pub struct LogStreamRequest {
    pub container: ContainerRef,
    pub follow: bool,
    pub timestamps: bool,
    pub tail_lines: Option<i64>,
    pub since: Option<Duration>,
    pub limit_bytes: Option<i64>,
    /// Reads stalling longer than this close the stream.
    pub idle_timeout: Option<Duration>,
}

/// The cluster collaborator: expands resources to running containers and
/// opens log streams against them.
#[async_trait]
pub trait ClusterAdapter: Send + Sync + 'static {
    /// Current set of containers belonging to `resources` in `namespace`.
    async fn enumerate_containers(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<Vec<ContainerRef>, StreamError>;

    /// Open one log stream; bytes go to `sink`, lifecycle to the handle.
    async fn open_log_stream(
        &self,
        request: LogStreamRequest,
        sink: BoxChunkSink,
    ) -> Result<StreamHandle, StreamError>;
}
