use async_trait::async_trait;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::cluster::{
    AbortHandle, BoxChunkSink, ClusterAdapter, LogStreamRequest, StreamEvent, StreamHandle,
};
use crate::errors::StreamError;
use crate::types::{ContainerRef, Resource};

/// In-process fake cluster, so the binary runs without a kubeconfig.
///
/// Every resource expands to a single pod `<name>-0` with an `app` container,
/// a `sidecar`, and a runtime-injected container that exercises the exclusion
/// rule end to end.
pub struct DevAdapter {
    rate: Duration,
    lines: u64,
}

impl DevAdapter {
    pub fn new(rate_ms: u64, lines: u64) -> Self {
        Self {
            rate: Duration::from_millis(rate_ms),
            lines,
        }
    }
}

#[async_trait]
impl ClusterAdapter for DevAdapter {
    async fn enumerate_containers(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<Vec<ContainerRef>, StreamError> {
        let mut out = Vec::new();

        for resource in resources {
            let pod = format!("{}-0", resource.name);
            for container in ["app", "sidecar", "garden-exporter"] {
                out.push(ContainerRef {
                    namespace: namespace.to_string(),
                    pod: pod.clone(),
                    container: container.to_string(),
                });
            }
        }

        Ok(out)
    }

    async fn open_log_stream(
        &self,
        request: LogStreamRequest,
        mut sink: BoxChunkSink,
    ) -> Result<StreamHandle, StreamError> {
        let cancel = CancellationToken::new();
        let child = cancel.child_token();
        let (event_tx, event_rx) = mpsc::channel(4);

        let rate = self.rate;
        let total = match request.tail_lines {
            Some(t) if t >= 0 && (t as u64) < self.lines => t as u64,
            _ => self.lines,
        };

        tokio::spawn(async move {
            let _ = event_tx.send(StreamEvent::SocketAttached).await;

            for i in 0..total {
                if child.is_cancelled() {
                    break;
                }

                let message = format!("{} says hello {i}", request.container.container);
                let line = if request.timestamps {
                    let ts = OffsetDateTime::now_utc()
                        .format(&Rfc3339)
                        .unwrap_or_default();
                    format!("{ts} {message}\n")
                } else {
                    format!("{message}\n")
                };

                sink.write(line.as_bytes());

                if request.follow {
                    tokio::select! {
                        _ = child.cancelled() => break,
                        _ = sleep(rate) => {}
                    }
                }
            }

            if request.follow {
                // a quiet container: stay attached until aborted
                child.cancelled().await;
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
