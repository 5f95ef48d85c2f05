use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::{AsyncBufRead, AsyncBufReadExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{ListParams, LogParams};
use kube::{Api, Client, ResourceExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cluster::{
    AbortHandle, BoxChunkSink, ClusterAdapter, LogStreamRequest, StreamEvent, StreamHandle,
};
use crate::errors::{AppResult, StreamError};
use crate::types::{ContainerRef, Resource, ResourceKind};

/// Cluster adapter backed by a real Kubernetes API server.
pub struct KubeAdapter {
    client: Client,
}

impl KubeAdapter {
    /// Uses KUBECONFIG / ~/.kube/config out-of-cluster, or in-cluster config.
    pub async fn connect() -> AppResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn pods_for(
        &self,
        namespace: &str,
        resource: &Resource,
    ) -> Result<Vec<Pod>, StreamError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        match resource.kind {
            ResourceKind::Pod => {
                let pod = pods.get(&resource.name).await.map_err(classify)?;
                Ok(vec![pod])
            }
            ResourceKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                let d = api.get(&resource.name).await.map_err(classify)?;
                let selector = d.spec.map(|s| s.selector).unwrap_or_default();
                self.select_pods(&pods, &selector).await
            }
            ResourceKind::DaemonSet => {
                let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
                let d = api.get(&resource.name).await.map_err(classify)?;
                let selector = d.spec.map(|s| s.selector).unwrap_or_default();
                self.select_pods(&pods, &selector).await
            }
            ResourceKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                let s = api.get(&resource.name).await.map_err(classify)?;
                let selector = s.spec.map(|s| s.selector).unwrap_or_default();
                self.select_pods(&pods, &selector).await
            }
        }
    }

    async fn select_pods(
        &self,
        pods: &Api<Pod>,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, StreamError> {
        let labels = match &selector.match_labels {
            Some(labels) if !labels.is_empty() => labels,
            _ => return Ok(Vec::new()),
        };

        let expr = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let list = pods
            .list(&ListParams::default().labels(&expr))
            .await
            .map_err(classify)?;

        Ok(list.items)
    }
}

#[async_trait]
impl ClusterAdapter for KubeAdapter {
    async fn enumerate_containers(
        &self,
        namespace: &str,
        resources: &[Resource],
    ) -> Result<Vec<ContainerRef>, StreamError> {
        let mut seen_pods: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for resource in resources {
            for pod in self.pods_for(namespace, resource).await? {
                let name = pod.name_any();
                if !seen_pods.insert(name.clone()) {
                    continue; // overlapping selectors
                }

                let containers: Vec<String> = pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_else(Vec::new);

                for container in containers {
                    out.push(ContainerRef {
                        namespace: namespace.to_string(),
                        pod: name.clone(),
                        container,
                    });
                }
            }
        }

        Ok(out)
    }

    async fn open_log_stream(
        &self,
        request: LogStreamRequest,
        sink: BoxChunkSink,
    ) -> Result<StreamHandle, StreamError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &request.container.namespace);

        let lp = LogParams {
            follow: request.follow,
            timestamps: request.timestamps,
            container: Some(request.container.container.clone()),
            since_seconds: request.since.map(|d| d.as_secs().max(1) as i64),
            tail_lines: request.tail_lines,
            limit_bytes: request.limit_bytes,
            ..Default::default()
        };

        let reader = api
            .log_stream(&request.container.pod, &lp)
            .await
            .map_err(classify)?;

        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(4);

        tokio::spawn(pump(
            reader,
            sink,
            event_tx,
            cancel.child_token(),
            request.idle_timeout,
        ));

        Ok(StreamHandle {
            events: event_rx,
            abort: AbortHandle::new(cancel),
        })
    }
}

/// Reads the stream line-wise into the sink until EOF, error, idle expiry, or
/// abort, then emits the terminal `Closed`.
async fn pump(
    mut reader: impl AsyncBufRead + Unpin + Send + 'static,
    mut sink: BoxChunkSink,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    idle: Option<Duration>,
) {
    let _ = events.send(StreamEvent::SocketAttached).await;

    let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);

    loop {
        buf.clear();

        let read = reader.read_until(b'\n', &mut buf);

        let res = match idle {
            Some(limit) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = tokio::time::timeout(limit, read) => match r {
                        Ok(r) => r,
                        Err(_) => {
                            let _ = events
                                .send(StreamEvent::Error(StreamError::IdleTimeout(limit.as_secs())))
                                .await;
                            break;
                        }
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    r = read => r,
                }
            }
        };

        match res {
            Ok(0) => break, // EOF
            Ok(_) => sink.write(&buf),
            Err(e) => {
                let _ = events
                    .send(StreamEvent::Error(StreamError::Io(e.to_string())))
                    .await;
                break;
            }
        }
    }

    drop(sink);
    let _ = events.send(StreamEvent::Closed).await;
}

fn classify(e: kube::Error) -> StreamError {
    match &e {
        // 400 is what the API serves while the container is still being
        // created; the follower silences it and retries on the next tick.
        kube::Error::Api(ae) if ae.code == 400 => StreamError::NotReady,
        kube::Error::Api(ae) => StreamError::Api(format!("{} (status {})", ae.message, ae.code)),
        other => StreamError::Api(other.to_string()),
    }
}
