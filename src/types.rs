use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

/// Containers injected by the platform runtime carry this name prefix and are
/// never tailed.
pub const SYSTEM_CONTAINER_PREFIX: &str = "garden-";

/// Workload kinds the cluster adapter knows how to expand into pods.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    Pod,
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Deployment => "deployment",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::StatefulSet => "statefulset",
        }
    }
}

/// A named workload whose containers we want logs from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub name: String,
}

/// One running container, addressed within its pod and namespace.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContainerRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl ContainerRef {
    /// Stable identifier for the container's log stream.
    pub fn conn_key(&self) -> String {
        format!("{}/{}", self.pod, self.container)
    }

    /// Key for the duplicate-suppression window.
    pub fn dedup_key(&self) -> String {
        format!("{}.{}", self.pod, self.container)
    }

    pub fn is_system(&self) -> bool {
        self.container.starts_with(SYSTEM_CONTAINER_PREFIX)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Entry produced by the parsing pipeline, before the caller's converter runs.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub timestamp: OffsetDateTime,
    pub message: String,
    pub container: String,
    pub level: LogLevel,
}

/// Caller-supplied shaping of entries into whatever the consumer stream wants.
pub type Converter<E> = Arc<dyn Fn(LogEntry) -> E + Send + Sync>;

/// Record the bundled CLI writes to stdout; library callers define their own.
#[derive(Clone, Debug, Serialize)]
pub struct OutputRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub container: String,
    pub level: LogLevel,
    pub message: String,
}
