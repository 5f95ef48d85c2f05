use clap::{Parser, ValueEnum};

/// podtail: follow and collect logs from Kubernetes workloads.
#[derive(Debug, Clone, Parser)]
#[command(name = "podtail", version, about)]
pub struct Cli {
    /// Resources to read logs from, as `kind/name` (deployment/web,
    /// statefulset/db, pod/api-0). A bare name means a pod.
    #[arg(required = true)]
    pub resources: Vec<String>,

    /// Namespace the resources live in
    #[arg(short = 'n', long = "namespace", default_value = "default")]
    pub namespace: String,

    /// Keep streaming new lines (default: collect once and exit)
    #[arg(short = 'f', long = "follow", default_value_t = false)]
    pub follow: bool,

    /// Number of lines to tail from each container
    #[arg(long = "tail")]
    pub tail: Option<i64>,

    /// Only read logs newer than this, e.g. "10s", "5m", "2h", "1d"
    #[arg(long = "since")]
    pub since: Option<String>,

    /// Per-stream byte limit in follow mode (unbounded if omitted)
    #[arg(long = "limit-bytes")]
    pub limit_bytes: Option<i64>,

    /// Seconds between reconcile passes in follow mode
    #[arg(long = "interval-secs", default_value_t = 10)]
    pub interval_secs: u64,

    /// Emit newline-delimited JSON objects (NDJSON)
    #[arg(long = "json", default_value_t = false)]
    pub json: bool,

    /// Prefix each line with the entry timestamp (human format)
    #[arg(long = "timestamps", default_value_t = false)]
    pub timestamps: bool,

    /// Color mode for human output
    #[arg(long = "color", value_enum, default_value_t = ColorMode::Auto)]
    pub color: ColorMode,

    /// Run against a built-in fake cluster (no kubeconfig required)
    #[arg(long = "dev", default_value_t = false)]
    pub dev: bool,

    /// Milliseconds between synthetic lines in dev mode
    #[arg(long = "dev-rate-ms", default_value_t = 100)]
    pub dev_rate_ms: u64,

    /// Synthetic lines available per container in dev mode
    #[arg(long = "dev-lines", default_value_t = 50)]
    pub dev_lines: u64,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}
