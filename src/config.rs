use std::io::IsTerminal;
use std::time::Duration;

use crate::cli::{Cli, ColorMode};
use crate::errors::{AppError, AppResult};
use crate::parse::parse_since;
use crate::types::{Resource, ResourceKind};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone)]
pub struct HumanFormat {
    pub color: bool,
    pub timestamps: bool,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub mode: OutputMode,
    pub human: HumanFormat,
}

#[derive(Debug, Clone)]
pub struct DevOpts {
    pub rate_ms: u64,
    pub lines: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub resources: Vec<Resource>,
    pub follow: bool,
    pub tail: Option<i64>,
    pub since: Option<Duration>,
    pub limit_bytes: Option<i64>,
    pub retry_interval: Duration,
    pub output: OutputConfig,
    pub dev: Option<DevOpts>,
}

impl TryFrom<Cli> for Config {
    type Error = AppError;

    fn try_from(cli: Cli) -> AppResult<Self> {
        let resources = cli
            .resources
            .iter()
            .map(|s| parse_resource(s))
            .collect::<AppResult<Vec<_>>>()?;

        let since = cli.since.as_deref().map(parse_since).transpose()?;

        let mode = if cli.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        };

        let color = match cli.color {
            ColorMode::Always => true,
            ColorMode::Never => false,
            ColorMode::Auto => !cli.json && std::io::stdout().is_terminal(),
        };

        let dev = cli.dev.then_some(DevOpts {
            rate_ms: cli.dev_rate_ms,
            lines: cli.dev_lines,
        });

        Ok(Config {
            namespace: cli.namespace,
            resources,
            follow: cli.follow,
            tail: cli.tail,
            since,
            limit_bytes: cli.limit_bytes,
            retry_interval: Duration::from_secs(cli.interval_secs.max(1)),
            output: OutputConfig {
                mode,
                human: HumanFormat {
                    color,
                    timestamps: cli.timestamps,
                },
            },
            dev,
        })
    }
}

fn parse_resource(s: &str) -> AppResult<Resource> {
    let (kind, name) = match s.split_once('/') {
        Some((kind, name)) => (kind, name),
        None => ("pod", s),
    };

    if name.is_empty() {
        return Err(AppError::Cli(format!("empty resource name in '{s}'")));
    }

    let kind = match kind {
        "pod" | "po" => ResourceKind::Pod,
        "deployment" | "deploy" => ResourceKind::Deployment,
        "daemonset" | "ds" => ResourceKind::DaemonSet,
        "statefulset" | "sts" => ResourceKind::StatefulSet,
        other => {
            return Err(AppError::Cli(format!(
                "unknown resource kind '{other}' in '{s}'"
            )))
        }
    };

    Ok(Resource {
        kind,
        name: name.to_string(),
    })
}
