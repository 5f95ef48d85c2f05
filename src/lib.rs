pub mod cli;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod follow;
pub mod logging;
pub mod oneshot;
pub mod output;
pub mod parse;
pub mod shutdown;
pub mod types;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cluster::dev::DevAdapter;
use crate::cluster::kube::KubeAdapter;
use crate::cluster::ClusterAdapter;
use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::follow::{FollowOpts, FollowerSettings, LogFollower};
use crate::oneshot::OneShotOpts;
use crate::shutdown::Shutdown;
use crate::types::{Converter, LogEntry, OutputRecord};

pub async fn run(config: Config) -> AppResult<()> {
    let adapter: Arc<dyn ClusterAdapter> = match &config.dev {
        Some(dev) => Arc::new(DevAdapter::new(dev.rate_ms, dev.lines)),
        None => Arc::new(KubeAdapter::connect().await?),
    };

    // Data-plane: converted entries flowing to the single stdout writer.
    let (tx, rx) = mpsc::unbounded_channel::<OutputRecord>();
    let writer = tokio::spawn(output::stdout::run_writer(rx, config.output.clone()));

    let convert: Converter<OutputRecord> = Arc::new(|entry: LogEntry| OutputRecord {
        ts: entry.timestamp,
        container: entry.container,
        level: entry.level,
        message: entry.message,
    });

    if config.follow {
        let shutdown = Shutdown::new();

        let follower = LogFollower::new(
            adapter,
            config.namespace.clone(),
            config.resources.clone(),
            convert,
            tx,
        )
        .with_settings(FollowerSettings {
            retry_interval: config.retry_interval,
            ..Default::default()
        })
        .with_cancel(shutdown.token());

        let handle = follower.start(FollowOpts {
            tail: config.tail,
            since: config.since,
            limit_bytes: config.limit_bytes,
        });

        tokio::select! {
            _ = shutdown::wait_ctrl_c(&shutdown) => {}
            _ = shutdown::wait_sigterm(&shutdown) => {}
        }

        handle.stop();
        handle.wait().await;
    } else {
        oneshot::collect(
            adapter,
            &config.namespace,
            &config.resources,
            convert,
            &tx,
            OneShotOpts {
                tail: config.tail,
                since: config.since,
                ..Default::default()
            },
        )
        .await?;

        drop(tx);
    }

    match writer.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(AppError::Io(e)),
        Err(e) => Err(AppError::Other(format!("output writer task failed: {e}"))),
    }
}
