use std::io::{self, Write};

use tokio::sync::mpsc;

use crate::config::{OutputConfig, OutputMode};
use crate::output::format::LineFormatter;
use crate::types::OutputRecord;

/// Single stdout writer draining the consumer channel. A broken pipe (pager
/// closed, `head`, ...) ends the run cleanly.
pub async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<OutputRecord>,
    output: OutputConfig,
) -> io::Result<()> {
    let stdout = io::stdout();

    let formatter = LineFormatter::new(output.human.clone());

    while let Some(record) = rx.recv().await {
        let mut out = stdout.lock();
        let write_result: io::Result<()> = match output.mode {
            OutputMode::Human => {
                let line = formatter.format_human(&record);
                out.write_all(line.as_bytes())
                    .and_then(|_| out.write_all(b"\n"))
            }
            OutputMode::Json => serde_json::to_writer(&mut out, &record)
                .map_err(io::Error::other)
                .and_then(|_| out.write_all(b"\n")),
        };

        if let Err(e) = write_result {
            if e.kind() == io::ErrorKind::BrokenPipe {
                return Ok(());
            }
            return Err(e);
        }
    }

    stdout.lock().flush()
}
