use clap::Parser;

use podtail::cli::Cli;
use podtail::config::Config;

#[tokio::main]
async fn main() -> podtail::errors::AppResult<()> {
    let cli = Cli::parse();

    podtail::logging::init(cli.verbose);

    let config = Config::try_from(cli)?;

    podtail::run(config).await
}
