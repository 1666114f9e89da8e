use clap::Parser;
use tracing::{error, info, Level};
use zcms::*;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// configuration file path, by default $HOME/.zcms/zcms.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Run first-run initialization even if the database is already set up
    #[clap(long)]
    init: bool,

    /// Generate a new token signing secret, logging out every session
    #[clap(long)]
    revoke_jwt_secret: bool,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ZcmsConfig::new(&cli.config)?;
    info!("Configuration:\n{}", config.summary());

    let options = StartupOptions {
        force_init: cli.init,
        revoke_jwt_secret: cli.revoke_jwt_secret,
        signal_timeout: config.signal_timeout(),
    };
    let report = launch(&config, options)?.run().await?;

    info!(
        "zcms {} started (schema {}) on http://{}",
        env!("CARGO_PKG_VERSION"),
        describe(report.schema),
        report.address
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .init();

    if let Err(e) = run(cli).await {
        error!("Startup failed: {:#}", e);
        std::process::exit(1);
    }
}
