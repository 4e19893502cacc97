use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use speedtestlog::config::Config;
use speedtestlog::daemon::Daemon;
use speedtestlog::speedtest::RunOutcome;
use speedtestlog::storage::{self, settings};

#[derive(Parser)]
#[command(
    name = "speedtestlog",
    about = "Scheduled internet speed tests and ping watchdog",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduler + watchdog)
    Serve {
        /// Bind address, overrides the configuration file
        #[arg(long, env = "SPEEDTESTLOG_BIND")]
        bind: Option<String>,
    },

    /// Run one speed test now and store the result
    SpeedTest {
        /// Ookla server id; defaults to the configured server
        #[arg(long)]
        server_id: Option<i64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Take one watchdog sample (not stored)
    Ping {
        /// Host or IP; defaults to the configured target
        #[arg(long)]
        target: Option<String>,
    },

    /// List nearby speed test servers
    Servers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // Config fallbacks are logged before the configured subscriber exists.
    let mut config = tracing::subscriber::with_default(speedtestlog::bootstrap_subscriber(), || {
        Config::resolve(cli.config.as_deref())
    })?;
    speedtestlog::init_logging(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting SpeedtestLog daemon");
            speedtestlog::serve(config).await?;
        }
        Commands::SpeedTest { server_id, json } => {
            let daemon = open_daemon(config)?;
            let server_id = match server_id {
                Some(id) => Some(id),
                None => settings::load_settings(&daemon.pool)?.selected_server_id,
            };
            match daemon.speedtest.run(server_id, None).await? {
                RunOutcome::Completed(r) if json => println!("{}", serde_json::to_string_pretty(&r)?),
                RunOutcome::Completed(r) => {
                    println!("\nSpeedtestLog Result");
                    println!("{:<12} {:>10.2} Mbps", "Download", r.download);
                    println!("{:<12} {:>10.2} Mbps", "Upload", r.upload);
                    println!("{:<12} {:>10.2} ms (jitter {:.2} ms)", "Ping", r.ping, r.jitter);
                    if let Some(name) = &r.server_name {
                        println!("{:<12} {} ({})", "Server", name, r.server_location.as_deref().unwrap_or("?"));
                    }
                    if let Some(url) = &r.result_url {
                        println!("{:<12} {}", "Result", url);
                    }
                }
                RunOutcome::Rejected => anyhow::bail!("a speed test is already running"),
            }
        }
        Commands::Ping { target } => {
            let daemon = open_daemon(config)?;
            let target = match target {
                Some(t) => t,
                None => settings::load_settings(&daemon.pool)?.ping_target,
            };
            let report = daemon.watchdog.probe(&target).await?;
            let state = if report.online { "ONLINE" } else { "OFFLINE" };
            match report.latency {
                Some(ms) => println!("{target}: {state}, {ms:.1} ms, {:.0}% loss", report.packet_loss),
                None => println!("{target}: {state}, {:.0}% loss", report.packet_loss),
            }
        }
        Commands::Servers => {
            let daemon = open_daemon(config)?;
            let servers = daemon.servers.closest_servers().await?;
            println!("{}", serde_json::to_string_pretty(&servers)?);
        }
    }

    Ok(())
}

fn open_daemon(config: Config) -> Result<Daemon> {
    let pool = storage::open_pool(&config.storage.db_path)?;
    Daemon::new(config, pool)
}
