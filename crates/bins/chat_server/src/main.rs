use chat::{ChatServer, ServerConfig};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;
use tokio::time::MissedTickBehavior;

// =================================================================================================
//                                     COMMAND LINE ARGUMENTS
// =================================================================================================

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured UDP port.
    #[arg(short, long)]
    port: Option<u16>,
}

// =================================================================================================
//                                          ENTRYPOINT
// =================================================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => chat::config::load::<ServerConfig>(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    let mut server = match ChatServer::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return Err(e.into());
        }
    };

    let mut ticker = tokio::time::interval(config.tick());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut roster_version = server.roster().version();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                server.tick(Instant::now());
                report_roster(&server, &mut roster_version);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down with {} open connection(s)", server.connection_count());
                break;
            }
        }
    }

    Ok(())
}

// =================================================================================================
//                                           REPORTING
// =================================================================================================

fn report_roster<T: chat::ServerTransport>(server: &ChatServer<T>, seen: &mut u64) {
    let roster = server.roster();
    if roster.version() == *seen {
        return;
    }
    *seen = roster.version();
    if roster.names().is_empty() {
        info!("Connected players: (none)");
    } else {
        info!("Connected players: {}", roster.names().join(", "));
    }
}
