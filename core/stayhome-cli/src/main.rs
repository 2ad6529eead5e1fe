//! stayhome: command-line client for the stayhome daemon.
//!
//! ## Subcommands
//!
//! - `status`, `health`, `stats`: read daemon state
//! - `refresh`, `net-up`, `net-down`: trigger a reconciliation (the `net-*`
//!   forms are meant for NetworkManager dispatcher scripts)
//! - `foreground`: toggle the daemon's connectivity watcher
//! - `register`, `set-home`, `unregister`: manage the home network account

mod daemon_client;
mod logging;
mod render;

use clap::{Args, Parser, Subcommand, ValueEnum};
use stayhome_daemon_protocol::{HomeNetworkParams, Method};

#[derive(Parser)]
#[command(name = "stayhome")]
#[command(about = "Track time at home from Wi-Fi presence")]
#[command(version)]
struct Cli {
    /// Print the raw JSON response instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show registration, current network and presence
    Status,

    /// Check that the daemon is running
    Health,

    /// Observe the network and reconcile now
    Refresh,

    /// Report that a wireless network became available
    NetUp,

    /// Report that the wireless link was lost
    NetDown,

    /// Enter or leave foreground mode
    Foreground {
        #[arg(value_enum)]
        mode: ForegroundMode,
    },

    /// Register the current (or given) network as home
    Register(NetworkArgs),

    /// Change the home network
    SetHome(NetworkArgs),

    /// Delete the registered user and forget local state
    Unregister,

    /// Show this week's hours at home
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum ForegroundMode {
    On,
    Off,
}

#[derive(Args)]
struct NetworkArgs {
    /// Home SSID; defaults to the network the daemon currently sees
    #[arg(long, requires = "bssid")]
    ssid: Option<String>,

    /// Home BSSID (AA:BB:CC:DD:EE:FF)
    #[arg(long, requires = "ssid")]
    bssid: Option<String>,
}

impl NetworkArgs {
    fn into_params(self) -> Result<Option<serde_json::Value>, String> {
        let params = HomeNetworkParams {
            ssid: self.ssid,
            bssid: self.bssid,
        };
        if params.is_empty() {
            return Ok(None);
        }
        params
            .validate()
            .map_err(|err| format!("{}: {}", err.code, err.message))?;
        serde_json::to_value(params)
            .map(Some)
            .map_err(|err| format!("Failed to encode network: {}", err))
    }
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => println!("{}", output),
        Err(err) => {
            tracing::error!(error = %err, "stayhome command failed");
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, String> {
    let (method, params) = match cli.command {
        Commands::Status => (Method::GetStatus, None),
        Commands::Health => (Method::GetHealth, None),
        Commands::Refresh => (Method::Refresh, None),
        Commands::NetUp => (Method::NetworkAvailable, None),
        Commands::NetDown => (Method::NetworkLost, None),
        Commands::Foreground { mode } => (
            Method::SetForeground,
            Some(serde_json::json!({ "foreground": matches!(mode, ForegroundMode::On) })),
        ),
        Commands::Register(args) => (Method::RegisterHome, args.into_params()?),
        Commands::SetHome(args) => (Method::UpdateHome, args.into_params()?),
        Commands::Unregister => (Method::DeleteUser, None),
        Commands::Stats => (Method::GetWeeklyStats, None),
    };

    tracing::debug!(?method, "Sending daemon request");
    let data = daemon_client::call(method, params).map_err(|err| err.to_string())?;

    if cli.json {
        return serde_json::to_string_pretty(&data)
            .map_err(|err| format!("Failed to format response: {}", err));
    }
    Ok(render::summary(method, &data))
}
