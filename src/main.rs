use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};
use wechat_rust::{logging, Client, FileCredentialStore, CredentialStore, EventPayload, WechatConfig};

/// WeChat Web bot: logs in, then logs every event it receives.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the session cache directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and run the event loop until Ctrl-C.
    Run {
        /// Emit a timer event at this interval, e.g. `60s` or `1500ms`.
        #[arg(long, value_parser = parse_interval)]
        timer: Vec<Duration>,
        /// Emit a timing event daily at this local time, e.g. `09:00`.
        #[arg(long)]
        timing: Vec<String>,
    },
    /// Delete the cached session.
    Logout,
    /// Print the effective configuration.
    ShowConfig,
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval {raw:?}"))?;
    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        other => return Err(format!("unknown unit {other:?} in {raw:?}")),
    };
    if duration.is_zero() {
        return Err("interval must be positive".to_string());
    }
    Ok(duration)
}

fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::NewMessage(msg) => format!(
            "{} -> {}: {}{}",
            msg.sender_user_name,
            msg.to_user_name,
            msg.content,
            if msg.at_me { " (@me)" } else { "" }
        ),
        EventPayload::ContactChange(change) => {
            format!("{:?} {}", change.kind, change.contact.user_name)
        }
        EventPayload::TimerTick(tick) => format!("tick #{}", tick.count),
        EventPayload::TimingTick(tick) => format!("timing #{}", tick.count),
        EventPayload::LoginChange(change) => format!("logged in: {}", change.logged_in),
        EventPayload::Control(signal) => format!("{signal:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();
    let cli = Cli::parse();

    let (mut config, source) = WechatConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config = config.with_cache_dir(dir);
    }
    match &source {
        Some(path) => info!("using config {}", path.display()),
        None => info!("no config file found, using defaults"),
    }

    match cli.command {
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
        Commands::Logout => {
            FileCredentialStore::new(config.cache_dir.clone()).invalidate()?;
            println!("Cached session removed.");
        }
        Commands::Run { timer, timing } => {
            let client = Arc::new(Client::new(config)?);
            client.set_hook(|event| {
                info!("[{}] {} {}", event.source, event.path, describe(&event.payload));
            });
            for interval in timer {
                let path = client.add_timer(interval)?;
                info!("timer registered on {path}");
            }
            for hm in timing {
                let path = client.add_timing(&hm)?;
                info!("timing registered on {path}");
            }

            let stopper = Arc::clone(&client);
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupted, stopping");
                        stopper.stop();
                    }
                    Err(err) => warn!("cannot listen for Ctrl-C: {err}"),
                }
            });

            client.start()?;
            client.run().await?;
        }
    }

    Ok(())
}
