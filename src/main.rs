//! Binary entrypoint for the MeshUpGrade CLI.
//!
//! Commands:
//! - `start [--tcp <addr> | --serial [<path>]]` - connect to the node and run the station
//! - `init` - create a starter `config.toml`
//! - `probe [--tcp <addr> | --serial [<path>]]` - connect once and print a JSON summary
//! - `test-alert --message <text>` - broadcast a test alert on the alert channel
//!
//! See the library crate docs for module-level details: `meshupgrade::`.
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;

use meshupgrade::bot::{Station, WeatherProvider};
use meshupgrade::config::Config;
use meshupgrade::connection::ConnectionDescriptor;
use meshupgrade::meshtastic::StreamTransport;

#[derive(Parser)]
#[command(name = "meshupgrade")]
#[command(about = "Control link, command bot and weather alerts for a Meshtastic node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Default)]
struct LinkArgs {
    /// Node address (host or host:port); overrides the config file
    #[arg(long, conflicts_with = "serial")]
    tcp: Option<String>,

    /// Serial device path; with no value the first USB serial device is used
    #[arg(long, num_args = 0..=1, default_missing_value = "auto")]
    serial: Option<String>,
}

impl LinkArgs {
    fn descriptor(&self) -> Option<ConnectionDescriptor> {
        if let Some(addr) = &self.tcp {
            return Some(ConnectionDescriptor::tcp(addr.clone()));
        }
        self.serial.as_ref().map(|p| ConnectionDescriptor::serial(p.clone()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the node and run the station until Ctrl-C
    Start {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Write a default configuration file
    Init,
    /// Connect, print node identity, channels and node count as JSON, then exit
    Probe {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Broadcast a test alert on the configured alert channel
    TestAlert {
        /// Alert text
        #[arg(short, long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        if std::path::Path::new(&cli.config).exists() {
            warn!("{} already exists; leaving it unchanged", cli.config);
            return Ok(());
        }
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        Commands::Start { link } => {
            info!("Starting MeshUpGrade v{}", env!("CARGO_PKG_VERSION"));
            let mut station = build_station(config).with_config_path(cli.config.clone());
            station.connect(link.descriptor()).await?;
            station.run().await?;
        }
        Commands::Probe { link } => {
            let mut station = build_station(config);
            let status_ok = match station.connect(link.descriptor()).await {
                Ok(()) => station.connection().is_connected(),
                Err(e) => {
                    error!("{}", e);
                    false
                }
            };
            println!("{}", station.probe_summary());
            station.connection().close().await;
            std::process::exit(if status_ok { 0 } else { 1 });
        }
        Commands::TestAlert { message } => {
            let mut station = build_station(config);
            station.connect(None).await?;
            let sent = station.send_test_alert(&message).await;
            station.connection().close().await;
            match sent {
                Ok(()) => info!("Test alert sent"),
                Err(e) => {
                    error!("Test alert failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Init => {}
    }

    Ok(())
}

fn build_station(config: Config) -> Station {
    let transport = Arc::new(StreamTransport::from_config(&config));
    let weather = weather_provider(&config);
    Station::new(config, transport, weather)
}

#[cfg(feature = "weather")]
fn weather_provider(config: &Config) -> Option<Arc<dyn WeatherProvider>> {
    use meshupgrade::bot::weather::OpenMeteoWeather;
    if !config.weather.enabled && !config.weather.alerts_enabled {
        return None;
    }
    Some(Arc::new(OpenMeteoWeather::new(&config.weather)))
}

#[cfg(not(feature = "weather"))]
fn weather_provider(config: &Config) -> Option<Arc<dyn WeatherProvider>> {
    if config.weather.enabled || config.weather.alerts_enabled {
        warn!("Weather is enabled in config but this build lacks the 'weather' feature");
    }
    None
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Console mirror only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
