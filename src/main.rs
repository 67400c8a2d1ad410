mod client;
mod document;
mod expr;
mod include;
mod protocol;
mod render;
mod sensors;
mod server;
mod socket;
mod store;
mod transport;
mod vars;
mod visibility;

use crate::client::ViewOptions;
use crate::protocol::{Request, cmd};
use crate::server::{RetryPolicy, SensorSource, ServerOptions, SocketServer};
use crate::socket::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SENSOR_PORT};
use crate::store::LayoutStore;
use crate::transport::AsyncConnection;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pagewatch")]
#[command(about = "Live-updating desktop wallpaper overlay service")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the layout server
    Service {
        /// Layout root directory holding the widgets_*.json files
        #[arg(long, env = "PW_ROOT", default_value = ".")]
        root: PathBuf,

        /// TCP port to listen on
        #[arg(long, env = "PW_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Poll this JSON file under the root for sensor telemetry
        #[arg(long)]
        sensors_file: Option<String>,

        /// Connect to a sensor telemetry socket on this host instead
        #[arg(long)]
        sensors_host: Option<String>,

        /// Port of the sensor telemetry socket
        #[arg(long, default_value_t = DEFAULT_SENSOR_PORT)]
        sensors_port: u16,

        /// Attempts for document sends racing a concurrent file write
        #[arg(long, default_value_t = 3)]
        send_retries: u32,

        /// Delay between send attempts in milliseconds
        #[arg(long, default_value_t = 1000)]
        send_retry_delay_ms: u64,

        /// Program spawned for the playSound buttons action
        #[arg(long)]
        sound_player: Option<String>,
    },

    /// Run a headless render client writing the overlay markup to a file
    View {
        /// Service host
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Service port
        #[arg(long, env = "PW_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Screen this client renders
        #[arg(long, default_value_t = 0)]
        screen: i64,

        /// Output file for the overlay markup
        #[arg(long, default_value = "overlay.html")]
        output: PathBuf,
    },

    /// Ask a running service to activate a layout file
    Activate {
        /// Layout filename, e.g. widgets_night.json
        filename: String,

        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        #[arg(long, env = "PW_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Resolve a layout offline and print the flattened document
    Resolve {
        /// Layout filename, e.g. widgets_default.json
        filename: String,

        #[arg(long, env = "PW_ROOT", default_value = ".")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Service {
            root,
            port,
            sensors_file,
            sensors_host,
            sensors_port,
            send_retries,
            send_retry_delay_ms,
            sound_player,
        } => {
            let sensors = match (sensors_file, sensors_host) {
                (Some(filename), _) => SensorSource::File(filename),
                (None, Some(host)) => SensorSource::Socket {
                    host,
                    port: sensors_port,
                },
                (None, None) => SensorSource::Disabled,
            };

            info!(root = %root.display(), port, "starting pagewatch service");

            let options = ServerOptions {
                root,
                port,
                sensors,
                retry: RetryPolicy {
                    attempts: send_retries,
                    delay: Duration::from_millis(send_retry_delay_ms),
                },
                sound_player,
            };

            let mut server = SocketServer::new(options)
                .await
                .context("failed to create server")?;

            if let Err(e) = server.run().await {
                error!("server error: {}", e);
            }
        }

        Commands::View {
            host,
            port,
            screen,
            output,
        } => {
            info!(host = %host, port, screen, "starting render client");
            let options = ViewOptions {
                host,
                port,
                screen,
                output,
            };
            if let Err(e) = client::run_view(options).await {
                error!("render client error: {}", e);
            }
        }

        Commands::Activate {
            filename,
            host,
            port,
        } => {
            let request = Request::with_data(
                cmd::ACTIVATE_FILE,
                serde_json::json!({ "filename": filename }),
            );
            let mut conn = AsyncConnection::connect(&host, port)
                .await
                .context("could not connect. Make sure the service is running: pagewatch service")?;
            conn.write_request(&request)
                .await
                .context("could not send activation request")?;
            println!("Requested activation of {}", filename);
        }

        Commands::Resolve { filename, root } => {
            let store = LayoutStore::new(root);
            let layout = store
                .load_widget_data(&filename)
                .with_context(|| format!("could not resolve {}", filename))?;
            let json = serde_json::to_string_pretty(&layout.document)
                .context("could not serialize document")?;
            println!("{}", json);
        }
    }

    Ok(())
}
