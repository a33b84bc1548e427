mod api_commands;
mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::api_commands::{ApiClient, DEFAULT_API_URL};

#[derive(Parser)]
#[command(name = "courier", about = "Courier: relay text and media to WhatsApp channels")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Custom config directory (overrides default ~/.config/courier/).
    #[arg(long, global = true, env = "COURIER_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory (overrides default data dir).
    #[arg(long, global = true, env = "COURIER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL of a running gateway, used by the client commands.
    #[arg(long, global = true, env = "COURIER_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Send a text message. Without TEXT, every stdin line is sent.
    SendText { channel: String, text: Option<String> },
    /// Send a local image, audio or video file, converting it first when needed.
    SendMedia {
        file: PathBuf,
        channel: String,
        /// image, audio or video.
        message_type: String,
        caption: Option<String>,
    },
    /// List the channels the gateway can post to.
    Channels,
    /// Show whether the WhatsApp session is ready.
    Status,
    /// Validate the configuration file and report errors/warnings.
    CheckConfig {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    // Apply directory overrides before loading config
    if let Some(ref dir) = cli.config_dir {
        courier_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        courier_config::set_data_dir(dir.clone());
    }

    let api = ApiClient::new(&cli.api_url);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(version = env!("CARGO_PKG_VERSION"), "courier starting");

            let mut config = courier_config::discover_and_load();
            if let Some(bind) = cli.bind {
                config.server.bind = bind;
            }
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            courier_gateway::start_gateway(config).await
        },
        Commands::SendText { channel, text } => {
            api_commands::send_text(&api, &channel, text).await
        },
        Commands::SendMedia {
            file,
            channel,
            message_type,
            caption,
        } => {
            let config = courier_config::discover_and_load();
            api_commands::send_media(
                &api,
                &config.transcode,
                &file,
                &channel,
                &message_type,
                caption.as_deref(),
            )
            .await
        },
        Commands::Channels => api_commands::channels(&api).await,
        Commands::Status => api_commands::status(&api).await,
        Commands::CheckConfig { verbose } => config_commands::check(verbose),
    }
}
