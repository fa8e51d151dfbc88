//! Main Entrypoint for the RTVI Console Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Starting a session (HTTP handshake, or a pre-provisioned room).
//! 3. Printing what the bot says and does.
//! 4. Reading console commands until `quit`, EOF or `Ctrl+C`.

use anyhow::Context;
use clap::Parser;
use rtvi_cli::{
    config::{CliConfig, parse_pipeline, parse_timeout},
    console,
};
use rtvi_core::{
    ClientOptions, ConnectionDescriptor, EventCallbacks, Participant, SessionClient,
    StaticHandshake, transport::MockTransport,
};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt::time::ChronoLocal};

/// Talk to an RTVI voice agent from the terminal.
#[derive(Parser, Debug)]
#[command(name = "rtvi")]
#[command(version)]
struct Args {
    /// Base URL of the authenticate/start_bot endpoints (overrides RTVI_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Handshake timeout in seconds, 0 to disable (overrides RTVI_TIMEOUT_SECS)
    #[arg(long)]
    timeout: Option<String>,

    /// Initial pipeline configuration as JSON (overrides RTVI_CONFIG)
    #[arg(long)]
    config: Option<String>,

    /// Join this pre-provisioned room instead of authenticating
    #[arg(long, requires = "token")]
    room: Option<String>,

    /// Token for --room
    #[arg(long, requires = "room")]
    token: Option<String>,

    /// Start with the microphone off
    #[arg(long)]
    no_mic: bool,

    /// Use an in-memory transport with a simulated bot; nothing leaves the machine
    #[arg(long)]
    offline: bool,
}

fn apply_args(mut config: CliConfig, args: &Args) -> anyhow::Result<CliConfig> {
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(raw) = &args.timeout {
        config.timeout =
            Some(parse_timeout(raw).with_context(|| format!("invalid --timeout '{raw}'"))?);
    }
    if let Some(raw) = &args.config {
        config.pipeline = parse_pipeline(raw)
            .map_err(anyhow::Error::msg)
            .context("invalid --config")?;
    }
    if let (Some(url), Some(token)) = (&args.room, &args.token) {
        config.room = Some(ConnectionDescriptor {
            url: url.clone(),
            token: token.clone(),
        });
    }
    if args.no_mic {
        config.enable_mic = false;
    }
    Ok(config)
}

fn callbacks() -> EventCallbacks {
    EventCallbacks::default()
        .on_transport_state_changed(|state| info!(%state, "Transport state changed."))
        .on_bot_connected(|bot| println!("* {} joined", bot.name))
        .on_bot_disconnected(|bot| println!("* {} left", bot.name))
        .on_transcript(|transcript| {
            if transcript.is_final {
                println!("> {}", transcript.text);
            }
        })
        .on_llm_context(|context| {
            let pretty = serde_json::to_string_pretty(context).unwrap_or_default();
            println!("llm context:\n{pretty}");
        })
        .on_bot_config_updated(|config| info!(?config, "Bot applied configuration."))
        .on_config_error(|reason| println!("! config rejected: {reason}"))
        .on_tool_call(|call| println!("* tool call {}({})", call.name, call.args))
        .on_json_completion(|json| println!("json: {json}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let args = Args::parse();
    let config = CliConfig::from_env().context("Failed to load configuration")?;
    let config = apply_args(config, &args)?;

    // --- 2. Initialize Logging ---
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::rfc_3339())
        .init();
    info!(base_url = %config.base_url, "Configuration loaded.");

    // --- 3. Build the Session ---
    let mut options = ClientOptions::new(config.base_url.clone())
        .with_config(config.pipeline.clone())
        .with_callbacks(callbacks())
        .with_mic(config.enable_mic);
    if let Some(timeout) = config.timeout.filter(|t| !t.is_zero()) {
        options = options.with_timeout(timeout);
    }

    let offline = args.offline.then(MockTransport::new);
    let client = match &offline {
        Some(transport) => {
            info!("Offline mode: using the in-memory transport.");
            SessionClient::with_transport(options, Box::new(transport.clone())).with_handshake(
                StaticHandshake::new(ConnectionDescriptor {
                    url: "offline://local".into(),
                    token: "offline".into(),
                }),
            )
        }
        None => {
            let client = SessionClient::new(options);
            match config.room.clone() {
                Some(room) => client.with_handshake(StaticHandshake::new(room)),
                None => client,
            }
        }
    };

    // --- 4. Start and Run the Console ---
    tokio::select! {
        started = client.start() => started.context("Failed to start session")?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted during start.");
            client.disconnect().await?;
            return Ok(());
        }
    }
    if let Some(transport) = &offline {
        transport.join_bot(&Participant::new("bot", "Offline Agent", false));
    }
    println!("{}", console::HELP);

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console::run(&client, stdin) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal. Disconnecting...");
        }
    }

    client.disconnect().await?;
    info!("Session closed.");
    Ok(())
}
