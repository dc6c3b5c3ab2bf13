use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rtgen_client::api::ApiClient;
use rtgen_client::config::{ClientConfig, ConfigStore};
use rtgen_client::events::{EventBus, SessionEvent};
use rtgen_client::pipeline::{PipelineController, PipelineParameterUpdate};
use rtgen_client::webrtc::track::new_stream_id;
use rtgen_client::webrtc::{IvfVideoSource, StartOptions, StreamSession, TransportKind};

/// Default config file, relative to the working directory
const DEFAULT_CONFIG_PATH: &str = "rtgen.json";

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// rtgen command line arguments
#[derive(Parser, Debug)]
#[command(name = "rtgen")]
#[command(
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_DATE"), ")"),
    about = "Client for real-time video generation backends",
    long_about = None
)]
struct CliArgs {
    /// Config file path
    #[arg(short = 'c', long, value_name = "FILE", env = "RTGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Backend base URL (overrides config)
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Relay base URL (overrides config)
    #[arg(long, value_name = "URL")]
    relay_url: Option<String>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show pipeline status
    Status,
    /// Show backend hardware info
    Hardware,
    /// Check or download pipeline models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Load a pipeline
    Load {
        /// Pipeline id (defaults to pipeline.default_pipeline_id)
        #[arg(short, long)]
        pipeline: Option<String>,
        /// Load parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Download models first if needed
        #[arg(long)]
        ensure_models: bool,
        /// Wait until the pipeline is loaded
        #[arg(long)]
        wait: bool,
    },
    /// Send a parameter update over HTTP
    Update {
        /// Update as a JSON object
        #[arg(long, value_name = "JSON", conflicts_with = "prompt")]
        params: Option<String>,
        /// Replace the prompt list with a single prompt
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Start a streaming session
    ///
    /// Lines on stdin are sent as parameter updates: a JSON object as-is,
    /// anything else as a new prompt.
    Stream {
        /// Use the relay (WHEP) transport
        #[arg(long)]
        relay: bool,
        /// VP8 IVF file to send; receive-only when omitted
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
        /// Initial parameters as a JSON object
        #[arg(long, value_name = "JSON")]
        params: Option<String>,
        /// Seconds between statistics lines (0 disables)
        #[arg(long, default_value_t = 5)]
        stats_interval: u64,
    },
    /// Inspect or write the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ModelsAction {
    /// Report whether models are downloaded
    Check {
        #[arg(short, long)]
        pipeline: String,
    },
    /// Download models (skipped if present)
    Download {
        #[arg(short, long)]
        pipeline: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    init_logging(args.log_level, args.verbose, args.log_json);

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let store = ConfigStore::open(&config_path).await?;

    let mut config = (*store.get()).clone();
    config.apply_env_overrides();
    if let Some(url) = args.backend_url.clone() {
        config.backend.base_url = url;
    }
    if let Some(url) = args.relay_url.clone() {
        config.relay.base_url = Some(url);
    }
    tracing::debug!("Backend: {}", config.backend.base_url);

    let api = ApiClient::new(&config)?;
    run_command(args.command, api, &store, &config).await
}

async fn run_command(
    command: Command,
    api: ApiClient,
    store: &ConfigStore,
    config: &ClientConfig,
) -> anyhow::Result<()> {
    let pipelines = PipelineController::new(api.clone(), &config.pipeline);

    match command {
        Command::Status => {
            let status = api.get_pipeline_status().await?.into_value()?;
            print_json(&status)?;
        }
        Command::Hardware => {
            let info = api.get_hardware_info().await?.into_value()?;
            print_json(&info)?;
        }
        Command::Models { action } => match action {
            ModelsAction::Check { pipeline } => {
                let status = api.check_model_status(&pipeline).await?.into_value()?;
                print_json(&status)?;
            }
            ModelsAction::Download { pipeline } => {
                if pipelines.ensure_models(&pipeline).await? {
                    println!("Models for {} downloaded", pipeline);
                } else {
                    println!("Models for {} already present", pipeline);
                }
            }
        },
        Command::Load {
            pipeline,
            params,
            ensure_models,
            wait,
        } => {
            let pipeline = pipeline.or_else(|| config.pipeline.default_pipeline_id.clone());
            let load_params = params.as_deref().map(parse_json).transpose()?;

            if ensure_models {
                let id = pipeline
                    .as_deref()
                    .context("--ensure-models needs a pipeline id")?;
                pipelines.ensure_models(id).await?;
            }

            if wait {
                let status = pipelines
                    .load_and_wait(pipeline.as_deref(), load_params)
                    .await?;
                print_json(&serde_json::to_value(status)?)?;
            } else {
                let request = rtgen_client::api::LoadPipelineRequest {
                    pipeline_id: pipeline,
                    load_params,
                };
                let ack = api.load_pipeline(&request).await?.into_value()?;
                print_json(&ack)?;
            }
        }
        Command::Update { params, prompt } => {
            let update = match (params, prompt) {
                (Some(json), _) => parse_update(&json)?,
                (None, Some(prompt)) => PipelineParameterUpdate::prompt(prompt),
                (None, None) => anyhow::bail!("nothing to update, pass --params or --prompt"),
            };
            if update.is_empty() {
                println!("Empty update, nothing sent");
                return Ok(());
            }
            let ack = api.update_pipeline_parameters(&update).await?.into_value()?;
            print_json(&ack)?;
        }
        Command::Stream {
            relay,
            input,
            params,
            stats_interval,
        } => {
            let initial = params.as_deref().map(parse_update).transpose()?;
            let transport = if relay || config.relay.use_by_default {
                TransportKind::Relay
            } else {
                TransportKind::Direct
            };
            run_stream(api, config, transport, input, initial, stats_interval).await?;
        }
        Command::Config { action } => run_config(action, store, config).await?,
    }

    Ok(())
}

async fn run_stream(
    api: ApiClient,
    config: &ClientConfig,
    transport: TransportKind,
    input: Option<PathBuf>,
    initial_parameters: Option<PipelineParameterUpdate>,
    stats_interval: u64,
) -> anyhow::Result<()> {
    let events = EventBus::new();
    let session = StreamSession::new(api, config.webrtc.clone(), events.clone());
    let cancel = CancellationToken::new();

    let mut event_rx = events.subscribe();
    let event_cancel = cancel.clone();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match &event {
                SessionEvent::Notification { level, message } => {
                    eprintln!("[{:?}] {}", level, message)
                }
                SessionEvent::StreamStopped { .. } => {
                    eprintln!("Stream stopped by backend");
                    event_cancel.cancel();
                }
                other => tracing::info!("{}: {:?}", other.event_name(), other),
            }
        }
    });

    let source = match input {
        Some(path) => Some(IvfVideoSource::open(&path, &new_stream_id())?),
        None => None,
    };

    session
        .start(StartOptions {
            transport,
            local_stream: source.as_ref().map(|s| s.local_stream()),
            initial_parameters,
        })
        .await?;

    if let Some(source) = source {
        let source_cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = source.run(source_cancel).await {
                tracing::warn!("Video source stopped: {}", e);
            }
        });
    }

    eprintln!("Streaming; type a prompt or a JSON update, Ctrl-C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats_tick = tokio::time::interval(Duration::from_secs(stats_interval.max(1)));
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = cancel.cancelled() => break,
            _ = stats_tick.tick(), if stats_interval > 0 => {
                if let Some(monitor) = session.remote_video() {
                    let stats = monitor.stats();
                    eprintln!(
                        "{} | {} frames, {:.1} fps, {} KiB",
                        session.status().connection_state,
                        stats.frames,
                        stats.fps,
                        stats.bytes / 1024
                    );
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match parse_stdin_update(line) {
                            Ok(update) => match session.send_parameter_update(&update).await {
                                Ok(true) => tracing::debug!("Update sent"),
                                Ok(false) => eprintln!("Update not sent"),
                                Err(e) => eprintln!("Update failed: {}", e),
                            },
                            Err(e) => eprintln!("Invalid update: {}", e),
                        }
                    }
                    // stdin closed; keep streaming until Ctrl-C
                    None => stdin_open = false,
                }
            }
        }
    }

    cancel.cancel();
    session.stop().await;
    Ok(())
}

async fn run_config(
    action: ConfigAction,
    store: &ConfigStore,
    effective: &ClientConfig,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => print_json(&serde_json::to_value(effective)?)?,
        ConfigAction::Init { force } => {
            let path = store.path().to_path_buf();
            if path.exists() && !force {
                anyhow::bail!("{} exists, use --force to overwrite", path.display());
            }
            store.set(ClientConfig::default()).await?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn parse_stdin_update(line: &str) -> anyhow::Result<PipelineParameterUpdate> {
    if line.starts_with('{') {
        parse_update(line)
    } else {
        Ok(PipelineParameterUpdate::prompt(line))
    }
}

fn parse_update(text: &str) -> anyhow::Result<PipelineParameterUpdate> {
    Ok(PipelineParameterUpdate::from_value(parse_json(text)?)?)
}

fn parse_json(text: &str) -> anyhow::Result<Value> {
    serde_json::from_str(text).with_context(|| format!("invalid JSON: {}", text))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Initialize logging with the given level and verbosity
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "rtgen_client=error,rtgen=error,webrtc=error",
        LogLevel::Warn => "rtgen_client=warn,rtgen=warn,webrtc=error",
        LogLevel::Info => "rtgen_client=info,rtgen=info,webrtc=warn",
        LogLevel::Verbose => "rtgen_client=debug,rtgen=debug,webrtc=warn",
        LogLevel::Debug => "rtgen_client=debug,rtgen=debug,webrtc=info",
        LogLevel::Trace => "rtgen_client=trace,rtgen=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
