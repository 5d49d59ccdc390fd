use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use avatar_session::audio::list_capture_devices;
use avatar_session::avatar::SessionState;
use avatar_session::config::ConfigStore;
use avatar_session::events::SessionEvent;
use avatar_session::state::AppState;

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

/// avatar-session command line arguments
#[derive(Parser, Debug)]
#[command(name = "avatar-session")]
#[command(version, about = "Talk to a remote WebRTC avatar and record speech clips", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the avatar and speak every line read from stdin
    Chat,
    /// Record from the microphone into a WAV file
    Record {
        /// Recording length
        #[arg(short = 's', long, default_value_t = 5)]
        seconds: u64,
        /// Output file
        #[arg(short = 'o', long, value_name = "FILE", default_value = "recording.wav")]
        output: PathBuf,
        /// Send the clip to the transcription endpoint
        #[arg(short = 't', long)]
        transcribe: bool,
    },
    /// List microphones
    Devices,
    /// Print the effective configuration as TOML
    Config {
        /// Write it to the config file instead, creating the file if needed
        #[arg(short = 'w', long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting avatar-session v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config_store = ConfigStore::load(&config_path).await?;

    match args.command {
        Command::Devices => {
            for device in list_capture_devices()? {
                println!(
                    "{:<12} {} (rates: {:?}, mono: {})",
                    device.name, device.description, device.sample_rates, device.mono
                );
            }
            Ok(())
        }
        Command::Config { write } => {
            if write {
                let path = config_store.save().await?;
                eprintln!("Wrote {}", path.display());
            } else {
                print!("{}", config_store.to_toml()?);
            }
            Ok(())
        }
        Command::Chat => {
            let state = AppState::from_config(config_store)?;
            run_chat(state).await
        }
        Command::Record {
            seconds,
            output,
            transcribe,
        } => {
            let state = AppState::from_config(config_store)?;
            run_record(state, seconds, output, transcribe).await
        }
    }
}

async fn run_chat(state: Arc<AppState>) -> anyhow::Result<()> {
    let mut events = state.events.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                SessionEvent::SessionStateChanged { from, to } => {
                    eprintln!("[session] {} -> {}", from, to)
                }
                SessionEvent::SessionError { code, message, .. } => {
                    eprintln!("[error] {}: {}", code, message)
                }
                SessionEvent::Recovery { action, attempt } => {
                    eprintln!("[recovery] {} (attempt {})", action, attempt)
                }
                _ => tracing::debug!("event {}", event.event_name()),
            }
        }
    });

    let result = chat_loop(&state).await;
    state.shutdown().await;
    printer.abort();
    result
}

async fn chat_loop(state: &AppState) -> anyhow::Result<()> {
    let session = &state.session;
    if let Err(e) = session.connect().await {
        if e.is_fatal() {
            for line in session.diagnostics().entries() {
                eprintln!("{}", line);
            }
        }
        return Err(e.into());
    }
    eprintln!("Connected. Type a line to speak it, /stop to interrupt, /diag for diagnostics.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        let result = match line.trim() {
            "" => continue,
            "/stop" => session.stop_speaking().await,
            "/diag" => {
                for entry in session.diagnostics().entries() {
                    println!("{}", entry);
                }
                continue;
            }
            text => session.speak(text).await,
        };
        if let Err(e) = result {
            eprintln!("[error] {}", e);
            if session.state() == SessionState::Closed {
                return Err(session.take_error().unwrap_or(e).into());
            }
        }
    }
    Ok(())
}

async fn run_record(
    state: Arc<AppState>,
    seconds: u64,
    output: PathBuf,
    transcribe: bool,
) -> anyhow::Result<()> {
    let capture = &state.capture;
    let stream = capture.initialize().await?;
    eprintln!(
        "Recording {}s at {}Hz, Ctrl-C to cancel",
        seconds, stream.sample_rate
    );
    capture.start().await?;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {
            capture.cancel().await?;
            eprintln!("Recording cancelled");
            return Ok(());
        }
    }

    let clip = capture.stop().await?;
    tokio::fs::write(&output, clip.to_bytes()).await?;
    eprintln!(
        "Wrote {} ({} bytes, {:.2}s)",
        output.display(),
        clip.byte_len(),
        clip.duration().as_secs_f64()
    );

    if transcribe {
        let transcript = state.session.transcribe(&clip).await?;
        println!("{}", transcript.text);
    }
    Ok(())
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "avatar_session=error,webrtc=error",
        LogLevel::Warn => "avatar_session=warn,webrtc=warn",
        LogLevel::Info => "avatar_session=info,webrtc=warn",
        LogLevel::Verbose => "avatar_session=debug,webrtc=warn",
        LogLevel::Debug => "avatar_session=debug,webrtc=info",
        LogLevel::Trace => "avatar_session=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Default configuration file location
fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("AVATAR_SESSION_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("avatar-session.toml")
}
