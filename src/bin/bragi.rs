//! bragi: speech broker CLI
//!
//! Synthesize text through a configured generation service, inspect its
//! voices and manage the audio cache.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;

use bragi::{BrokerConfig, SpeechBroker};
use clap::{Parser, Subcommand};

/// Bragi speech broker CLI
#[derive(Parser)]
#[command(name = "bragi")]
#[command(version = bragi::PKG_VERSION)]
#[command(about = "Speech generation broker")]
struct Args {
    /// Config file (default: ~/.bragi/config.toml, then /etc/bragi/config.toml)
    #[arg(short, long, env = "BRAGI_CONFIG")]
    config: Option<PathBuf>,

    /// Override the generation service URL
    #[arg(long, env = "BRAGI_API_URL")]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synthesize text and write raw PCM (s16le, 22050 Hz, mono)
    Speak {
        /// Text to speak (or omit to read from stdin)
        text: Option<String>,
        /// Voice to use
        #[arg(short, long)]
        voice: String,
        /// Speaker name or numeric id
        #[arg(short, long, default_value = "0")]
        speaker: String,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Send the text as-is instead of normalizing it
        #[arg(long)]
        raw: bool,
    },

    /// List voices, optionally downloading missing ones
    Voices {
        /// Voices that must be available
        #[arg(long = "ensure", value_name = "VOICE")]
        ensure: Vec<String>,
    },

    /// Delete every cached clip
    ClearCache,

    /// Print version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    if let Command::Version = args.command {
        println!("bragi {}", bragi::version_string());
        println!("built {}", bragi::version::BUILD_TIMESTAMP);
        return Ok(());
    }

    let mut config = BrokerConfig::load(args.config.as_deref())?;
    if let Some(url) = args.api_url {
        config = config.api_url(url);
    }
    // The CLI lives for one command; disk caches must outlive it.
    config.cache.persist_across_sessions = true;
    let broker = SpeechBroker::new(config)?;

    match args.command {
        Command::Speak {
            text,
            voice,
            speaker,
            output,
            raw,
        } => {
            let text = text_or_stdin(text)?;
            let audio = if raw {
                broker.synthesize(&voice, &speaker, &text).await?
            } else {
                broker.speak(&voice, &speaker, &text).await?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, &audio)?;
                    eprintln!(
                        "wrote {} bytes ({:.2}s) to {}",
                        audio.len(),
                        bragi::pcm::duration_secs(&audio),
                        path.display()
                    );
                }
                None => io::stdout().write_all(&audio)?,
            }
        }

        Command::Voices { ensure } => {
            if !ensure.is_empty() {
                for voice in broker.ensure_voices(&ensure).await? {
                    println!("downloaded {voice}");
                }
            }
            for voice in broker.voices().await? {
                println!("{voice}");
            }
        }

        Command::ClearCache => {
            let cleared = broker.cached_clips();
            broker.clear_cache();
            println!("cleared {cleared} cached clips");
        }

        Command::Version => {}
    }

    Ok(())
}

/// Use `arg` if given, otherwise read all of stdin.
fn text_or_stdin(arg: Option<String>) -> io::Result<String> {
    if let Some(text) = arg {
        return Ok(text);
    }
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "no text given and stdin is a terminal",
        ));
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    Ok(text.trim().to_string())
}
