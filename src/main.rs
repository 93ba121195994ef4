use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use spare_cycles::backend::HttpChatBackend;
use spare_cycles::config::load_config;
use spare_cycles::logging::setup_logging;
use spare_cycles::session::ChatSession;
use spare_cycles::telemetry::TelemetryClient;
use spare_cycles::types::{Role, Turn, TurnPhase};

// Define the application arguments
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Base URL of the chat backend
    #[arg(long)]
    backend_url: Option<String>,

    /// WebSocket URL of the telemetry feed
    #[arg(long)]
    telemetry_url: Option<String>,

    /// Model name to use (defaults to the first model the backend lists)
    #[arg(short = 'm', long)]
    model: Option<String>,

    /// Disable the telemetry connection
    #[arg(long)]
    no_telemetry: bool,

    /// Enable verbose logging (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let mut config = load_config().context("Failed to load configuration")?;
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }
    if let Some(url) = args.telemetry_url {
        config.telemetry_url = url;
    }

    let backend = Arc::new(HttpChatBackend::new(config.backend_url.clone()));

    let model = match args.model.or(config.model.clone()) {
        Some(model) => model,
        None => {
            let models = backend
                .list_models()
                .await
                .context("Failed to list models from the backend")?;
            models
                .first()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Backend offers no models"))?
        }
    };
    println!("Using model: {model}");

    let telemetry = TelemetryClient::new(config.telemetry_url.clone(), config.reconnect_delay());
    if !args.no_telemetry {
        telemetry.connect();
    }

    let printer = StreamPrinter::new();
    let session = ChatSession::new(backend.clone(), model).with_observer(printer.observer());

    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("you> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match line {
                    "/quit" | "/exit" => break,
                    "/status" => print_status(&backend, &telemetry).await,
                    "/models" => match backend.list_models().await {
                        Ok(models) => {
                            for id in models {
                                println!("  {id}");
                            }
                        }
                        Err(e) => eprintln!("Could not list models: {e}"),
                    },
                    text => {
                        printer.reset();
                        if let Err(e) = session.submit(text) {
                            eprintln!("Not submitted: {e}");
                            continue;
                        }
                        session.wait_idle().await;
                        println!();
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        }
    }

    session.cancel();
    telemetry.dispose();
    Ok(())
}

async fn print_status(backend: &HttpChatBackend, telemetry: &TelemetryClient) {
    match backend.health().await {
        Ok(health) => {
            let status = if health.online { "online" } else { "offline" };
            println!("Backend: {status} ({})", health.message);
        }
        Err(e) => println!("Backend: unreachable ({e})"),
    }
    println!("Telemetry: {:?}", telemetry.state());
    if let Some(snapshot) = telemetry.latest_snapshot() {
        println!(
            "  {} | util {:.1}% | {:.0}\u{b0}C | mem {}/{} MB | {:.0}/{:.0} W | fan {:.0}%",
            snapshot.gpu_name,
            snapshot.utilization,
            snapshot.temperature,
            snapshot.memory_used,
            snapshot.memory_total,
            snapshot.power_draw,
            snapshot.power_limit,
            snapshot.fan_speed,
        );
    }
    if let Some(error) = telemetry.last_error() {
        println!("  last error: {error}");
    }
}

/// Prints the streamed assistant reply incrementally as the transcript grows.
struct StreamPrinter {
    printed: Arc<Mutex<usize>>,
}

impl StreamPrinter {
    fn new() -> Self {
        Self {
            printed: Arc::new(Mutex::new(0)),
        }
    }

    fn reset(&self) {
        *self.printed.lock().unwrap() = 0;
    }

    fn observer(&self) -> Arc<dyn Fn(&[Turn]) + Send + Sync> {
        let printed = Arc::clone(&self.printed);
        Arc::new(move |transcript: &[Turn]| {
            let Some(turn) = transcript.last() else {
                return;
            };
            if turn.role != Role::Assistant || turn.phase == TurnPhase::Failed {
                return;
            }
            let mut printed = printed.lock().unwrap();
            // Cumulative snapshots only ever extend the content, except when
            // the failure policy replaces it wholesale
            if turn.content.len() < *printed || !turn.content.is_char_boundary(*printed) {
                print!("\n{}", turn.content);
            } else {
                print!("{}", &turn.content[*printed..]);
            }
            *printed = turn.content.len();
            let _ = std::io::stdout().flush();
        })
    }
}
