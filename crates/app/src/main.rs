//! Line-oriented terminal client for a streaming chat endpoint.
//!
//! Settings come from `settings.json` in the platform config directory and
//! `RAY_*` environment variables. Logs go to stderr (`RUST_LOG`), the
//! conversation to stdout.

mod command;
mod console;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use ray_chat::{ChatSession, ConversationSnapshot, FailureKind};
use ray_llm::{HttpTransport, TransportError};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::command::{HELP, Input, parse_input};
use crate::console::TranscriptPrinter;
use crate::settings::SettingsStore;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to build HTTP transport on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("ray exited with an error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<(), AppError> {
    let settings = SettingsStore::load();
    let initial = settings.settings();
    let transport = HttpTransport::new(initial.transport_config()).context(TransportSnafu {
        stage: "build-transport",
    })?;
    tracing::info!(
        endpoint = %initial.endpoint,
        model_id = %initial.default_model,
        wire_format = ?initial.wire_format,
        settings_path = ?settings.config_path(),
        "starting chat session"
    );

    let session = ChatSession::spawn(Arc::new(transport));
    let (snapshot_tx, mut snapshots) = mpsc::unbounded_channel::<Arc<ConversationSnapshot>>();
    let _subscription = session.subscribe(move |snapshot| {
        let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
    });

    let mut stdout = tokio::io::stdout();
    let mut printer = TranscriptPrinter::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_closed = false;

    write_out(&mut stdout, "type a message, /help for commands\n").await?;

    loop {
        tokio::select! {
            line = lines.next_line(), if !input_closed => {
                match line.context(ReadInputSnafu { stage: "read-line" })? {
                    Some(line) => {
                        let flow = handle_line(&line, &session, &settings, &mut stdout).await?;
                        if flow == Flow::Quit {
                            break;
                        }
                    }
                    // Piped input: let the last reply finish before exiting.
                    None => {
                        input_closed = true;
                        while let Ok(snapshot) = snapshots.try_recv() {
                            write_out(&mut stdout, &printer.render(&snapshot)).await?;
                        }
                        if caught_up(&printer, &session) {
                            break;
                        }
                    }
                }
            }
            Some(snapshot) = snapshots.recv() => {
                let output = printer.render(&snapshot);
                write_out(&mut stdout, &output).await?;
                if input_closed && caught_up(&printer, &session) {
                    break;
                }
            }
        }
    }

    session.cancel().await;
    Ok(())
}

/// True once the session is idle and its latest snapshot has been printed.
fn caught_up(printer: &TranscriptPrinter, session: &ChatSession) -> bool {
    let latest = session.snapshot();
    !latest.is_busy() && printer.last_version() >= latest.version
}

async fn handle_line(
    line: &str,
    session: &ChatSession,
    settings: &SettingsStore,
    stdout: &mut Stdout,
) -> Result<Flow, AppError> {
    let input = match parse_input(line) {
        Ok(Some(input)) => input,
        Ok(None) => return Ok(Flow::Continue),
        Err(error) => {
            write_out(stdout, &format!("{error}\n")).await?;
            return Ok(Flow::Continue);
        }
    };

    let reply = match input {
        Input::Message(text) => match session.submit(text, settings.settings().turn_config()).await
        {
            Ok(_) => None,
            Err(error) => match error.kind() {
                FailureKind::Busy => Some("still replying, /stop to cancel".to_string()),
                FailureKind::Validation => Some(format!("{error}")),
                _ => Some(format!("error: {error}")),
            },
        },
        Input::Stop => (!session.cancel().await).then(|| "nothing to stop".to_string()),
        Input::Reset => match session.reset().await {
            Ok(()) => Some("started a new conversation".to_string()),
            Err(error) => Some(format!("error: {error}")),
        },
        Input::SelectModel(model_id) => match settings.select_model(&model_id) {
            Ok(current) => Some(format!("using {}", current.default_model)),
            Err(error) => Some(format!("error: {error}")),
        },
        Input::ListModels => Some(list_models(settings)),
        Input::WebSearch(enabled) => match settings.set_web_search(enabled) {
            Ok(current) => Some(format!(
                "web search {}",
                if current.web_search { "on" } else { "off" }
            )),
            Err(error) => Some(format!("error: {error}")),
        },
        Input::Help => Some(HELP.to_string()),
        Input::Quit => return Ok(Flow::Quit),
    };

    if let Some(reply) = reply {
        write_out(stdout, &format!("{reply}\n")).await?;
    }
    Ok(Flow::Continue)
}

fn list_models(settings: &SettingsStore) -> String {
    let current = settings.settings();
    let selected = current.selected_model().map(|model| model.id.as_str());

    current
        .models
        .iter()
        .map(|model| {
            let marker = if Some(model.id.as_str()) == selected { "*" } else { " " };
            match &model.description {
                Some(description) => format!("{marker} {} ({}): {description}", model.id, model.name),
                None => format!("{marker} {} ({})", model.id, model.name),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn write_out(stdout: &mut Stdout, text: &str) -> Result<(), AppError> {
    if text.is_empty() {
        return Ok(());
    }

    stdout
        .write_all(text.as_bytes())
        .await
        .context(WriteOutputSnafu {
            stage: "write-stdout",
        })?;
    stdout.flush().await.context(WriteOutputSnafu {
        stage: "flush-stdout",
    })
}
