//! Interactive chat loop on stdin/stdout.
//!
//! One process hosts one session. Passing `--session` replays an earlier
//! transcript first, so a proposal left hanging at the last exit is offered
//! for confirmation again before anything else happens.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;

use stocky_agent::llm::CompletionCapability;
use stocky_agent::openai::OpenAiCapability;
use stocky_agent::runtime::ChatRuntime;
use stocky_agent::session::SessionState;
use stocky_core::config::{AppConfig, LoadOptions, LogFormat};
use stocky_core::domain::message::SessionId;
use stocky_core::protocol::ProtocolState;
use stocky_core::trace::{TraceEvent, TraceOutcome, TraceSink};
use stocky_db::{connect_with_settings, ensure_schema, SqlRecordStore, SqlTranscriptStore};

pub fn run(session: Option<String>, trace: bool) -> ExitCode {
    let mut options = LoadOptions::default();
    if trace {
        options.overrides.trace = Some(true);
    }

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration issue: {error}");
            return ExitCode::from(2);
        }
    };

    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("failed to initialize async runtime: {error}");
            return ExitCode::from(3);
        }
    };

    match runtime.block_on(drive(config, session)) {
        Ok(()) => ExitCode::SUCCESS,
        Err((error_class, message, exit_code)) => {
            eprintln!("chat failed ({error_class}): {message}");
            ExitCode::from(exit_code)
        }
    }
}

async fn drive(
    config: AppConfig,
    session: Option<String>,
) -> Result<(), (&'static str, String, u8)> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    ensure_schema(&pool).await.map_err(|error| ("schema_setup", error.to_string(), 5u8))?;

    let capability: Arc<dyn CompletionCapability> = Arc::new(
        OpenAiCapability::from_config(&config.llm)
            .map_err(|error| ("llm_config", error.to_string(), 6u8))?,
    );
    let records = Arc::new(SqlRecordStore::new(pool.clone()));
    let transcript = Arc::new(SqlTranscriptStore::new(pool.clone()));

    let mut chat = ChatRuntime::new(capability, records, transcript, config.agent.clone());
    if config.agent.trace {
        chat = chat.with_trace_sink(Arc::new(StdoutTraceSink));
    }

    let session_id = match session {
        Some(id) => SessionId(id),
        None => SessionId::random(),
    };
    let mut state = chat
        .open_session(session_id)
        .await
        .map_err(|error| ("session_replay", error.to_string(), 5u8))?;

    print_banner(&state);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    prompt().map_err(io_failure)?;
    while let Some(line) = lines.next_line().await.map_err(io_failure)? {
        let input = line.trim();
        if input.is_empty() {
            prompt().map_err(io_failure)?;
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        match chat.handle_turn(&mut state, input).await {
            Ok(output) => println!("{}\n", output.reply),
            // The turn failed before a reply was produced (storage or the
            // completion endpoint). The session itself stays usable.
            Err(error) => eprintln!("turn failed: {error}\n"),
        }
        prompt().map_err(io_failure)?;
    }

    pool.close().await;
    println!();
    println!("bye. resume this conversation with `stocky chat --session {}`", state.session_id);
    Ok(())
}

fn print_banner(state: &SessionState) {
    println!("stocky chat. session {}. type 'exit' to leave.", state.session_id);
    if state.protocol == ProtocolState::AwaitingConfirmation {
        if let Some(pending) = &state.pending {
            println!();
            println!("a proposal from the previous session is still waiting:");
            println!("  {}", pending.summary);
            println!("reply yes to run it or no to cancel.");
        }
    }
    println!();
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}

fn io_failure(error: io::Error) -> (&'static str, String, u8) {
    ("io", error.to_string(), 1u8)
}

// Logs go to stderr so replies stay clean on stdout.
fn init_logging(config: &AppConfig) {
    let level = config.logging.level.parse::<tracing::Level>().unwrap_or(tracing::Level::INFO);

    match config.logging.format {
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(level)
                .with_writer(io::stderr)
                .compact()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(level)
                .with_writer(io::stderr)
                .pretty()
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(level)
                .with_writer(io::stderr)
                .json()
                .init();
        }
    }
}

/// Prints each routing, protocol, and tool event as the turn unfolds.
struct StdoutTraceSink;

impl TraceSink for StdoutTraceSink {
    fn emit(&self, event: TraceEvent) {
        let outcome = match event.outcome {
            TraceOutcome::Success => "ok",
            TraceOutcome::Rejected => "rejected",
            TraceOutcome::Failed => "failed",
        };
        let metadata = event
            .metadata
            .iter()
            .map(|(key, value)| format!(" {key}={value}"))
            .collect::<String>();
        println!("[trace] turn {} {} {}{}", event.turn, event.label, outcome, metadata);
    }
}
