//! `bastouille`: ask the gardening assistant from a terminal.

mod config;
mod render;

use std::error::Error;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bastouille_chat::prelude::*;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt as _;

#[derive(Parser)]
#[command(version, about = "Terminal client for the Baštouille gardening assistant")]
struct Cli {
    /// Base URL of the assistant API. Overrides `BASTOUILLE_API_URL`.
    #[arg(long)]
    api_url: Option<String>,

    /// JSON file holding the transcript and session id.
    #[arg(long, default_value = ".bastouille/session.json")]
    store: PathBuf,

    /// Print the agent's trace (thoughts, tool calls) after each answer.
    #[arg(long, default_value_t = false)]
    trace: bool,

    /// Clear the trace at the start of every request instead of keeping it
    /// for the whole session.
    #[arg(long, default_value_t = false)]
    per_request_trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask one question and print the streamed answer.
    Ask {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Interactive conversation. `/reset`, `/history` and `/quit` are
    /// available at the prompt.
    Chat,
    /// Forget the stored conversation and start a new session.
    Reset,
    /// Print the stored transcript.
    History,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    config::init();
    bastouille_chat::init_observability("warn");

    let cli = Cli::parse();
    let policy = if cli.per_request_trace {
        TracePolicy::PerRequest
    } else {
        TracePolicy::Session
    };
    let store = Arc::new(FileStore::new(&cli.store));
    let mut session = ChatSession::open(SessionConfig::default().trace_policy(policy), store)?;
    tracing::debug!(session_id = %session.id(), store = %cli.store.display(), "session opened");

    match cli.command {
        Command::Ask { query } => {
            let transport = transport(cli.api_url.as_deref())?;
            let outcome = ask(&mut session, &transport, &query.join(" "), cli.trace).await?;
            Ok(exit_code(&outcome))
        }
        Command::Chat => {
            let transport = transport(cli.api_url.as_deref())?;
            chat(&mut session, &transport, cli.trace).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset => {
            session.reset();
            println!("Nouvelle session : {}", session.id());
            Ok(ExitCode::SUCCESS)
        }
        Command::History => {
            print_history(&session);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn transport(api_url: Option<&str>) -> Result<HttpTransport, ChatError> {
    let mut config = HttpTransportConfig::from_env()?;
    if let Some(url) = api_url {
        config = config.base_url(url);
    }
    HttpTransport::new(config)
}

/// Streams one answer to stdout. Ctrl-C abandons the request and keeps the
/// partial answer.
async fn ask(
    session: &mut ChatSession,
    transport: &HttpTransport,
    query: &str,
    show_trace: bool,
) -> Result<RequestOutcome, ChatError> {
    let (handle, signal) = AbortHandle::pair();
    let interrupt = tokio::spawn(async move {
        ctrl_c().await;
        handle.abort();
    });

    let outcome = session
        .submit(query)
        .abort_signal(signal)
        .on_update(|_, update| {
            if let FoldUpdate::TranscriptAppended { text, .. } = update {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
        })
        .send(transport)
        .await;
    interrupt.abort();
    let outcome = outcome?;
    println!();

    match outcome.state {
        RequestState::Cancelled => eprintln!("(interrompu)"),
        RequestState::Failed => {
            if let Some(failure) = &outcome.failure {
                tracing::warn!(request_id = %outcome.request_id, error = %failure, "request failed");
            }
        }
        _ => {}
    }
    if show_trace {
        for record in session
            .trace()
            .records()
            .iter()
            .filter(|record| record.request_id == outcome.request_id)
        {
            eprintln!("{}", render::trace_line(record));
        }
    }
    Ok(outcome)
}

async fn chat(
    session: &mut ChatSession,
    transport: &HttpTransport,
    show_trace: bool,
) -> Result<(), Box<dyn Error>> {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        // `ask` installs a Ctrl-C handler that outlives the request, so the
        // prompt has to listen for it too.
        let line = match next_prompt(&mut lines, ctrl_c()).await? {
            Prompt::Line(line) => line,
            Prompt::Eof | Prompt::Interrupted => {
                println!();
                return Ok(());
            }
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => return Ok(()),
            "/reset" => {
                session.reset();
                println!("Nouvelle session : {}", session.id());
            }
            "/history" => print_history(session),
            query => {
                ask(session, transport, query, show_trace).await?;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Prompt {
    Line(String),
    Eof,
    Interrupted,
}

/// Waits for the next input line unless `interrupt` completes first.
async fn next_prompt<R>(
    lines: &mut tokio::io::Lines<R>,
    interrupt: impl Future<Output = ()>,
) -> std::io::Result<Prompt>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    tokio::select! {
        biased;
        _ = interrupt => Ok(Prompt::Interrupted),
        line = lines.next_line() => Ok(line?.map_or(Prompt::Eof, Prompt::Line)),
    }
}

/// Completes on Ctrl-C; never completes if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn print_history(session: &ChatSession) {
    if session.transcript().is_empty() {
        println!("(aucun message)");
        return;
    }
    for entry in session.transcript().entries() {
        println!("{}", render::transcript_line(entry));
    }
}

fn exit_code(outcome: &RequestOutcome) -> ExitCode {
    match outcome.state {
        RequestState::Failed => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    }
}
