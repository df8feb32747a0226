mod config;
mod logging;
mod render;

use std::path::Path;

use chat_client::{ChatSessionHandle, SessionCredentials, spawn_session};
use chat_core::{ChatError, Credential, SessionEvent};
use chat_platform::{FileCredentialStore, StoredSession, load_session_credentials};
use config::{ConfigError, TerminalConfig};
use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{error, info};

const QUIT_COMMAND: &str = "/quit";

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] ChatError),
    #[error("failed to read input: {0}")]
    Input(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run().await {
        error!(error = %err, "chat terminal failed");
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let config = TerminalConfig::from_env()?;
    let stored = stored_session(config.credentials_file.as_deref())?;
    let credentials = SessionCredentials {
        token: config.token.clone().and_then(Credential::new).or(stored.token),
        user_id: config.user_id.clone().or(stored.user_id),
    };
    if credentials.token.is_none() || credentials.user_id.is_none() {
        println!("No stored login; you can read the chat but not send.");
    }

    let input = spawn_stdin_reader()?;
    let handle = spawn_session(config.session_config(), credentials)?;
    let view = View {
        messages: handle.messages(),
        events: handle.subscribe(),
    };
    let renderer = tokio::spawn(render_loop(config.api_base.clone(), view));

    let result = input_loop(&handle, input).await;
    info!("leaving chat");
    handle.shutdown().await;
    let _ = renderer.await;
    result
}

/// Credentials left by the login flow, if a credentials file is configured.
fn stored_session(path: Option<&Path>) -> Result<StoredSession, ChatError> {
    match path {
        Some(path) => {
            load_session_credentials(&FileCredentialStore::new(path)).map_err(ChatError::from)
        }
        None => Ok(StoredSession::default()),
    }
}

struct View {
    messages: chat_core::MessageLogView,
    events: chat_core::EventStream,
}

// Stdin is read on a plain thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<std::io::Result<String>>, AppError> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("chat-stdin".to_owned())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn input_loop(
    handle: &ChatSessionHandle,
    mut input: mpsc::Receiver<std::io::Result<String>>,
) -> Result<(), AppError> {
    loop {
        let line = tokio::select! {
            line = input.recv() => line,
            _ = tokio::signal::ctrl_c() => return Ok(()),
        };
        let Some(line) = line.transpose()? else {
            return Ok(());
        };
        if line.trim() == QUIT_COMMAND {
            return Ok(());
        }
        if let Err(refusal) = handle.send(line).await {
            println!("{}", render::format_refusal(refusal));
        }
    }
}

async fn render_loop(api_base: String, mut view: View) {
    println!("{}", render::EMPTY_PLACEHOLDER);
    let mut printed = 0;
    loop {
        tokio::select! {
            changed = view.messages.changed() => {
                if !changed {
                    return;
                }
                for event in view.messages.read_from(printed) {
                    println!("{}", render::format_message(&api_base, &event));
                    printed += 1;
                }
            }
            event = view.events.recv() => match event {
                Ok(SessionEvent::StateChanged { state }) => println!("{}", render::format_state(state)),
                Ok(SessionEvent::IdentityResolved(identity)) => {
                    println!("-- chatting as {}", identity.display_name)
                }
                Ok(SessionEvent::IdentityFailed { code, message }) => {
                    println!("!! could not load your profile ({code}): {message}")
                }
                Ok(SessionEvent::TransportError { message }) => println!("!! connection error: {message}"),
                Ok(SessionEvent::Terminated) | Err(RecvError::Closed) => return,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
        }
    }
}
