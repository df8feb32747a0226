use std::{env, time::Duration};

use chat_client::{SessionConfig, SessionCredentials, spawn_session};
use chat_core::{ConnectionState, Credential, IdentityState};

#[tokio::main]
async fn main() {
    let api_base = env::var("CHAT_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned());
    let credentials = SessionCredentials {
        token: env::var("CHAT_TOKEN").ok().and_then(Credential::new),
        user_id: env::var("CHAT_USER_ID").ok(),
    };
    let wait = env::var("CHAT_SMOKE_WAIT_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(10));

    let mut config = SessionConfig::new(api_base);
    config.socket_url = env::var("CHAT_SOCKET_URL").ok();

    let handle = match spawn_session(config, credentials) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("Failed to start chat session: {err}");
            std::process::exit(1);
        }
    };

    let mut state = handle.watch_state();
    let opened = tokio::time::timeout(wait, state.wait_for(|state| *state == ConnectionState::Open))
        .await
        .is_ok_and(|result| result.is_ok());

    match handle.identity() {
        IdentityState::Resolved(identity) => {
            println!("Identity: {} ({})", identity.display_name, identity.user_id)
        }
        IdentityState::Failed { code, message } => println!("Identity failed: {code}: {message}"),
        IdentityState::Pending => {
            println!("Identity pending. Set CHAT_TOKEN and CHAT_USER_ID to resolve a profile.")
        }
    }

    let received = handle.messages().snapshot();
    println!("Messages received: {}", received.len());
    if let Some(last) = received.last() {
        println!("Last message from {}: {}", last.sender_name, last.content);
    }

    handle.shutdown().await;
    if opened {
        println!("Broadcast connection opened and closed cleanly.");
    } else {
        eprintln!("Broadcast connection did not open within {wait:?}.");
        std::process::exit(1);
    }
}
