//! Line formatting for the terminal chat view.

use chat_core::{ChatEvent, ConnectionState, SendRefusal};

/// Shown until the first message arrives.
pub const EMPTY_PLACEHOLDER: &str = "No messages yet.";

/// Absolute avatar URL for `avatar_ref`. Absolute `http(s)` refs pass through;
/// anything else is a path below the API base.
pub fn resolve_avatar_url(api_base: &str, avatar_ref: &str) -> String {
    if avatar_ref.starts_with("http://") || avatar_ref.starts_with("https://") {
        return avatar_ref.to_owned();
    }
    let base = api_base.trim_end_matches('/');
    if avatar_ref.starts_with('/') {
        format!("{base}{avatar_ref}")
    } else {
        format!("{base}/{avatar_ref}")
    }
}

pub fn format_message(api_base: &str, event: &ChatEvent) -> String {
    format!(
        "{}: {}  <{}>",
        event.sender_name,
        event.content,
        resolve_avatar_url(api_base, &event.avatar_ref)
    )
}

pub fn format_state(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "-- idle",
        ConnectionState::Connecting => "-- connecting...",
        ConnectionState::Open => "-- connected",
        ConnectionState::Closed => "-- disconnected",
    }
}

pub fn format_refusal(refusal: SendRefusal) -> String {
    format!("!! not sent: {refusal}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(avatar_ref: &str) -> ChatEvent {
        ChatEvent {
            sender_id: "1".into(),
            sender_name: "Ada".into(),
            content: "hello".into(),
            avatar_ref: avatar_ref.into(),
        }
    }

    #[test]
    fn joins_relative_avatar_to_api_base() {
        assert_eq!(
            resolve_avatar_url("https://school.example.org/", "/uploads/a.png"),
            "https://school.example.org/uploads/a.png"
        );
        assert_eq!(
            resolve_avatar_url("https://school.example.org", "uploads/a.png"),
            "https://school.example.org/uploads/a.png"
        );
    }

    #[test]
    fn passes_absolute_avatar_through() {
        assert_eq!(
            resolve_avatar_url("https://school.example.org", "https://cdn.example.net/a.png"),
            "https://cdn.example.net/a.png"
        );
    }

    #[test]
    fn formats_message_line() {
        assert_eq!(
            format_message("http://localhost:8080", &event("/default-avatar.png")),
            "Ada: hello  <http://localhost:8080/default-avatar.png>"
        );
    }

    #[test]
    fn formats_refusal_notice() {
        assert_eq!(
            format_refusal(SendRefusal::IdentityUnknown),
            "!! not sent: sender identity is not known yet"
        );
    }
}
