use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::{
    error::{ChatError, ChatErrorCategory},
    types::{
        CHAT_MESSAGE_TYPE, ChatEvent, DEFAULT_AVATAR_REF, DEFAULT_SENDER_NAME, Identity,
        SessionEvent,
    },
};

/// Inbound wire shape before defaults are applied.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundChatFrame {
    #[serde(deserialize_with = "string_or_number")]
    sender_id: String,
    #[serde(default)]
    sender_name: Option<String>,
    content: String,
    #[serde(default)]
    avatar_ref: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
}

/// Parse one broadcast frame body into a chat event.
///
/// `senderId` and `content` are required; a blank or missing sender name or
/// avatar falls back to the shared defaults. `avatarRef` wins over
/// `profileImageUrl` when both carry a value. Extra fields such as `type` are
/// ignored.
pub fn normalize_inbound_frame(body: &str) -> Result<ChatEvent, ChatError> {
    let frame: InboundChatFrame = serde_json::from_str(body).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "malformed_frame",
            err.to_string(),
        )
    })?;

    Ok(ChatEvent {
        sender_id: frame.sender_id,
        sender_name: non_blank_or(frame.sender_name, DEFAULT_SENDER_NAME),
        content: frame.content,
        avatar_ref: non_blank_or(
            first_non_blank(frame.avatar_ref, frame.profile_image_url),
            DEFAULT_AVATAR_REF,
        ),
    })
}

/// Build the serialized outbound frame body for `event`.
///
/// Carries the four chat fields plus the fixed `type` tag.
pub fn encode_outbound_message(event: &ChatEvent) -> String {
    let mut body = Map::with_capacity(5);
    body.insert("senderId".into(), Value::String(event.sender_id.clone()));
    body.insert("senderName".into(), Value::String(event.sender_name.clone()));
    body.insert("content".into(), Value::String(event.content.clone()));
    body.insert("avatarRef".into(), Value::String(event.avatar_ref.clone()));
    body.insert("type".into(), Value::String(CHAT_MESSAGE_TYPE.to_owned()));
    Value::Object(body).to_string()
}

/// Convert an identity resolution failure into a session event.
pub fn normalize_identity_failure(error: ChatError) -> SessionEvent {
    SessionEvent::IdentityFailed {
        code: error.code,
        message: error.message,
    }
}

/// Fill in the shared defaults for a freshly fetched profile.
pub fn normalize_identity(
    user_id: impl Into<String>,
    display_name: Option<String>,
    avatar_ref: Option<String>,
) -> Identity {
    Identity {
        user_id: user_id.into(),
        display_name: non_blank_or(display_name, DEFAULT_SENDER_NAME),
        avatar_ref: non_blank_or(avatar_ref, DEFAULT_AVATAR_REF),
    }
}

/// Pick `preferred` unless it is missing or blank.
pub fn first_non_blank(preferred: Option<String>, other: Option<String>) -> Option<String> {
    preferred
        .filter(|value| !value.trim().is_empty())
        .or_else(|| other.filter(|value| !value.trim().is_empty()))
}

fn non_blank_or(value: Option<String>, fallback: &str) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| fallback.to_owned())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
