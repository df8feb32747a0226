use chat_core::{
    ChatError, ChatErrorCategory, Credential, Identity, classify_http_status, first_non_blank,
    normalize_identity,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

/// Path of the profile collection below the API base.
pub const DEFAULT_USERS_PATH: &str = "/api/v1/users";

/// Profile body as served by the user API. Both the chat field names and the
/// account field names are accepted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody {
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    avatar_ref: Option<String>,
    #[serde(default)]
    profile_image_url: Option<String>,
}

/// Fetches the local user's profile once per session.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    http: reqwest::Client,
    api_base: Url,
    users_path: String,
}

impl IdentityResolver {
    /// Build a resolver for `api_base` (an `http`/`https` URL).
    ///
    /// The request carries no timeout of its own; a session that stops first
    /// simply drops the pending lookup.
    pub fn new(api_base: &str) -> Result<Self, ChatError> {
        let api_base = parse_api_base(api_base)?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("chat-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Internal,
                    "http_client_init_failed",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            http,
            api_base,
            users_path: DEFAULT_USERS_PATH.to_owned(),
        })
    }

    pub fn with_users_path(mut self, users_path: impl Into<String>) -> Self {
        self.users_path = users_path.into();
        self
    }

    /// Resolve the identity for `user_id`, authenticating with `credential`.
    ///
    /// Runs exactly one request and never retries.
    pub async fn resolve(
        &self,
        credential: Option<&Credential>,
        user_id: Option<&str>,
    ) -> Result<Identity, ChatError> {
        let credential = credential.ok_or_else(|| {
            ChatError::new(
                ChatErrorCategory::Auth,
                "missing_credential",
                "no access token is available",
            )
        })?;
        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "missing_user_id",
                    "no user id is available",
                )
            })?;

        let url = self.profile_url(user_id)?;
        debug!(%url, "fetching chat identity");

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, credential.bearer_header())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(fetch_failed)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::new(
                classify_http_status(status.as_u16()),
                "identity_http_status",
                format!("profile request returned {status}"),
            ));
        }

        let body = response.bytes().await.map_err(fetch_failed)?;
        let profile: ProfileBody = serde_json::from_slice(&body).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Serialization,
                "identity_decode_failed",
                err.to_string(),
            )
        })?;

        let resolved_id = match profile.user_id {
            Some(Value::String(id)) if !id.trim().is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => user_id.to_owned(),
        };
        let identity = normalize_identity(
            resolved_id,
            first_non_blank(profile.display_name, profile.first_name),
            first_non_blank(profile.avatar_ref, profile.profile_image_url),
        );
        info!(user_id = %identity.user_id, "chat identity resolved");
        Ok(identity)
    }

    fn profile_url(&self, user_id: &str) -> Result<Url, ChatError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                ChatError::new(
                    ChatErrorCategory::Config,
                    "invalid_api_base",
                    format!("{} cannot carry a path", self.api_base),
                )
            })?;
            segments.pop_if_empty();
            segments.extend(self.users_path.split('/').filter(|part| !part.is_empty()));
            segments.push(user_id);
        }
        Ok(url)
    }
}

pub(crate) fn parse_api_base(api_base: &str) -> Result<Url, ChatError> {
    let url = Url::parse(api_base.trim()).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_api_base",
            format!("'{api_base}': {err}"),
        )
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ChatError::new(
            ChatErrorCategory::Config,
            "invalid_api_base",
            format!("unsupported scheme '{other}'"),
        )),
    }
}

fn fetch_failed(err: reqwest::Error) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Network,
        "identity_fetch_failed",
        err.to_string(),
    )
}
