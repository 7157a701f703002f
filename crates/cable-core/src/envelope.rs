//! Wire envelope for the kernel channels socket.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Messaging protocol version written into outbound headers.
pub const PROTOCOL_VERSION: &str = "5.0";

/// Message type tags the session cares about.
pub mod kind {
    pub const STATUS: &str = "status";
    pub const STREAM: &str = "stream";
    pub const DISPLAY_DATA: &str = "display_data";
    pub const EXECUTE_REPLY: &str = "execute_reply";
    pub const EXECUTE_REQUEST: &str = "execute_request";
}

/// Channel names multiplexed over the socket.
pub mod channel {
    pub const SHELL: &str = "shell";
    pub const IOPUB: &str = "iopub";
}

/// Message header.
///
/// The same shape is used for the parent header, which identifies the
/// request an envelope responds to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<DateTime<Utc>>,
}

/// One framed protocol message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub header: Header,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent_header: Header,
    #[serde(default)]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buffers: Vec<Value>,
}

/// Content of an `execute_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub user_expressions: Map<String, Value>,
    pub allow_stdin: bool,
}

impl ExecuteRequest {
    /// Non-silent, history-recording request without stdin.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Map::new(),
            allow_stdin: false,
        }
    }
}

impl From<ExecuteRequest> for Value {
    fn from(request: ExecuteRequest) -> Self {
        let mut content = Map::with_capacity(5);
        content.insert("code".to_string(), Value::String(request.code));
        content.insert("silent".to_string(), Value::Bool(request.silent));
        content.insert("store_history".to_string(), Value::Bool(request.store_history));
        content.insert(
            "user_expressions".to_string(),
            Value::Object(request.user_expressions),
        );
        content.insert("allow_stdin".to_string(), Value::Bool(request.allow_stdin));
        Value::Object(content)
    }
}

/// Content of a `status` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusContent {
    pub execution_state: String,
}

impl Envelope {
    /// Build an `execute_request` correlated by `id`.
    #[must_use]
    pub fn execute_request(id: Uuid, code: &str, username: &str, session: &str) -> Self {
        let id = id.to_string();
        let content = Value::from(ExecuteRequest::new(code));
        Self {
            header: Header {
                msg_id: id.clone(),
                msg_type: kind::EXECUTE_REQUEST.to_string(),
                username: username.to_string(),
                session: session.to_string(),
                version: PROTOCOL_VERSION.to_string(),
                date: Some(Utc::now()),
            },
            parent_header: Header::default(),
            channel: channel::SHELL.to_string(),
            msg_id: id,
            msg_type: kind::EXECUTE_REQUEST.to_string(),
            content,
            metadata: Map::new(),
            buffers: Vec::new(),
        }
    }

    /// Build a reply to `parent` on `channel`.
    #[must_use]
    pub fn reply(parent: &Header, channel: &str, msg_type: &str, content: Value) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            header: Header {
                msg_id: id.clone(),
                msg_type: msg_type.to_string(),
                username: parent.username.clone(),
                session: parent.session.clone(),
                version: PROTOCOL_VERSION.to_string(),
                date: Some(Utc::now()),
            },
            parent_header: parent.clone(),
            channel: channel.to_string(),
            msg_id: id,
            msg_type: msg_type.to_string(),
            content,
            metadata: Map::new(),
            buffers: Vec::new(),
        }
    }

    /// Message type tag.
    ///
    /// The gateway mirrors the header's type at the top level; either is
    /// accepted.
    #[must_use]
    pub fn kind(&self) -> &str {
        if self.msg_type.is_empty() {
            &self.header.msg_type
        } else {
            &self.msg_type
        }
    }

    /// Correlation id of the request this envelope responds to.
    ///
    /// Returns `None` for an empty parent header or an id that is not a UUID
    /// (for example, requests issued by another client of the same kernel).
    #[must_use]
    pub fn parent_id(&self) -> Option<Uuid> {
        let raw = self.parent_header.msg_id.as_str();
        if raw.is_empty() {
            return None;
        }
        match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!("Unparseable parent msg_id {raw:?}: {e}");
                None
            }
        }
    }

    /// Decode the typed content.
    ///
    /// # Errors
    /// Returns error if the content does not match `T`.
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.content)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}] {}:", self.channel, self.kind())?;
        let body = serde_json::to_string_pretty(&self.content).map_err(|_| fmt::Error)?;
        write!(f, "{body}")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse an RFC 3339 date, treating anything else as absent.
pub(crate) fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc)))
}
