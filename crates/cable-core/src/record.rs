//! Normalized output records decoded from kernel envelopes.

use std::{borrow::Cow, fmt, sync::LazyLock};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::envelope::{Envelope, lenient_date};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07]*\x07|[@-_])")
        .expect("ANSI escape pattern is valid")
});

/// Normalized content delivered to a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OutputRecord {
    /// Correlation id of the submission this record belongs to.
    ///
    /// `None` for session-wide faults and for output of requests issued by
    /// other clients.
    pub owner: Option<Uuid>,
    /// Channel the envelope arrived on.
    pub channel: String,
    /// Stream name (`stdout` / `stderr`) for streamed output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Streamed text.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    /// Rich multi-representation data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MimeBundle>,
    /// Result marker (`ok`, `error`, `aborted`); non-empty only on replies.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub transient: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    text: String,
    #[serde(default)]
    data: Option<MimeBundle>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    execution_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient_date")]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
    #[serde(default)]
    transient: Option<Map<String, Value>>,
    #[serde(default)]
    ename: Option<String>,
    #[serde(default)]
    evalue: Option<String>,
    #[serde(default)]
    traceback: Option<Vec<String>>,
}

impl OutputRecord {
    /// Decode a content-bearing envelope.
    ///
    /// The owner is taken from the parent header. A reply whose status is
    /// `error` carries the kernel error.
    ///
    /// # Errors
    /// Returns error if the content is not a recognizable object.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, serde_json::Error> {
        let raw: RawContent = if envelope.content.is_null() {
            RawContent::default()
        } else {
            envelope.decode()?
        };
        let status = raw.status.unwrap_or_default();

        let error = (status == "error").then(|| {
            RecordError::Kernel(KernelError {
                ename: raw.ename.unwrap_or_default(),
                evalue: raw.evalue.unwrap_or_default(),
                traceback: raw.traceback.unwrap_or_default(),
            })
        });

        Ok(Self {
            owner: envelope.parent_id(),
            channel: envelope.channel.clone(),
            name: raw.name,
            text: raw.text,
            data: raw.data,
            status,
            execution_count: raw.execution_count.and_then(|n| u32::try_from(n).ok()),
            timestamp: envelope.header.date.or(raw.date),
            metadata: raw.metadata.unwrap_or_default(),
            transient: raw.transient.unwrap_or_default(),
            error,
        })
    }

    /// Session-wide fault with no owner.
    #[must_use]
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            timestamp: Some(Utc::now()),
            error: Some(RecordError::Fault {
                message: message.into(),
            }),
            ..Self::default()
        }
    }

    /// Whether this record closes its correlation's stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || !self.status.is_empty()
    }

    /// Best textual rendering: streamed text, else the bundle's text.
    #[must_use]
    pub fn display_text(&self) -> Option<Cow<'_, str>> {
        if !self.text.is_empty() {
            return Some(Cow::Borrowed(self.text.as_str()));
        }
        self.data.as_ref().and_then(MimeBundle::text)
    }
}

/// Error carried by a terminal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordError {
    /// Exception raised by the executed code.
    #[error(transparent)]
    Kernel(KernelError),
    /// Session-level failure (dead transport, undecodable message).
    #[error("session fault: {message}")]
    Fault { message: String },
}

/// Exception reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{ename}: {evalue}")]
pub struct KernelError {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

impl KernelError {
    /// Long form with the traceback, ANSI colors stripped.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.ename, self.evalue);
        for line in &self.traceback {
            out.push('\n');
            out.push_str(&ANSI_ESCAPE.replace_all(line, ""));
        }
        out
    }
}

/// Multi-representation data bundle keyed by MIME type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MimeBundle {
    #[serde(
        rename = "text/plain",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub plain: String,
    #[serde(
        rename = "text/markdown",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub markdown: String,
    #[serde(
        rename = "text/latex",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub latex: String,
    #[serde(
        rename = "application/javascript",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub javascript: String,
    #[serde(rename = "application/json", default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(
        rename = "text/html",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub html: String,

    #[serde(
        rename = "image/png",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub png: String,
    #[serde(
        rename = "image/jpeg",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub jpeg: String,
    #[serde(
        rename = "image/svg+xml",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "String::is_empty"
    )]
    pub svg: String,
}

/// Decoded binary representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPayload {
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl MimeBundle {
    /// Single textual representation.
    ///
    /// Priority: plain text, markdown, LaTeX, script, JSON, HTML.
    #[must_use]
    pub fn text(&self) -> Option<Cow<'_, str>> {
        let textual = [&self.plain, &self.markdown, &self.latex, &self.javascript];
        if let Some(s) = textual.into_iter().find(|s| !s.is_empty()) {
            return Some(Cow::Borrowed(s.as_str()));
        }
        match &self.json {
            Some(Value::Null) | None => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(Value::String(s)) => return Some(Cow::Borrowed(s)),
            Some(other) => return Some(Cow::Owned(other.to_string())),
        }
        (!self.html.is_empty()).then(|| Cow::Borrowed(self.html.as_str()))
    }

    /// Binary representation, decoded from base64.
    ///
    /// Priority: PNG, JPEG, SVG. Returns `Ok(None)` when the bundle carries
    /// none of them.
    ///
    /// # Errors
    /// Returns error if the selected payload is not valid base64.
    pub fn binary(&self) -> Result<Option<BinaryPayload>, base64::DecodeError> {
        let (mime_type, encoded) = if !self.png.is_empty() {
            ("image/png", &self.png)
        } else if !self.jpeg.is_empty() {
            ("image/jpeg", &self.jpeg)
        } else if !self.svg.is_empty() {
            // Kernels commonly send SVG as plain markup.
            if self.svg.trim_start().starts_with('<') {
                return Ok(Some(BinaryPayload {
                    mime_type: "image/svg+xml",
                    bytes: self.svg.as_bytes().to_vec(),
                }));
            }
            ("image/svg+xml", &self.svg)
        } else {
            return Ok(None);
        };

        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = BASE64.decode(compact)?;
        Ok(Some(BinaryPayload { mime_type, bytes }))
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.display_text()) {
            (Some(RecordError::Kernel(e)), _) => write!(f, "{}", e.render()),
            (Some(e), _) => write!(f, "{e}"),
            (None, Some(text)) => write!(f, "{text}"),
            (None, None) => Ok(()),
        }
    }
}

/// Accept a string, a list of lines, or null.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Array(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .concat(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Header, channel, kind};
    use serde_json::json;

    fn reply(parent: Uuid, msg_type: &str, content: Value) -> Envelope {
        let parent = Header {
            msg_id: parent.to_string(),
            msg_type: kind::EXECUTE_REQUEST.to_string(),
            ..Header::default()
        };
        Envelope::reply(&parent, channel::IOPUB, msg_type, content)
    }

    #[test]
    fn test_text_priority_html_only() {
        let bundle = MimeBundle {
            html: "<b>hi</b>".into(),
            ..MimeBundle::default()
        };
        assert_eq!(bundle.text().as_deref(), Some("<b>hi</b>"));
    }

    #[test]
    fn test_text_priority_plain_over_html() {
        let bundle: MimeBundle = serde_json::from_value(json!({
            "text/plain": "42",
            "text/html": "<pre>42</pre>"
        }))
        .unwrap();
        assert_eq!(bundle.text().as_deref(), Some("42"));
    }

    #[test]
    fn test_text_priority_order() {
        let bundle = MimeBundle {
            latex: "$x$".into(),
            javascript: "alert(1)".into(),
            html: "<i>x</i>".into(),
            ..MimeBundle::default()
        };
        assert_eq!(bundle.text().as_deref(), Some("$x$"));

        let bundle = MimeBundle {
            json: Some(json!({"a": 1})),
            html: "<i>x</i>".into(),
            ..MimeBundle::default()
        };
        assert_eq!(bundle.text().as_deref(), Some(r#"{"a":1}"#));

        assert_eq!(MimeBundle::default().text(), None);
    }

    #[test]
    fn test_binary_png() {
        let png = [0x89, b'P', b'N', b'G', 0x0d, 0x0a];
        let bundle = MimeBundle {
            png: format!("{}\n", BASE64.encode(png)),
            jpeg: BASE64.encode(b"jpeg"),
            ..MimeBundle::default()
        };
        let payload = bundle.binary().unwrap().unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.bytes, png);
    }

    #[test]
    fn test_binary_empty_condition() {
        let bundle = MimeBundle {
            plain: "no images here".into(),
            ..MimeBundle::default()
        };
        assert_eq!(bundle.binary().unwrap(), None);
    }

    #[test]
    fn test_binary_invalid_base64() {
        let bundle = MimeBundle {
            jpeg: "***".into(),
            ..MimeBundle::default()
        };
        assert!(bundle.binary().is_err());
    }

    #[test]
    fn test_binary_raw_svg() {
        let bundle = MimeBundle {
            svg: "<svg></svg>".into(),
            ..MimeBundle::default()
        };
        let payload = bundle.binary().unwrap().unwrap();
        assert_eq!(payload.mime_type, "image/svg+xml");
        assert_eq!(payload.bytes, b"<svg></svg>");
    }

    #[test]
    fn test_stream_record() {
        let id = Uuid::new_v4();
        let env = reply(id, kind::STREAM, json!({"name": "stdout", "text": "hello\n"}));
        let record = OutputRecord::from_envelope(&env).unwrap();

        assert_eq!(record.owner, Some(id));
        assert_eq!(record.channel, "iopub");
        assert_eq!(record.name.as_deref(), Some("stdout"));
        assert_eq!(record.text, "hello\n");
        assert!(!record.is_terminal());
        assert!(record.timestamp.is_some());
    }

    #[test]
    fn test_reply_ok_is_terminal() {
        let id = Uuid::new_v4();
        let env = reply(
            id,
            kind::EXECUTE_REPLY,
            json!({"status": "ok", "execution_count": 3, "user_expressions": {}}),
        );
        let record = OutputRecord::from_envelope(&env).unwrap();

        assert!(record.is_terminal());
        assert_eq!(record.execution_count, Some(3));
        assert_eq!(record.error, None);
    }

    #[test]
    fn test_reply_error_carries_kernel_error() {
        let id = Uuid::new_v4();
        let env = reply(
            id,
            kind::EXECUTE_REPLY,
            json!({
                "status": "error",
                "execution_count": 4,
                "ename": "NameError",
                "evalue": "name 'y' is not defined",
                "traceback": ["\u{1b}[0;31mNameError\u{1b}[0m: name 'y' is not defined"]
            }),
        );
        let record = OutputRecord::from_envelope(&env).unwrap();

        let Some(RecordError::Kernel(err)) = &record.error else {
            panic!("expected kernel error, got {:?}", record.error);
        };
        assert_eq!(err.to_string(), "NameError: name 'y' is not defined");
        assert_eq!(
            err.render(),
            "NameError: name 'y' is not defined\nNameError: name 'y' is not defined"
        );
        assert!(record.is_terminal());
    }

    #[test]
    fn test_display_data_record() {
        let id = Uuid::new_v4();
        let env = reply(
            id,
            kind::DISPLAY_DATA,
            json!({
                "data": {"text/plain": "<Figure>", "image/png": BASE64.encode(b"png")},
                "metadata": {"image/png": {"width": 10}},
                "transient": {"display_id": "d1"}
            }),
        );
        let record = OutputRecord::from_envelope(&env).unwrap();

        assert_eq!(record.display_text().as_deref(), Some("<Figure>"));
        assert_eq!(record.transient["display_id"], "d1");
        assert!(record.metadata.contains_key("image/png"));
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_fault_record() {
        let record = OutputRecord::fault("ping timed out");
        assert_eq!(record.owner, None);
        assert!(record.is_terminal());
        assert_eq!(record.to_string(), "session fault: ping timed out");
    }

    #[test]
    fn test_malformed_content_is_error() {
        let env = reply(Uuid::new_v4(), kind::STREAM, json!(["not", "an", "object"]));
        assert!(OutputRecord::from_envelope(&env).is_err());
    }
}
