// ai
//! 📦 Common data structures — the building blocks of rbx
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. RIAK RING — 3:47 AM
//!
//! 🌩️  Sixty-four vnodes hum in the dark. Somewhere among them, a key named
//! `user:42` has been quietly holding a JSON blob since 2014. Nobody remembers
//! writing it. Nobody dares delete it. Tonight, it moves.
//!
//! ✅ And then — a `Record` arrives. It knows its bucket. It knows its key. It
//! carries the headers Riak handed back like a tourist carrying every brochure
//! from the hotel lobby. Its `data` is either JSON or, failing that, base64 —
//! because not every body deserves to be parsed, but every body deserves to be saved.
//!
//! 🦆
//!
//! The import side has its own cast: `ImportEntry`, which is whatever the file
//! says a record is, and `WriteMeta`, which turns indexes and user metadata into
//! the HTTP headers Riak actually listens to.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 🏷️ One header value as Riak sent it. Once → a string. Repeated → the whole list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub(crate) enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    /// ➕ Fold another occurrence of the same header into this one.
    pub(crate) fn push(&mut self, value: String) {
        match self {
            HeaderValue::Single(first) => {
                *self = HeaderValue::Multi(vec![std::mem::take(first), value]);
            }
            HeaderValue::Multi(all) => all.push(value),
        }
    }
}

/// 📇 Response headers keyed by lowercase name, sorted so diffs between exports stay boring.
pub(crate) type Headers = BTreeMap<String, HeaderValue>;

/// 📡 What the store hands back for one key: its headers and the untouched body bytes.
#[derive(Debug, Clone, Default)]
pub(crate) struct FetchedObject {
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// 🎭 The payload of a record: parsed JSON if the body parsed, base64 if it didn't.
///
/// Serializes untagged, so the export file shows the JSON itself or a plain string.
/// ⚠️ A text body that happens to be valid JSON (`"42"`, `true`) lands in `Json`.
/// That's the heuristic. We keep it honest, not clever.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub(crate) enum RecordData {
    Json(Value),
    Base64(String),
}

impl RecordData {
    /// 🔍 Best-effort JSON parse, base64 on failure. No content-type sniffing, no regrets.
    pub(crate) fn classify(body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(parsed) => RecordData::Json(parsed),
            Err(_) => RecordData::Base64(STANDARD.encode(body)),
        }
    }
}

/// 📦 One exported unit: `[bucket, key]`, the response headers, and the data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Record {
    pub key: (String, String),
    pub headers: Headers,
    pub data: RecordData,
}

impl Record {
    pub(crate) fn from_fetched(bucket: &str, key: &str, fetched: FetchedObject) -> Self {
        let data = RecordData::classify(&fetched.body);
        Self {
            key: (bucket.to_string(), key.to_string()),
            headers: fetched.headers,
            data,
        }
    }

    /// 🖋️ One record, one line. Pretty mode indents with tabs and still ends in exactly one `\n`.
    pub(crate) fn render_line(&self, pretty: bool) -> Result<String> {
        let mut rendered = if pretty {
            let mut buf = Vec::with_capacity(256);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
            let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
            self.serialize(&mut serializer)
                .context("💀 The record refused to be pretty. Beauty is pain.")?;
            String::from_utf8(buf)
                .context("💀 serde_json wrote non-UTF-8. This should not be possible. And yet.")?
        } else {
            serde_json::to_string(self)
                .context("💀 The record refused to be serialized. It has stage fright.")?
        };
        rendered.push('\n');
        Ok(rendered)
    }
}

// ===== Import side =====

/// 🔑 An entry's key: a bare name, or the `[bucket, key]` pair an export line carries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub(crate) enum ImportKey {
    Name(String),
    Qualified(String, String),
}

impl ImportKey {
    /// 🎯 Just the key. The bucket is decided by the run, not by the file.
    pub(crate) fn name(&self) -> &str {
        match self {
            ImportKey::Name(name) => name,
            ImportKey::Qualified(_, name) => name,
        }
    }
}

/// 📥 One thing to write back. Unknown fields are politely ignored.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImportEntry {
    pub key: ImportKey,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub indexes: Option<Value>,
    #[serde(default)]
    pub meta: Option<WriteMeta>,
    /// 📇 The response headers an export line carries. Only `content-type` is consulted.
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
}

impl ImportEntry {
    /// 🏷️ `meta` wins outright when present. Otherwise the indexes become `meta.index`.
    pub(crate) fn write_meta(&self) -> WriteMeta {
        let mut meta = match &self.meta {
            Some(explicit) => explicit.clone(),
            None => WriteMeta {
                index: self.indexes.clone(),
                ..WriteMeta::default()
            },
        };
        meta.string_is_json = self.exported_as_json();
        meta
    }

    /// 🔍 Did the export see this body served as JSON? A string `data` then was a JSON
    /// string all along, quotes included, and has to go back that way.
    fn exported_as_json(&self) -> bool {
        let Some(content_type) = self.headers.as_ref().and_then(|headers| headers.get("content-type")) else {
            return false;
        };
        let first = match content_type {
            Value::Array(values) => values.first(),
            single => Some(single),
        };
        first
            .and_then(Value::as_str)
            .is_some_and(|value| value.trim().to_ascii_lowercase().starts_with("application/json"))
    }
}

/// 🏷️ Everything besides the body that a Riak write can carry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WriteMeta {
    #[serde(default)]
    pub index: Option<Value>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub usermeta: Option<Map<String, Value>>,
    #[serde(default)]
    pub vclock: Option<String>,
    /// 🧵 send a string `data` as a serialized JSON string rather than raw text
    #[serde(skip)]
    pub string_is_json: bool,
}

impl WriteMeta {
    /// 📦 Body bytes and content type for a write.
    ///
    /// A string goes over raw as `text/plain`, unless it was exported from a JSON body.
    /// Anything else is serialized as `application/json`. `contentType` overrides either.
    pub(crate) fn encode_body(&self, data: &Value) -> Result<(Vec<u8>, String)> {
        let (body, default_content_type) = match data {
            Value::String(text) if !self.string_is_json => (text.clone().into_bytes(), "text/plain"),
            other => (
                serde_json::to_vec(other).context("💀 The entry's data refused to serialize.")?,
                "application/json",
            ),
        };
        let content_type = self
            .content_type
            .clone()
            .unwrap_or_else(|| default_content_type.to_string());
        Ok((body, content_type))
    }

    /// 📇 Secondary index headers: `x-riak-index-{name}_{bin|int}`.
    ///
    /// Names already ending in `_bin`/`_int` keep their suffix. Numbers are `_int`,
    /// everything else is `_bin`. Lists become comma-joined values, Riak's own multi-value form.
    pub(crate) fn index_headers(&self) -> Vec<(String, String)> {
        let Some(Value::Object(indexes)) = &self.index else {
            return Vec::new();
        };
        indexes
            .iter()
            .filter_map(|(name, value)| {
                let values: Vec<&Value> = match value {
                    Value::Array(items) => items.iter().collect(),
                    Value::Null => return None,
                    other => vec![other],
                };
                let first = values.first()?;
                let header_name = if name.ends_with("_bin") || name.ends_with("_int") {
                    format!("x-riak-index-{name}")
                } else if first.is_number() {
                    format!("x-riak-index-{name}_int")
                } else {
                    format!("x-riak-index-{name}_bin")
                };
                let joined = values
                    .iter()
                    .map(|v| scalar_to_string(v))
                    .collect::<Vec<_>>()
                    .join(", ");
                Some((header_name, joined))
            })
            .collect()
    }

    /// 📇 Every header this metadata turns into, indexes included.
    pub(crate) fn headers(&self) -> Vec<(String, String)> {
        let mut headers = self.index_headers();
        if let Some(usermeta) = &self.usermeta {
            headers.extend(
                usermeta
                    .iter()
                    .map(|(name, value)| (format!("x-riak-meta-{name}"), scalar_to_string(value))),
            );
        }
        if let Some(vclock) = &self.vclock {
            headers.push(("x-riak-vclock".to_string(), vclock.clone()));
        }
        headers
    }
}

// 🧵 strings stay naked, everything else keeps its JSON spelling
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 📖 Parse an import file: a JSON array of entries, or a stream of JSON values
/// (one per line, or tab-indented across lines, exactly what export writes).
pub(crate) fn parse_import_entries(contents: &str) -> Result<Vec<ImportEntry>> {
    if contents.trim_start().starts_with('[') {
        return serde_json::from_str(contents)
            .context("💀 The import file looked like a JSON array and then betrayed us.");
    }
    if contents.trim().is_empty() {
        anyhow::bail!("💀 The import file is empty. Not one entry, not even a bracket.");
    }
    serde_json::Deserializer::from_str(contents)
        .into_iter::<ImportEntry>()
        .enumerate()
        .map(|(position, entry)| {
            entry.with_context(|| {
                format!("💀 Entry #{} of the import file is not a record we understand.", position + 1)
            })
        })
        .collect()
}
