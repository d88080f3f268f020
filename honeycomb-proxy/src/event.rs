use std::fmt;
use std::io::Read;

use serde_json::{Map, Value};

use crate::api::ProxyError;
use crate::msgpack;

/// Timestamp key the ingest backend reads.
pub const TIMESTAMP_FIELD: &str = "_time";
/// Per-event timestamp field in Honeycomb batch payloads.
pub const BATCH_TIME_FIELD: &str = "time";
pub const EVENT_TIME_HEADER: &str = "x-honeycomb-event-time";

pub type Event = Map<String, Value>;

/// Destination bucket, taken from the final path segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataset(String);

impl Dataset {
    pub fn from_path(path: &str) -> Result<Dataset, ProxyError> {
        match path.rsplit('/').next() {
            Some(name) if !name.is_empty() => Ok(Dataset(name.to_string())),
            _ => Err(ProxyError::Validation(String::from("no dataset specified"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadFormat {
    Json,
    MessagePack,
}

impl PayloadFormat {
    fn from_content_type(content_type: &str) -> PayloadFormat {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case("application/msgpack")
            || media_type.eq_ignore_ascii_case("application/x-msgpack")
        {
            PayloadFormat::MessagePack
        } else {
            PayloadFormat::Json
        }
    }
}

/// Turns an (already decompressed) request body into events for `path`'s dataset.
///
/// A single object takes its timestamp from the `X-Honeycomb-Event-Time`
/// header, as is. Arrays keep each element as an event and move a string
/// `time` field over to `_time`. The two conventions come from the two
/// Honeycomb endpoints and are kept apart on purpose.
pub fn normalize<R: Read>(
    body: R,
    content_type: &str,
    event_time: Option<&str>,
    path: &str,
) -> Result<(Vec<Event>, Dataset), ProxyError> {
    let dataset = Dataset::from_path(path)?;

    let (value, ext_times) = match PayloadFormat::from_content_type(content_type) {
        PayloadFormat::MessagePack => {
            let body = msgpack::from_read(body)?;
            (body.value, body.ext_times)
        }
        PayloadFormat::Json => (read_json(body)?, Vec::new()),
    };

    let events = into_events(value, event_time, &ext_times)?;
    tracing::debug!(dataset = %dataset, events = events.len(), "normalized request body");

    Ok((events, dataset))
}

/// Reads the first JSON value in `body`; anything after it is ignored.
fn read_json<R: Read>(body: R) -> Result<Value, ProxyError> {
    serde_json::Deserializer::from_reader(body)
        .into_iter::<Value>()
        .next()
        .transpose()?
        .ok_or_else(|| ProxyError::Decode("empty request body".to_string()))
}

// `keep_time` lists array elements whose `time` was not a string on the wire.
fn into_events(
    value: Value,
    event_time: Option<&str>,
    keep_time: &[usize],
) -> Result<Vec<Event>, ProxyError> {
    let promote = |index: usize, event: Event| {
        if keep_time.contains(&index) {
            event
        } else {
            promote_batch_time(event)
        }
    };

    match value {
        Value::Object(mut event) => {
            if let Some(time) = event_time.filter(|t| !t.trim().is_empty()) {
                event.insert(TIMESTAMP_FIELD.to_string(), Value::String(time.to_string()));
            }
            Ok(vec![event])
        }
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(index, item)| match item {
                Value::Object(event) => Some(promote(index, event)),
                _ => None,
            })
            .collect()),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(event) => Ok(promote(index, event)),
                other => Err(ProxyError::Type(format!(
                    "{} at index {}",
                    kind(&other),
                    index
                ))),
            })
            .collect(),
        other => Err(ProxyError::Type(kind(&other).to_string())),
    }
}

fn promote_batch_time(mut event: Event) -> Event {
    if event.get(BATCH_TIME_FIELD).is_some_and(Value::is_string) {
        if let Some(time) = event.remove(BATCH_TIME_FIELD) {
            event.insert(TIMESTAMP_FIELD.to_string(), time);
        }
    }
    event
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
