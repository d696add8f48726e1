//! Canonical call records and normalization of the provider's raw call entries.
//!
//! The call-log API does not return one stable shape: depending on account
//! settings an entry may be flat, carry nested `from`/`to`/`recording` objects,
//! or wrap both legs under `legs` with a `recordings` array. Each recognized
//! shape is its own struct with a pure normalization into [`CallRecord`]; the
//! shape is picked by looking at the JSON structure before deserializing.

use crate::error::{validation_error, Error};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Normalized telephony call metadata; the pipeline's unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub from_number: String,
    pub to_number: String,
    pub from_username: String,
    pub from_name: String,
    /// ISO-8601 as reported by the provider
    pub start_time: String,
    /// Seconds
    pub duration: u64,
    /// May be empty
    pub recording_url: String,
    pub broker_id: String,
    /// YYYY-MM-DD (UTC), derived from `start_time`
    pub date: String,
}

impl CallRecord {
    /// A record carrying both a caller name and a recording wins dedup collisions.
    pub fn is_rich(&self) -> bool {
        !self.from_name.trim().is_empty() && !self.recording_url.trim().is_empty()
    }
}

/// Provider ids arrive as strings or numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Party {
    #[serde(default, alias = "phone_number")]
    number: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    user_id: Option<Scalar>,
    #[serde(default)]
    routing_id: Option<Scalar>,
}

impl Party {
    fn routing_identifier(&self) -> Option<String> {
        self.user_id
            .clone()
            .or_else(|| self.routing_id.clone())
            .map(Scalar::into_string)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RecordingRef {
    #[serde(default)]
    url: Option<String>,
}

/// Every field at the top level.
#[derive(Debug, Clone, Deserialize)]
pub struct FlatCall {
    #[serde(default)]
    call_id: Option<Scalar>,
    #[serde(default)]
    id: Option<Scalar>,
    #[serde(default)]
    from_number: Option<String>,
    #[serde(default)]
    from_name: Option<String>,
    #[serde(default)]
    from_username: Option<String>,
    #[serde(default)]
    to_number: Option<String>,
    #[serde(default)]
    to_user_id: Option<Scalar>,
    #[serde(default)]
    recording_url: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// `from`, `to` and `recording` as sub-objects.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedCall {
    #[serde(default)]
    call_id: Option<Scalar>,
    #[serde(default)]
    id: Option<Scalar>,
    #[serde(default)]
    from: Party,
    #[serde(default)]
    to: Party,
    #[serde(default)]
    recording: Option<RecordingRef>,
    #[serde(default)]
    recording_url: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Legs {
    #[serde(default)]
    from: Party,
    #[serde(default)]
    to: Party,
}

/// Both parties under `legs`, recordings as an array.
#[derive(Debug, Clone, Deserialize)]
pub struct LegsCall {
    #[serde(default)]
    call_id: Option<Scalar>,
    #[serde(default)]
    id: Option<Scalar>,
    legs: Legs,
    #[serde(default)]
    recordings: Vec<RecordingRef>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// The recognized shapes of a raw call-log entry.
#[derive(Debug, Clone)]
pub enum RawCall {
    Flat(FlatCall),
    Nested(NestedCall),
    Legs(LegsCall),
}

impl RawCall {
    /// Pick the shape by inspecting the entry's structure, then deserialize it.
    pub fn from_value(value: &Value) -> Result<Self, Error> {
        let object = value
            .as_object()
            .ok_or_else(|| validation_error("call-log entry is not a JSON object"))?;
        let is_object = |key: &str| object.get(key).is_some_and(Value::is_object);

        let raw = if is_object("legs") {
            RawCall::Legs(serde_json::from_value(value.clone())?)
        } else if is_object("from") || is_object("to") {
            RawCall::Nested(serde_json::from_value(value.clone())?)
        } else {
            RawCall::Flat(serde_json::from_value(value.clone())?)
        };
        Ok(raw)
    }

    pub fn normalize(self) -> CallRecord {
        match self {
            RawCall::Flat(call) => CallFields {
                call_id: pick_id(call.call_id, call.id),
                from_number: call.from_number,
                to_number: call.to_number,
                from_username: call.from_username,
                from_name: call.from_name,
                to_user_id: call.to_user_id.map(Scalar::into_string),
                recording_url: call.recording_url,
                start_time: call.start_time,
                duration: call.duration,
            },
            RawCall::Nested(call) => CallFields {
                call_id: pick_id(call.call_id, call.id),
                to_user_id: call.to.routing_identifier(),
                from_number: call.from.number,
                to_number: call.to.number,
                from_username: call.from.username,
                from_name: call.from.name,
                recording_url: call.recording.and_then(|r| r.url).or(call.recording_url),
                start_time: call.start_time,
                duration: call.duration,
            },
            RawCall::Legs(call) => CallFields {
                call_id: pick_id(call.call_id, call.id),
                to_user_id: call.legs.to.routing_identifier(),
                from_number: call.legs.from.number,
                to_number: call.legs.to.number,
                from_username: call.legs.from.username,
                from_name: call.legs.from.name,
                recording_url: call.recordings.into_iter().find_map(|r| r.url),
                start_time: call.start_time,
                duration: call.duration,
            },
        }
        .into_record()
    }
}

fn pick_id(call_id: Option<Scalar>, id: Option<Scalar>) -> Option<String> {
    call_id.or(id).map(Scalar::into_string)
}

/// Shape-independent intermediate all normalizations funnel through.
struct CallFields {
    call_id: Option<String>,
    from_number: Option<String>,
    to_number: Option<String>,
    from_username: Option<String>,
    from_name: Option<String>,
    to_user_id: Option<String>,
    recording_url: Option<String>,
    start_time: Option<String>,
    duration: Option<f64>,
}

impl CallFields {
    fn into_record(self) -> CallRecord {
        let text = |value: Option<String>| value.map(|v| v.trim().to_string()).unwrap_or_default();

        let from_username = text(self.from_username);
        let from_name = text(self.from_name);
        let start_time = text(self.start_time);
        let broker_id = derive_broker_id(self.to_user_id.as_deref(), &from_username, &from_name);
        let date = call_date(&start_time);

        CallRecord {
            call_id: text(self.call_id),
            from_number: text(self.from_number),
            to_number: text(self.to_number),
            from_username,
            from_name,
            duration: whole_seconds(self.duration),
            recording_url: text(self.recording_url),
            broker_id,
            date,
            start_time,
        }
    }
}

fn whole_seconds(duration: Option<f64>) -> u64 {
    match duration {
        Some(secs) if secs.is_finite() && secs > 0.0 => secs.round() as u64,
        _ => 0,
    }
}

/// Broker id heuristic, in order of preference:
/// an explicit routing/user id on the "to" leg, the leading digits of a SIP
/// username before `@`, the first three lowercase characters of the caller's
/// display name. Empty when none of these is available.
pub fn derive_broker_id(to_user_id: Option<&str>, from_username: &str, from_name: &str) -> String {
    if let Some(id) = to_user_id.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }

    let local_part = from_username.split('@').next().unwrap_or_default().trim();
    let digits: String = local_part.chars().take_while(char::is_ascii_digit).collect();
    if !digits.is_empty() {
        return digits;
    }

    from_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(3)
        .collect::<String>()
        .to_lowercase()
}

/// UTC calendar day of an ISO-8601 timestamp; empty when unparseable.
pub fn call_date(start_time: &str) -> String {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(start_time) {
        return timestamp.with_timezone(&Utc).format("%Y-%m-%d").to_string();
    }
    start_time
        .get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        .map(|day| day.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Collapse records sharing a call_id.
///
/// First-seen wins, except that a rich record (caller name and recording URL)
/// replaces an earlier record that is not rich. The surviving record keeps the
/// first-seen position. Records without a call_id collapse under the empty id
/// like any other; the eligibility filter rejects the survivor later.
pub fn deduplicate(calls: Vec<CallRecord>) -> Vec<CallRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<CallRecord> = Vec::with_capacity(calls.len());

    for call in calls {
        match positions.get(&call.call_id) {
            Some(&position) => {
                if call.is_rich() && !unique[position].is_rich() {
                    unique[position] = call;
                }
            }
            None => {
                positions.insert(call.call_id.clone(), unique.len());
                unique.push(call);
            }
        }
    }

    unique
}
