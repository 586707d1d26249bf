//! CloudEvents delivery envelope and topic naming.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rentme_bus::outbox::{EventRecord, TRACEPARENT_HEADER};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RelayError;

pub const SPEC_VERSION: &str = "1.0";
/// Media type of the envelope's `data` member.
pub const DATA_CONTENT_TYPE: &str = "application/json";
/// Media type of the whole published message.
pub const MESSAGE_CONTENT_TYPE: &str = "application/cloudevents+json";
pub const CONTENT_TYPE_HEADER: &str = "content-type";
const TOPIC_SUFFIX: &str = ".events.v1";

/// Topic for an event: its name up to the first `.`, suffixed with
/// `.events.v1` and prefixed with `prefix`.
///
/// `booking.requested` with prefix `prod.` goes to `prod.booking.events.v1`.
#[must_use]
pub fn topic_for(prefix: &str, event_name: &str) -> String {
    let family = match event_name.find('.') {
        Some(end) if end > 0 => &event_name[..end],
        _ => event_name,
    };
    format!("{prefix}{family}{TOPIC_SUFFIX}")
}

/// The published form of one outbox record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub specversion: String,
    /// Fresh per delivery; consumers deduplicate on it.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
    /// The outbox row this envelope was built from; never published.
    #[serde(skip)]
    pub outbox_id: Uuid,
}

impl Envelope {
    /// Wraps a staged record. The payload must be a JSON object.
    ///
    /// # Errors
    ///
    /// [`RelayError::Format`] when the payload is not a JSON object.
    pub fn wrap(record: &EventRecord, source: &str) -> Result<Self, RelayError> {
        let data: Map<String, Value> =
            serde_json::from_slice(&record.payload).map_err(|error| RelayError::Format {
                id: record.id,
                reason: error.to_string(),
            })?;
        Ok(Self {
            specversion: SPEC_VERSION.to_owned(),
            id: Uuid::new_v4(),
            event_type: format!("{}.v1", record.name),
            source: source.to_owned(),
            time: record.occurred_at,
            datacontenttype: DATA_CONTENT_TYPE.to_owned(),
            data,
            traceparent: record.headers.get(TRACEPARENT_HEADER).cloned(),
            outbox_id: record.id,
        })
    }

    /// Serialized message body.
    ///
    /// # Errors
    ///
    /// [`RelayError::Format`], naming the outbox row, if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RelayError> {
        serde_json::to_vec(self).map_err(|error| RelayError::Format {
            id: self.outbox_id,
            reason: error.to_string(),
        })
    }
}

/// Message headers: the staged headers plus the envelope content type.
#[must_use]
pub fn message_headers(record: &EventRecord) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::from([(
        CONTENT_TYPE_HEADER.to_owned(),
        MESSAGE_CONTENT_TYPE.to_owned(),
    )]);
    headers.extend(record.headers.clone());
    headers
}
