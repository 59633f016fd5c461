// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Events exchanged between workers and the coordinator on the control
//! topic. The wire format is self-describing JSON: unknown event types and
//! unknown fields are ignored on read so newer emitters can coexist with
//! older readers.

use bytes::Bytes;
use chrono::Utc;
use iceberg_connect_common::types::{TableIdent, TopicPartitionOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{DataFile, DeleteFile};
use crate::Result;

/// Starts a commit round; emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequestPayload {
    pub commit_id: Uuid,
}

/// The staged files of one closed writer; one per (worker, table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResponsePayload {
    pub commit_id: Uuid,
    pub table: TableIdent,
    pub partition_spec_id: i32,
    pub data_files: Vec<DataFile>,
    pub delete_files: Vec<DeleteFile>,
}

/// One per worker and round, covering the worker's entire assignment.
/// Partitions without buffered records report a null offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReadyPayload {
    pub commit_id: Uuid,
    pub assignments: Vec<TopicPartitionOffset>,
}

/// Emitted by the coordinator after each table snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitTablePayload {
    pub commit_id: Uuid,
    pub table: TableIdent,
    pub snapshot_id: i64,
    pub vtts_ms: Option<i64>,
}

/// Emitted last in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitCompletePayload {
    pub commit_id: Uuid,
    pub vtts_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    CommitRequest(CommitRequestPayload),
    CommitResponse(CommitResponsePayload),
    CommitReady(CommitReadyPayload),
    CommitTable(CommitTablePayload),
    CommitComplete(CommitCompletePayload),
}

const TYPE_COMMIT_REQUEST: &str = "commit-request";
const TYPE_COMMIT_RESPONSE: &str = "commit-response";
const TYPE_COMMIT_READY: &str = "commit-ready";
const TYPE_COMMIT_TABLE: &str = "commit-table";
const TYPE_COMMIT_COMPLETE: &str = "commit-complete";

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::CommitRequest(_) => TYPE_COMMIT_REQUEST,
            EventPayload::CommitResponse(_) => TYPE_COMMIT_RESPONSE,
            EventPayload::CommitReady(_) => TYPE_COMMIT_READY,
            EventPayload::CommitTable(_) => TYPE_COMMIT_TABLE,
            EventPayload::CommitComplete(_) => TYPE_COMMIT_COMPLETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub group_id: String,
    pub timestamp_ms: i64,
    pub payload: EventPayload,
}

/// The flat on-wire shape; `payload` stays opaque until the type tag is
/// recognized.
#[derive(Serialize, Deserialize)]
struct WireEvent {
    id: Uuid,
    group_id: String,
    timestamp_ms: i64,
    #[serde(rename = "type")]
    event_type: String,
    payload: serde_json::Value,
}

impl Event {
    pub fn new(group_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            payload,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Bytes> {
        let payload = match &self.payload {
            EventPayload::CommitRequest(p) => serde_json::to_value(p)?,
            EventPayload::CommitResponse(p) => serde_json::to_value(p)?,
            EventPayload::CommitReady(p) => serde_json::to_value(p)?,
            EventPayload::CommitTable(p) => serde_json::to_value(p)?,
            EventPayload::CommitComplete(p) => serde_json::to_value(p)?,
        };
        let wire = WireEvent {
            id: self.id,
            group_id: self.group_id.clone(),
            timestamp_ms: self.timestamp_ms,
            event_type: self.payload.type_name().to_owned(),
            payload,
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }

    /// Decode an event, returning `None` for event types this version does
    /// not know.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Option<Event>> {
        let wire: WireEvent = serde_json::from_slice(bytes)?;
        let payload = match wire.event_type.as_str() {
            TYPE_COMMIT_REQUEST => {
                EventPayload::CommitRequest(serde_json::from_value(wire.payload)?)
            }
            TYPE_COMMIT_RESPONSE => {
                EventPayload::CommitResponse(serde_json::from_value(wire.payload)?)
            }
            TYPE_COMMIT_READY => {
                EventPayload::CommitReady(serde_json::from_value(wire.payload)?)
            }
            TYPE_COMMIT_TABLE => {
                EventPayload::CommitTable(serde_json::from_value(wire.payload)?)
            }
            TYPE_COMMIT_COMPLETE => {
                EventPayload::CommitComplete(serde_json::from_value(wire.payload)?)
            }
            other => {
                tracing::debug!("ignoring unknown control event type {}", other);
                return Ok(None);
            }
        };
        Ok(Some(Event {
            id: wire.id,
            group_id: wire.group_id,
            timestamp_ms: wire.timestamp_ms,
            payload,
        }))
    }
}
