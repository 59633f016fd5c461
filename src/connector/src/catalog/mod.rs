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

//! The table-service seam. The connector only needs existence checks,
//! recent snapshot summaries for idempotence, and an atomic multi-file
//! commit with user-settable summary properties; concrete catalogs (REST,
//! Glue, Hive) implement [`Catalog`] behind this interface.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use iceberg_connect_common::types::TableIdent;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Snapshot summary key carrying the commit id of the round that produced
/// the snapshot. The coordinator checks it before re-appending files.
pub const COMMIT_ID_SNAPSHOT_PROP: &str = "connect.commit-id";
/// Snapshot summary key carrying the round's valid-through timestamp.
pub const VTTS_SNAPSHOT_PROP: &str = "connect.vtts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Parquet,
    Avro,
    Orc,
}

/// A staged data file as reported by a closed writer. Travels inside
/// commit-response events, so it is fully serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub path: String,
    pub format: FileFormat,
    /// Partition values keyed by partition field name.
    #[serde(default)]
    pub partition: BTreeMap<String, serde_json::Value>,
    pub record_count: u64,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteFile {
    pub path: String,
    pub format: FileFormat,
    #[serde(default)]
    pub partition: BTreeMap<String, serde_json::Value>,
    pub record_count: u64,
    pub file_size_bytes: u64,
    /// Field ids for equality deletes; empty for positional deletes.
    #[serde(default)]
    pub equality_field_ids: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub snapshot_id: i64,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOperation {
    /// Data files only.
    Append,
    /// Data and delete files in one snapshot.
    RowDelta,
}

/// One atomic snapshot against one table.
#[derive(Debug, Clone)]
pub struct TableCommit {
    pub operation: CommitOperation,
    pub data_files: Vec<DataFile>,
    pub delete_files: Vec<DeleteFile>,
    pub properties: BTreeMap<String, String>,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn table_exists(&self, table: &TableIdent) -> Result<bool>;

    /// Recent snapshot summaries of the table, newest first. Only a bounded
    /// recent window is needed; the idempotence check looks for a commit id
    /// from the immediately preceding rounds.
    async fn recent_snapshots(&self, table: &TableIdent) -> Result<Vec<SnapshotSummary>>;

    /// Atomically attach the commit's files to the table as one snapshot
    /// and return the new snapshot id.
    async fn commit(&self, table: &TableIdent, commit: TableCommit) -> Result<i64>;
}
