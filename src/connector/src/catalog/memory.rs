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

//! An in-memory [`Catalog`] for tests and embedded use.

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use iceberg_connect_common::types::TableIdent;
use parking_lot::Mutex;

use super::{Catalog, DataFile, DeleteFile, SnapshotSummary, TableCommit};
use crate::{ConnectError, Result};

const RECENT_SNAPSHOT_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct TableState {
    snapshots: Vec<CommittedSnapshot>,
}

#[derive(Debug, Clone)]
struct CommittedSnapshot {
    summary: SnapshotSummary,
    data_files: Vec<DataFile>,
    delete_files: Vec<DeleteFile>,
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: Mutex<HashMap<TableIdent, TableState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, table: TableIdent) {
        self.tables.lock().entry(table).or_default();
    }

    /// All data files committed to the table, in commit order.
    pub fn data_files(&self, table: &TableIdent) -> Vec<DataFile> {
        self.tables
            .lock()
            .get(table)
            .map(|state| {
                state
                    .snapshots
                    .iter()
                    .flat_map(|s| s.data_files.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot_count(&self, table: &TableIdent) -> usize {
        self.tables
            .lock()
            .get(table)
            .map(|state| state.snapshots.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn table_exists(&self, table: &TableIdent) -> Result<bool> {
        Ok(self.tables.lock().contains_key(table))
    }

    async fn recent_snapshots(&self, table: &TableIdent) -> Result<Vec<SnapshotSummary>> {
        let tables = self.tables.lock();
        let state = tables
            .get(table)
            .ok_or_else(|| ConnectError::Catalog(anyhow!("table {} not found", table)))?;
        Ok(state
            .snapshots
            .iter()
            .rev()
            .take(RECENT_SNAPSHOT_WINDOW)
            .map(|s| s.summary.clone())
            .collect())
    }

    async fn commit(&self, table: &TableIdent, commit: TableCommit) -> Result<i64> {
        let mut tables = self.tables.lock();
        let state = tables
            .get_mut(table)
            .ok_or_else(|| ConnectError::Catalog(anyhow!("table {} not found", table)))?;
        let snapshot_id = state.snapshots.len() as i64 + 1;
        state.snapshots.push(CommittedSnapshot {
            summary: SnapshotSummary {
                snapshot_id,
                properties: commit.properties,
            },
            data_files: commit.data_files,
            delete_files: commit.delete_files,
        });
        Ok(snapshot_id)
    }
}
