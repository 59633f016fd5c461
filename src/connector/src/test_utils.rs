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

//! Shared fixtures for worker and coordinator tests: a recording writer
//! factory, a scripted task context, and record builders.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use iceberg_connect_common::types::{TableIdent, TopicPartition};
use iceberg_connect_common::SinkRecord;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::catalog::{DataFile, FileFormat};
use crate::config::SinkConfig;
use crate::task::SinkTaskContext;
use crate::writer::{TableWriter, WriterFactory, WriterResult};
use crate::Result;

pub(crate) fn test_config(entries: &[(&str, &str)]) -> SinkConfig {
    let props: HashMap<String, String> = entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    SinkConfig::from_properties(props).unwrap()
}

pub(crate) fn record(
    topic: &str,
    partition: i32,
    offset: i64,
    timestamp_ms: Option<i64>,
    value: Option<Value>,
) -> SinkRecord {
    SinkRecord {
        topic: topic.to_owned(),
        partition,
        offset,
        timestamp_ms,
        key: None,
        value,
    }
}

/// A scripted stand-in for the sink framework.
#[derive(Debug, Default)]
pub(crate) struct TestContext {
    assignment: Mutex<Vec<TopicPartition>>,
    commit_requests: AtomicUsize,
    reset_offsets: Mutex<HashMap<TopicPartition, i64>>,
}

impl TestContext {
    pub fn new(assignment: Vec<TopicPartition>) -> Arc<Self> {
        Arc::new(Self {
            assignment: Mutex::new(assignment),
            ..Default::default()
        })
    }

    pub fn commit_requests(&self) -> usize {
        self.commit_requests.load(Ordering::SeqCst)
    }

    pub fn last_reset(&self) -> HashMap<TopicPartition, i64> {
        self.reset_offsets.lock().clone()
    }
}

impl SinkTaskContext for TestContext {
    fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().clone()
    }

    fn request_commit(&self) {
        self.commit_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn reset_offsets(&self, offsets: &HashMap<TopicPartition, i64>) {
        *self.reset_offsets.lock() = offsets.clone();
    }
}

/// Buffers records in memory and stages one synthetic data file per closed
/// writer.
#[derive(Debug, Default)]
pub(crate) struct RecordingWriterFactory {
    counters: Arc<WriterCounters>,
}

#[derive(Debug, Default)]
struct WriterCounters {
    created: AtomicUsize,
    completed: AtomicUsize,
    aborted: AtomicUsize,
}

impl RecordingWriterFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.counters.aborted.load(Ordering::SeqCst)
    }
}

struct RecordingWriter {
    table: TableIdent,
    records: Vec<SinkRecord>,
    counters: Arc<WriterCounters>,
}

#[async_trait]
impl TableWriter for RecordingWriter {
    async fn write(&mut self, record: &SinkRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    async fn complete(self: Box<Self>) -> Result<WriterResult> {
        self.counters.completed.fetch_add(1, Ordering::SeqCst);
        let data_files = if self.records.is_empty() {
            vec![]
        } else {
            vec![DataFile {
                path: format!("mem://{}/{}.parquet", self.table, Uuid::new_v4()),
                format: FileFormat::Parquet,
                partition: BTreeMap::new(),
                record_count: self.records.len() as u64,
                file_size_bytes: self.records.len() as u64 * 128,
            }]
        };
        Ok(WriterResult {
            table: self.table,
            partition_spec_id: 0,
            data_files,
            delete_files: vec![],
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl WriterFactory for RecordingWriterFactory {
    async fn create(&self, table: &TableIdent) -> Result<Box<dyn TableWriter>> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingWriter {
            table: table.clone(),
            records: vec![],
            counters: self.counters.clone(),
        }))
    }
}
