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

//! The file-format writer seam. Writers are created lazily, one per
//! destination table per commit round, and live until the round closes them
//! (`complete`) or the task shuts down (`close`).

use async_trait::async_trait;
use iceberg_connect_common::types::TableIdent;
use iceberg_connect_common::SinkRecord;

use crate::catalog::{DataFile, DeleteFile};
use crate::Result;

/// The staged output of one closed writer.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterResult {
    pub table: TableIdent,
    pub partition_spec_id: i32,
    pub data_files: Vec<DataFile>,
    pub delete_files: Vec<DeleteFile>,
}

/// Accumulates records for one destination table.
#[async_trait]
pub trait TableWriter: Send {
    /// Convert the record value into the table schema and buffer it.
    /// Conversion and IO failures surface to the framework, which pauses
    /// and retries the partition.
    async fn write(&mut self, record: &SinkRecord) -> Result<()>;

    /// Flush and close, returning the staged files. Returning no files is
    /// legal and yields a no-op commit response.
    async fn complete(self: Box<Self>) -> Result<WriterResult>;

    /// Abort, deleting staged files on a best-effort basis.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Creates writers; implemented by the file-format integration.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    async fn create(&self, table: &TableIdent) -> Result<Box<dyn TableWriter>>;
}
