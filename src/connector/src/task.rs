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

//! Glue between the sink framework's task lifecycle and the worker and
//! coordinator state machines.

use std::collections::HashMap;

use iceberg_connect_common::types::TopicPartition;
use iceberg_connect_common::SinkRecord;

use crate::channel::ChannelTransport;
use crate::coordinator::Coordinator;
use crate::worker::Worker;
use crate::Result;

/// The framework's side of the task: partition assignment and offset
/// checkpointing. Implemented by the embedding runtime.
pub trait SinkTaskContext: Send + Sync {
    /// The source partitions currently assigned to this task.
    fn assignment(&self) -> Vec<TopicPartition>;

    /// Ask the framework to trigger an offset commit soon.
    fn request_commit(&self);

    /// Push authoritative source offsets into the framework checkpoint,
    /// overriding whatever it tracked itself.
    fn reset_offsets(&self, offsets: &HashMap<TopicPartition, i64>);
}

/// Coordinator election is delegated to partition assignment: the task that
/// owns partition 0 of the lexicographically first source topic is the
/// leader.
pub fn is_leader(source_topics: &[String], assignment: &[TopicPartition]) -> bool {
    source_topics
        .iter()
        .min()
        .map(|topic| {
            assignment
                .iter()
                .any(|tp| tp.topic == *topic && tp.partition == 0)
        })
        .unwrap_or(false)
}

/// One sink task: a worker, plus the coordinator on the leader task.
pub struct IcebergSinkTask<T: ChannelTransport> {
    worker: Worker<T>,
    coordinator: Option<Coordinator<T>>,
}

impl<T: ChannelTransport> IcebergSinkTask<T> {
    pub fn new(worker: Worker<T>, coordinator: Option<Coordinator<T>>) -> Self {
        Self {
            worker,
            coordinator,
        }
    }

    /// Called once after the framework opens the task's partitions: aligns
    /// the framework checkpoint with the control group's stored offsets.
    pub async fn open(&mut self) -> Result<()> {
        self.worker.sync_commit_offsets().await
    }

    /// Deliver a batch of records, then run one poll cycle.
    pub async fn put(&mut self, records: Vec<SinkRecord>) -> Result<()> {
        self.worker.save(records).await?;
        self.poll().await
    }

    /// One cooperative cycle for both state machines.
    pub async fn poll(&mut self) -> Result<()> {
        if let Some(coordinator) = &mut self.coordinator {
            coordinator.process().await?;
        }
        self.worker.process().await
    }

    /// Framework-driven offset commit: mirror the control group's stored
    /// offsets instead of the framework's own bookkeeping.
    pub async fn pre_commit(&mut self) -> Result<()> {
        self.worker.sync_commit_offsets().await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.worker.stop().await?;
        if let Some(coordinator) = &mut self.coordinator {
            coordinator.stop().await?;
        }
        Ok(())
    }
}
