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

//! A sink connector core that drains record streams from Kafka and commits
//! them as atomic snapshots into Iceberg-style tables.
//!
//! Each sink task runs a [`worker::Worker`] that buffers records into
//! per-table writers; exactly one task additionally runs the
//! [`coordinator::Coordinator`], which drives commit rounds over a control
//! topic and performs the multi-table catalog commit. Source offsets live in
//! the coordinator consumer group and advance only inside the transactional
//! control-channel send, which is what makes commits idempotent across task
//! restarts.

pub mod catalog;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod events;
pub mod metrics;
pub mod task;
pub mod worker;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_utils;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConnectError>;

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(anyhow::Error),
    #[error("record conversion error: {0}")]
    Convert(#[from] iceberg_connect_common::cast::CastError),
    #[error("catalog error: {0}")]
    Catalog(anyhow::Error),
    #[error("writer error: {0}")]
    Writer(anyhow::Error),
    #[error("channel error: {0}")]
    Channel(anyhow::Error),
}
