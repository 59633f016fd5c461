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

//! The control channel: a durable, at-least-once, message-ordered bus over
//! the control topic, plus the offset-commit discipline behind the
//! connector's exactly-once claim. The worker and coordinator state machines
//! consume a [`ChannelTransport`] by composition rather than inheriting a
//! template class.

pub mod kafka;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use iceberg_connect_common::types::TopicPartition;

use crate::events::Event;
use crate::Result;

/// A raw record drained from the control topic.
#[derive(Debug, Clone)]
pub struct Polled {
    pub payload: Bytes,
    pub partition: i32,
    pub offset: i64,
}

/// Transport capabilities the control channel needs from the log.
#[async_trait]
pub trait ChannelTransport: Send {
    /// Transactionally produce all payloads to the control topic AND commit
    /// the given source offsets to the coordinator consumer group. On
    /// failure neither becomes visible.
    async fn send(
        &mut self,
        payloads: Vec<Bytes>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()>;

    /// Drain control-topic records that are ready now, waiting at most
    /// `timeout` for the first one.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Polled>>;

    /// Commit the control-topic consumer position past everything polled so
    /// far. Only the coordinator role ever calls this.
    async fn commit_cursor(&mut self) -> Result<()>;

    /// The coordinator group's stored source offsets for the given
    /// partitions.
    async fn committed_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>>;

    /// Partition ids of a topic.
    async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>>;

    /// Release the producer, the consumer and the offsets client, in that
    /// order.
    async fn close(&mut self) -> Result<()>;
}

/// An event together with its position on the control topic.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: Event,
    pub partition: i32,
    pub offset: i64,
}

/// One role's connection to the control topic. Owns event encode/decode and
/// group-id filtering; the commit-cursor discipline differs per role: the
/// coordinator acks its position after finishing a round, workers never do
/// (their transient groups must re-observe the topic end after a restart).
pub struct ControlChannel<T: ChannelTransport> {
    name: String,
    group_id: String,
    commits_cursor: bool,
    transport: T,
}

impl<T: ChannelTransport> ControlChannel<T> {
    pub fn new(
        name: impl Into<String>,
        group_id: impl Into<String>,
        commits_cursor: bool,
        transport: T,
    ) -> Self {
        Self {
            name: name.into(),
            group_id: group_id.into(),
            commits_cursor,
            transport,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Publish events and advance the stored source offsets in one
    /// transaction.
    pub async fn send(
        &mut self,
        events: Vec<Event>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        let payloads = events
            .iter()
            .map(|e| e.to_json_bytes())
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(
            channel = %self.name,
            events = events.len(),
            offsets = source_offsets.len(),
            "sending control events"
        );
        self.transport.send(payloads, source_offsets).await
    }

    /// Drain ready events addressed to this channel's group. Events of
    /// unknown type or foreign groups are skipped.
    pub async fn drain(&mut self, timeout: Duration) -> Result<Vec<Envelope>> {
        let polled = self.transport.poll(timeout).await?;
        let mut envelopes = Vec::with_capacity(polled.len());
        for record in polled {
            let Some(event) = Event::from_json_bytes(&record.payload)? else {
                continue;
            };
            if event.group_id != self.group_id {
                tracing::debug!(
                    channel = %self.name,
                    group = %event.group_id,
                    "skipping control event from foreign group"
                );
                continue;
            }
            envelopes.push(Envelope {
                event,
                partition: record.partition,
                offset: record.offset,
            });
        }
        Ok(envelopes)
    }

    /// Commit the control-topic consumer position. A no-op for roles that
    /// never commit (workers).
    pub async fn ack(&mut self) -> Result<()> {
        if self.commits_cursor {
            self.transport.commit_cursor().await
        } else {
            Ok(())
        }
    }

    pub async fn committed_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        self.transport.committed_offsets(partitions).await
    }

    pub async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>> {
        self.transport.partitions_for(topic).await
    }

    pub async fn close(&mut self) -> Result<()> {
        tracing::info!(channel = %self.name, "closing control channel");
        self.transport.close().await
    }
}
