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

//! An in-memory [`ChannelTransport`] backed by a shared bus. Used by tests
//! and embedded deployments; the single lock around the bus state is what
//! makes `send` transactional.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use iceberg_connect_common::types::TopicPartition;
use parking_lot::Mutex;

use super::{ChannelTransport, Polled};
use crate::Result;

#[derive(Debug, Default)]
struct BusInner {
    /// The single-partition control log.
    control_log: Vec<Bytes>,
    /// The coordinator group's control-topic position, the durable cursor
    /// a restarted coordinator resumes from.
    control_cursor: usize,
    /// The coordinator group's stored source offsets.
    source_offsets: HashMap<TopicPartition, i64>,
    /// Partition counts of known topics.
    topics: HashMap<String, i32>,
}

/// The shared state one logical cluster of transports talks through.
#[derive(Debug, Default)]
pub struct MemoryBus {
    inner: Mutex<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_topic(&self, name: impl Into<String>, partitions: i32) {
        self.inner.lock().topics.insert(name.into(), partitions);
    }

    /// The coordinator group's stored offset for one source partition.
    pub fn committed_offset(&self, tp: &TopicPartition) -> Option<i64> {
        self.inner.lock().source_offsets.get(tp).copied()
    }

    pub fn control_log_len(&self) -> usize {
        self.inner.lock().control_log.len()
    }
}

pub struct MemoryChannelTransport {
    bus: Arc<MemoryBus>,
    /// Next control-log index this transport reads.
    cursor: usize,
    /// Whether `commit_cursor` persists the position to the bus
    /// (coordinator role).
    persistent_cursor: bool,
}

impl MemoryChannelTransport {
    /// A coordinator transport: resumes from the bus-persisted cursor and
    /// persists it on commit.
    pub fn coordinator(bus: Arc<MemoryBus>) -> Self {
        let cursor = bus.inner.lock().control_cursor;
        Self {
            bus,
            cursor,
            persistent_cursor: true,
        }
    }

    /// A worker transport: starts at the current end of the control log and
    /// never persists its position.
    pub fn worker(bus: Arc<MemoryBus>) -> Self {
        let cursor = bus.inner.lock().control_log.len();
        Self {
            bus,
            cursor,
            persistent_cursor: false,
        }
    }
}

#[async_trait]
impl ChannelTransport for MemoryChannelTransport {
    async fn send(
        &mut self,
        payloads: Vec<Bytes>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        let mut inner = self.bus.inner.lock();
        inner.control_log.extend(payloads);
        inner.source_offsets.extend(source_offsets);
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Vec<Polled>> {
        let inner = self.bus.inner.lock();
        let available = &inner.control_log[self.cursor..];
        let polled = available
            .iter()
            .enumerate()
            .map(|(i, payload)| Polled {
                payload: payload.clone(),
                partition: 0,
                offset: (self.cursor + i) as i64,
            })
            .collect::<Vec<_>>();
        self.cursor = inner.control_log.len();
        Ok(polled)
    }

    async fn commit_cursor(&mut self) -> Result<()> {
        if self.persistent_cursor {
            self.bus.inner.lock().control_cursor = self.cursor;
        }
        Ok(())
    }

    async fn committed_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        let inner = self.bus.inner.lock();
        Ok(partitions
            .iter()
            .filter_map(|tp| inner.source_offsets.get(tp).map(|o| (tp.clone(), *o)))
            .collect())
    }

    async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>> {
        let inner = self.bus.inner.lock();
        let count = inner.topics.get(topic).copied().unwrap_or(1);
        Ok((0..count).collect())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ControlChannel;
    use crate::events::{CommitRequestPayload, Event, EventPayload};

    fn request_event(group: &str) -> Event {
        Event::new(
            group,
            EventPayload::CommitRequest(CommitRequestPayload {
                commit_id: uuid::Uuid::new_v4(),
            }),
        )
    }

    #[tokio::test]
    async fn test_send_is_atomic_with_offsets() {
        let bus = MemoryBus::new();
        let mut channel = ControlChannel::new(
            "coordinator",
            "cg-control",
            true,
            MemoryChannelTransport::coordinator(bus.clone()),
        );

        let tp = TopicPartition::new("events", 0);
        let mut offsets = HashMap::new();
        offsets.insert(tp.clone(), 101);
        channel
            .send(vec![request_event("cg-control")], offsets)
            .await
            .unwrap();

        assert_eq!(bus.control_log_len(), 1);
        assert_eq!(bus.committed_offset(&tp), Some(101));
    }

    #[tokio::test]
    async fn test_worker_transport_starts_at_latest() {
        let bus = MemoryBus::new();
        let mut coordinator = ControlChannel::new(
            "coordinator",
            "cg-control",
            true,
            MemoryChannelTransport::coordinator(bus.clone()),
        );
        coordinator
            .send(vec![request_event("cg-control")], HashMap::new())
            .await
            .unwrap();

        // A worker joining now must not see history.
        let mut late_worker = ControlChannel::new(
            "worker",
            "cg-control",
            false,
            MemoryChannelTransport::worker(bus.clone()),
        );
        assert!(late_worker
            .drain(Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());

        coordinator
            .send(vec![request_event("cg-control")], HashMap::new())
            .await
            .unwrap();
        assert_eq!(
            late_worker.drain(Duration::from_millis(10)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_coordinator_cursor_survives_restart() {
        let bus = MemoryBus::new();
        let mut first = ControlChannel::new(
            "coordinator",
            "cg-control",
            true,
            MemoryChannelTransport::coordinator(bus.clone()),
        );
        first
            .send(vec![request_event("cg-control")], HashMap::new())
            .await
            .unwrap();
        assert_eq!(first.drain(Duration::from_millis(10)).await.unwrap().len(), 1);
        first.ack().await.unwrap();

        first
            .send(vec![request_event("cg-control")], HashMap::new())
            .await
            .unwrap();
        // Crash without acking the second event: a restarted coordinator
        // replays it.
        let mut second = ControlChannel::new(
            "coordinator",
            "cg-control",
            true,
            MemoryChannelTransport::coordinator(bus.clone()),
        );
        let replayed = second.drain(Duration::from_millis(10)).await.unwrap();
        assert_eq!(replayed.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_group_filtered() {
        let bus = MemoryBus::new();
        let mut sender = ControlChannel::new(
            "coordinator",
            "cg-other",
            true,
            MemoryChannelTransport::coordinator(bus.clone()),
        );
        let mut receiver = ControlChannel::new(
            "worker",
            "cg-control",
            false,
            MemoryChannelTransport::worker(bus.clone()),
        );
        sender
            .send(vec![request_event("cg-other")], HashMap::new())
            .await
            .unwrap();
        assert!(receiver
            .drain(Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
    }
}
