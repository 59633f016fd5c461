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

//! The Kafka-backed [`ChannelTransport`]. Event produce and source-offset
//! commit share one producer transaction; the offsets land in the
//! coordinator consumer group, which doubles as the durable source cursor.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use iceberg_connect_common::types::TopicPartition;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use uuid::Uuid;

use super::{ChannelTransport, Polled};
use crate::config::SinkConfig;
use crate::{ConnectError, Result};

/// Used for the synchronous rdkafka calls: transaction control, committed
/// offset lookups and metadata fetches. All of them run rarely, outside the
/// per-record hot path.
const KAFKA_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct KafkaChannelTransport {
    control_topic: String,
    producer: FutureProducer,
    consumer: BaseConsumer,
    /// A consumer configured into the coordinator group. It never
    /// subscribes; it exists for committed-offset queries and to supply the
    /// group metadata that fences `send_offsets_to_transaction`.
    group_consumer: BaseConsumer,
}

impl KafkaChannelTransport {
    /// The coordinator transport: consumes the control topic under the
    /// stable control group so its position survives restarts.
    pub fn for_coordinator(config: &SinkConfig) -> Result<Self> {
        Self::new(config, config.control_group_id().to_owned(), "earliest")
    }

    /// A worker transport: a transient `<group>-<uuid>` consumer group that
    /// starts at the current end of the control topic and never commits, so
    /// a restarted worker observes every future commit request regardless of
    /// its history.
    pub fn for_worker(config: &SinkConfig) -> Result<Self> {
        let group = format!("{}-{}", config.control_group_id(), Uuid::new_v4());
        Self::new(config, group, "latest")
    }

    fn new(
        config: &SinkConfig,
        consumer_group: String,
        auto_offset_reset: &str,
    ) -> Result<Self> {
        let kafka_props = config.kafka_props();
        let client_config = |extra: &[(&str, String)]| {
            let mut client = ClientConfig::new();
            for (k, v) in &kafka_props {
                client.set(k, v);
            }
            for (k, v) in extra {
                client.set(*k, v);
            }
            client
        };

        let producer: FutureProducer = client_config(&[(
            "transactional.id",
            format!("{}-txn-{}", config.control_group_id(), Uuid::new_v4()),
        )])
        .create()?;
        producer.init_transactions(KAFKA_CALL_TIMEOUT)?;

        let consumer: BaseConsumer = client_config(&[
            ("group.id", consumer_group),
            ("enable.auto.commit", "false".to_owned()),
            ("enable.auto.offset.store", "false".to_owned()),
            ("enable.partition.eof", "false".to_owned()),
            ("auto.offset.reset", auto_offset_reset.to_owned()),
        ])
        .create()?;

        // A missing control topic is fatal misconfiguration, not something
        // to retry into existence.
        let metadata = consumer.fetch_metadata(Some(config.control_topic()), KAFKA_CALL_TIMEOUT)?;
        let topic_exists = metadata
            .topics()
            .iter()
            .any(|t| t.name() == config.control_topic() && !t.partitions().is_empty());
        if !topic_exists {
            return Err(ConnectError::Config(anyhow!(
                "control topic {} does not exist",
                config.control_topic()
            )));
        }
        consumer.subscribe(&[config.control_topic()])?;

        let group_consumer: BaseConsumer = client_config(&[
            ("group.id", config.control_group_id().to_owned()),
            ("enable.auto.commit", "false".to_owned()),
        ])
        .create()?;

        Ok(Self {
            control_topic: config.control_topic().to_owned(),
            producer,
            consumer,
            group_consumer,
        })
    }

    async fn produce_in_transaction(
        &self,
        payloads: &[Bytes],
        source_offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        for payload in payloads {
            self.producer
                .send(
                    FutureRecord::<(), [u8]>::to(&self.control_topic)
                        .payload(payload.as_ref()),
                    Timeout::Never,
                )
                .await
                .map_err(|(e, _)| ConnectError::Kafka(e))?;
        }
        if !source_offsets.is_empty() {
            let mut tpl = TopicPartitionList::new();
            for (tp, offset) in source_offsets {
                tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
            }
            let metadata = self.group_consumer.group_metadata().ok_or_else(|| {
                ConnectError::Channel(anyhow!("control group metadata unavailable"))
            })?;
            self.producer
                .send_offsets_to_transaction(&tpl, &metadata, KAFKA_CALL_TIMEOUT)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelTransport for KafkaChannelTransport {
    async fn send(
        &mut self,
        payloads: Vec<Bytes>,
        source_offsets: HashMap<TopicPartition, i64>,
    ) -> Result<()> {
        self.producer.begin_transaction()?;
        match self.produce_in_transaction(&payloads, &source_offsets).await {
            Ok(()) => {
                self.producer.commit_transaction(KAFKA_CALL_TIMEOUT)?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self.producer.abort_transaction(KAFKA_CALL_TIMEOUT) {
                    tracing::warn!(error = %abort_err, "failed to abort control transaction");
                }
                Err(e)
            }
        }
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Polled>> {
        let mut polled = Vec::new();
        let mut wait = timeout;
        while let Some(result) = self.consumer.poll(wait) {
            let message = result?;
            if let Some(payload) = message.payload() {
                polled.push(Polled {
                    payload: Bytes::copy_from_slice(payload),
                    partition: message.partition(),
                    offset: message.offset(),
                });
            }
            self.consumer.store_offset_from_message(&message)?;
            wait = Duration::ZERO;
        }
        Ok(polled)
    }

    async fn commit_cursor(&mut self) -> Result<()> {
        self.consumer.commit_consumer_state(CommitMode::Sync)?;
        Ok(())
    }

    async fn committed_offsets(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>> {
        let mut tpl = TopicPartitionList::new();
        for tp in partitions {
            tpl.add_partition(&tp.topic, tp.partition);
        }
        let committed = self
            .group_consumer
            .committed_offsets(tpl, KAFKA_CALL_TIMEOUT)?;
        let mut offsets = HashMap::with_capacity(committed.count());
        for elem in committed.elements() {
            if let Offset::Offset(offset) = elem.offset() {
                offsets.insert(
                    TopicPartition::new(elem.topic(), elem.partition()),
                    offset,
                );
            }
        }
        Ok(offsets)
    }

    async fn partitions_for(&self, topic: &str) -> Result<Vec<i32>> {
        let metadata = self
            .consumer
            .fetch_metadata(Some(topic), KAFKA_CALL_TIMEOUT)?;
        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| t.partitions().iter().map(|p| p.id()).collect())
            .unwrap_or_default();
        Ok(partitions)
    }

    async fn close(&mut self) -> Result<()> {
        // Flush before the clients drop; producer, consumer and the offsets
        // consumer are released in field order when the transport drops.
        if let Err(e) = self.producer.flush(KAFKA_CALL_TIMEOUT) {
            tracing::warn!(error = %e, "failed to flush control producer");
        }
        self.consumer.unsubscribe();
        Ok(())
    }
}
