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

//! The per-task worker: routes incoming records into per-table writers,
//! answers commit requests from the coordinator, and keeps the per-partition
//! source offsets that advance only through the transactional control-channel
//! send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use iceberg_connect_common::record::extract_route_value;
use iceberg_connect_common::types::{Offset, TableIdent, TopicPartition, TopicPartitionOffset};
use iceberg_connect_common::SinkRecord;
use itertools::Itertools;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::channel::{ChannelTransport, ControlChannel, Envelope};
use crate::config::{Routing, SinkConfig};
use crate::events::{CommitReadyPayload, CommitResponsePayload, Event, EventPayload};
use crate::metrics::SinkMetrics;
use crate::task::SinkTaskContext;
use crate::writer::{TableWriter, WriterFactory};
use crate::Result;

const POLL_DURATION: Duration = Duration::from_millis(100);

pub struct Worker<T: ChannelTransport> {
    channel: ControlChannel<T>,
    routing: Routing,
    catalog: Arc<dyn Catalog>,
    writer_factory: Arc<dyn WriterFactory>,
    context: Arc<dyn SinkTaskContext>,
    metrics: Arc<SinkMetrics>,

    // The three maps below are reset together at the end of a commit round.
    writers: HashMap<TableIdent, Box<dyn TableWriter>>,
    table_exists: HashMap<TableIdent, bool>,
    source_offsets: HashMap<TopicPartition, Offset>,
}

impl<T: ChannelTransport> Worker<T> {
    pub fn new(
        config: &SinkConfig,
        channel: ControlChannel<T>,
        catalog: Arc<dyn Catalog>,
        writer_factory: Arc<dyn WriterFactory>,
        context: Arc<dyn SinkTaskContext>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        Self {
            channel,
            routing: config.routing().clone(),
            catalog,
            writer_factory,
            context,
            metrics,
            writers: HashMap::new(),
            table_exists: HashMap::new(),
            source_offsets: HashMap::new(),
        }
    }

    /// Buffer a batch of records delivered by the framework.
    pub async fn save(&mut self, records: Vec<SinkRecord>) -> Result<()> {
        for record in records {
            self.save_one(record).await?;
        }
        Ok(())
    }

    async fn save_one(&mut self, record: SinkRecord) -> Result<()> {
        // The offset advances before routing: dynamically routed records
        // whose table does not exist are skipped, not retried.
        self.source_offsets
            .insert(record.topic_partition(), record.next_offset());

        enum Plan {
            Fixed(Vec<TableIdent>),
            Dynamic(TableIdent),
            Skip,
        }

        let plan = match &self.routing {
            Routing::All { tables } => Plan::Fixed(tables.clone()),
            Routing::Regex {
                route_field,
                routes,
            } => match record
                .value
                .as_ref()
                .and_then(|v| extract_route_value(v, route_field))
            {
                Some(route) => Plan::Fixed(
                    routes
                        .iter()
                        .filter(|(_, regex)| regex.is_match(&route))
                        .map(|(table, _)| table.clone())
                        .collect(),
                ),
                None => Plan::Skip,
            },
            Routing::Dynamic { route_field } => match record
                .value
                .as_ref()
                .and_then(|v| extract_route_value(v, route_field))
                .and_then(|route| TableIdent::parse(&route).ok())
            {
                Some(table) => Plan::Dynamic(table.to_lowercase()),
                None => Plan::Skip,
            },
        };

        let targets = match plan {
            Plan::Fixed(tables) => tables,
            Plan::Skip => return Ok(()),
            Plan::Dynamic(table) => {
                if self.table_exists_cached(&table).await? {
                    vec![table]
                } else {
                    self.metrics.records_dropped_table_missing.inc();
                    tracing::debug!(table = %table, "dropping record for missing table");
                    return Ok(());
                }
            }
        };

        for table in targets {
            self.write_to_table(&table, &record).await?;
        }
        Ok(())
    }

    /// Catalog existence lookups are memoized per commit round.
    async fn table_exists_cached(&mut self, table: &TableIdent) -> Result<bool> {
        if let Some(exists) = self.table_exists.get(table) {
            return Ok(*exists);
        }
        let exists = self.catalog.table_exists(table).await?;
        self.table_exists.insert(table.clone(), exists);
        Ok(exists)
    }

    async fn write_to_table(&mut self, table: &TableIdent, record: &SinkRecord) -> Result<()> {
        if !self.writers.contains_key(table) {
            let writer = self.writer_factory.create(table).await?;
            self.writers.insert(table.clone(), writer);
        }
        let writer = self
            .writers
            .get_mut(table)
            .expect("writer inserted above");
        writer.write(record).await?;
        self.metrics.records_written.inc();
        Ok(())
    }

    /// Drain the control topic and react to commit requests.
    pub async fn process(&mut self) -> Result<()> {
        let envelopes = self.channel.drain(POLL_DURATION).await?;
        let mut handled = false;
        for envelope in envelopes {
            handled |= self.receive(envelope).await?;
        }
        if handled {
            // A no-op for the worker's transient group; kept for symmetry
            // with the coordinator's cursor discipline.
            self.channel.ack().await?;
        }
        Ok(())
    }

    async fn receive(&mut self, envelope: Envelope) -> Result<bool> {
        match envelope.event.payload {
            EventPayload::CommitRequest(request) => {
                self.handle_commit_request(request.commit_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn handle_commit_request(&mut self, commit_id: Uuid) -> Result<()> {
        let group_id = self.channel.group_id().to_owned();

        // Close every open writer and turn its staged files into a response.
        let writers = std::mem::take(&mut self.writers)
            .into_iter()
            .sorted_by(|a, b| a.0.cmp(&b.0))
            .collect_vec();
        let mut events = Vec::with_capacity(writers.len() + 1);
        for (_, writer) in writers {
            let result = writer.complete().await?;
            events.push(Event::new(
                &group_id,
                EventPayload::CommitResponse(CommitResponsePayload {
                    commit_id,
                    table: result.table,
                    partition_spec_id: result.partition_spec_id,
                    data_files: result.data_files,
                    delete_files: result.delete_files,
                }),
            ));
        }

        // Snapshot the offsets, then reset all round-scoped state together.
        let offsets = std::mem::take(&mut self.source_offsets);
        self.table_exists.clear();

        // One ready event covering the entire current assignment; partitions
        // without buffered records report the null offset. The coordinator
        // decides round completeness from this coverage.
        let assignments: Vec<TopicPartitionOffset> = self
            .context
            .assignment()
            .iter()
            .map(|tp| {
                TopicPartitionOffset::new(tp, offsets.get(tp).copied().unwrap_or(Offset::NULL))
            })
            .collect();
        events.push(Event::new(
            &group_id,
            EventPayload::CommitReady(CommitReadyPayload {
                commit_id,
                assignments,
            }),
        ));

        let commit_offsets: HashMap<TopicPartition, i64> = offsets
            .iter()
            .filter_map(|(tp, offset)| offset.offset.map(|o| (tp.clone(), o)))
            .collect();
        tracing::info!(
            commit_id = %commit_id,
            responses = events.len() - 1,
            offsets = commit_offsets.len(),
            "answering commit request"
        );
        self.channel.send(events, commit_offsets).await?;

        self.context.request_commit();
        Ok(())
    }

    /// Push the control group's stored offsets, restricted to the current
    /// assignment, into the framework as the authoritative checkpoint. This
    /// is how a restarted task resumes exactly where the last committed
    /// round left off.
    pub async fn sync_commit_offsets(&mut self) -> Result<()> {
        let assignment = self.context.assignment();
        let offsets = self.channel.committed_offsets(&assignment).await?;
        self.context.reset_offsets(&offsets);
        Ok(())
    }

    /// Abort open writers, discarding their staged files, and release the
    /// channel.
    pub async fn stop(&mut self) -> Result<()> {
        for (table, writer) in std::mem::take(&mut self.writers) {
            if let Err(e) = writer.close().await {
                tracing::warn!(table = %table, error = %e, "failed to abort writer");
            }
        }
        self.channel.close().await
    }

    #[cfg(test)]
    pub(crate) fn source_offset(&self, tp: &TopicPartition) -> Option<Offset> {
        self.source_offsets.get(tp).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::channel::memory::{MemoryBus, MemoryChannelTransport};
    use crate::test_utils::{record, test_config, RecordingWriterFactory, TestContext};

    const GROUP: &str = "cg-control-iceberg";

    struct Fixture {
        bus: Arc<MemoryBus>,
        catalog: Arc<MemoryCatalog>,
        factory: Arc<RecordingWriterFactory>,
        context: Arc<TestContext>,
        worker: Worker<MemoryChannelTransport>,
        /// Sends commit requests and observes everything on the bus.
        observer: ControlChannel<MemoryChannelTransport>,
    }

    fn fixture(config_entries: &[(&str, &str)], assignment: Vec<TopicPartition>) -> Fixture {
        let config = test_config(config_entries);
        let bus = MemoryBus::new();
        let catalog = Arc::new(MemoryCatalog::new());
        let factory = RecordingWriterFactory::new();
        let context = TestContext::new(assignment);
        let observer = ControlChannel::new(
            "observer",
            GROUP,
            false,
            MemoryChannelTransport::coordinator(bus.clone()),
        );
        let worker = Worker::new(
            &config,
            ControlChannel::new(
                "worker",
                GROUP,
                false,
                MemoryChannelTransport::worker(bus.clone()),
            ),
            catalog.clone(),
            factory.clone(),
            context.clone(),
            Arc::new(SinkMetrics::unregistered()),
        );
        Fixture {
            bus,
            catalog,
            factory,
            context,
            worker,
            observer,
        }
    }

    async fn send_commit_request(
        observer: &mut ControlChannel<MemoryChannelTransport>,
        commit_id: Uuid,
    ) {
        observer
            .send(
                vec![Event::new(
                    GROUP,
                    EventPayload::CommitRequest(crate::events::CommitRequestPayload {
                        commit_id,
                    }),
                )],
                HashMap::new(),
            )
            .await
            .unwrap();
    }

    async fn drain_events(
        observer: &mut ControlChannel<MemoryChannelTransport>,
    ) -> Vec<Event> {
        observer
            .drain(Duration::from_millis(10))
            .await
            .unwrap()
            .into_iter()
            .map(|envelope| envelope.event)
            .collect()
    }

    #[tokio::test]
    async fn test_save_advances_source_offsets() {
        let mut f = fixture(&[("iceberg.tables", "db.t")], vec![TopicPartition::new("events", 0)]);
        f.worker
            .save(vec![record("events", 0, 100, Some(1000), Some(json!({"id": 1})))])
            .await
            .unwrap();
        assert_eq!(
            f.worker.source_offset(&TopicPartition::new("events", 0)),
            Some(Offset::new(101, Some(1000)))
        );
        assert_eq!(f.factory.created(), 1);
    }

    #[tokio::test]
    async fn test_commit_request_emits_response_and_full_assignment_ready() {
        let assignment = vec![
            TopicPartition::new("events", 0),
            TopicPartition::new("events", 1),
        ];
        let mut f = fixture(&[("iceberg.tables", "db.t")], assignment);
        f.worker
            .save(vec![record("events", 0, 50, Some(1000), Some(json!({"id": 1})))])
            .await
            .unwrap();

        let commit_id = Uuid::new_v4();
        send_commit_request(&mut f.observer, commit_id).await;
        f.worker.process().await.unwrap();

        let events = drain_events(&mut f.observer).await;
        // Request, response, ready.
        assert_eq!(events.len(), 3);
        let EventPayload::CommitResponse(response) = &events[1].payload else {
            panic!("expected commit response, got {:?}", events[1].payload);
        };
        assert_eq!(response.commit_id, commit_id);
        assert_eq!(response.table.to_string(), "db.t");
        assert_eq!(response.data_files.len(), 1);
        assert_eq!(response.data_files[0].record_count, 1);

        let EventPayload::CommitReady(ready) = &events[2].payload else {
            panic!("expected commit ready, got {:?}", events[2].payload);
        };
        assert_eq!(ready.commit_id, commit_id);
        assert_eq!(ready.assignments.len(), 2);
        let p0 = ready
            .assignments
            .iter()
            .find(|a| a.partition == 0)
            .unwrap();
        assert_eq!(p0.offset, Some(51));
        assert_eq!(p0.timestamp_ms, Some(1000));
        let p1 = ready
            .assignments
            .iter()
            .find(|a| a.partition == 1)
            .unwrap();
        assert_eq!(p1.offset, None);
        assert_eq!(p1.timestamp_ms, None);

        // The source offset advanced transactionally with the events.
        assert_eq!(
            f.bus.committed_offset(&TopicPartition::new("events", 0)),
            Some(51)
        );
        assert_eq!(
            f.bus.committed_offset(&TopicPartition::new("events", 1)),
            None
        );
        assert_eq!(f.context.commit_requests(), 1);
    }

    #[tokio::test]
    async fn test_round_state_reset_after_commit_request() {
        let mut f = fixture(
            &[("iceberg.tables", "db.t")],
            vec![TopicPartition::new("events", 0)],
        );
        f.worker
            .save(vec![record("events", 0, 7, None, Some(json!({})))])
            .await
            .unwrap();

        send_commit_request(&mut f.observer, Uuid::new_v4()).await;
        f.worker.process().await.unwrap();
        let _ = drain_events(&mut f.observer).await;

        // A second round with no new records: no responses, all-null ready.
        send_commit_request(&mut f.observer, Uuid::new_v4()).await;
        f.worker.process().await.unwrap();
        let events = drain_events(&mut f.observer).await;
        assert_eq!(events.len(), 2); // request + ready
        let EventPayload::CommitReady(ready) = &events[1].payload else {
            panic!("expected commit ready, got {:?}", events[1].payload);
        };
        assert_eq!(ready.assignments.len(), 1);
        assert_eq!(ready.assignments[0].offset, None);
    }

    #[tokio::test]
    async fn test_dynamic_routing_drops_missing_table() {
        let mut f = fixture(
            &[
                ("iceberg.tables.dynamic-enabled", "true"),
                ("iceberg.tables.route-field", "meta.table"),
            ],
            vec![TopicPartition::new("events", 0)],
        );
        f.catalog
            .create_table(TableIdent::parse("db.orders").unwrap());

        f.worker
            .save(vec![
                record(
                    "events",
                    0,
                    10,
                    None,
                    Some(json!({"meta": {"table": "DB.Orders"}})),
                ),
                record(
                    "events",
                    0,
                    11,
                    None,
                    Some(json!({"meta": {"table": "db.unknown"}})),
                ),
            ])
            .await
            .unwrap();

        // The first record routed to the lowercased table; the second was
        // dropped, but its offset still advanced.
        assert_eq!(f.factory.created(), 1);
        assert_eq!(
            f.worker.source_offset(&TopicPartition::new("events", 0)),
            Some(Offset::new(12, None))
        );
    }

    #[tokio::test]
    async fn test_regex_routing_selects_matching_tables() {
        let mut f = fixture(
            &[
                ("iceberg.tables", "db.orders,db.returns"),
                ("iceberg.tables.route-field", "kind"),
                ("iceberg.tables.db.orders.route-regex", "^order$"),
                ("iceberg.tables.db.returns.route-regex", "^return$"),
            ],
            vec![TopicPartition::new("events", 0)],
        );

        f.worker
            .save(vec![
                record("events", 0, 1, None, Some(json!({"kind": "order"}))),
                record("events", 0, 2, None, Some(json!({"kind": "nomatch"}))),
            ])
            .await
            .unwrap();
        assert_eq!(f.factory.created(), 1);
    }

    #[tokio::test]
    async fn test_sync_commit_offsets_restricted_to_assignment() {
        let mut f = fixture(
            &[("iceberg.tables", "db.t")],
            vec![
                TopicPartition::new("events", 0),
                TopicPartition::new("events", 1),
            ],
        );

        let mut stored = HashMap::new();
        stored.insert(TopicPartition::new("events", 0), 7);
        stored.insert(TopicPartition::new("events", 1), 9);
        stored.insert(TopicPartition::new("other", 0), 3);
        f.observer.send(vec![], stored).await.unwrap();

        f.worker.sync_commit_offsets().await.unwrap();
        let reset = f.context.last_reset();
        assert_eq!(reset.len(), 2);
        assert_eq!(reset.get(&TopicPartition::new("events", 0)), Some(&7));
        assert_eq!(reset.get(&TopicPartition::new("events", 1)), Some(&9));
    }

    #[tokio::test]
    async fn test_stop_aborts_open_writers() {
        let mut f = fixture(
            &[("iceberg.tables", "db.t")],
            vec![TopicPartition::new("events", 0)],
        );
        f.worker
            .save(vec![record("events", 0, 1, None, Some(json!({})))])
            .await
            .unwrap();
        f.worker.stop().await.unwrap();
        assert_eq!(f.factory.aborted(), 1);
        assert_eq!(f.factory.completed(), 0);
    }

    #[tokio::test]
    async fn test_non_request_events_ignored() {
        let mut f = fixture(
            &[("iceberg.tables", "db.t")],
            vec![TopicPartition::new("events", 0)],
        );
        f.observer
            .send(
                vec![Event::new(
                    GROUP,
                    EventPayload::CommitComplete(crate::events::CommitCompletePayload {
                        commit_id: Uuid::new_v4(),
                        vtts_ms: None,
                    }),
                )],
                HashMap::new(),
            )
            .await
            .unwrap();
        f.worker.process().await.unwrap();
        assert_eq!(f.context.commit_requests(), 0);
    }
}
