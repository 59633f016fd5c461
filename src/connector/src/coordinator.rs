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

//! The singleton coordinator: drives commit rounds on a timer, aggregates
//! worker responses by partition coverage, and performs the multi-table
//! catalog commit.
//!
//! The coordinator does not know the cohort's size. A round is complete when
//! the union of all commit-ready assignments covers every partition of every
//! source topic, which tolerates workers joining and leaving without a
//! membership protocol. The control-topic cursor advances only at round
//! boundaries, so a coordinator that crashes mid-round replays the round on
//! restart and the commit-id snapshot property keeps the replay from
//! double-applying files.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use iceberg_connect_common::types::{TableIdent, TopicPartition};
use uuid::Uuid;

use crate::catalog::{
    Catalog, CommitOperation, DataFile, DeleteFile, TableCommit, COMMIT_ID_SNAPSHOT_PROP,
    VTTS_SNAPSHOT_PROP,
};
use crate::channel::{ChannelTransport, ControlChannel, Envelope};
use crate::config::SinkConfig;
use crate::events::{
    CommitCompletePayload, CommitReadyPayload, CommitRequestPayload, CommitResponsePayload,
    CommitTablePayload, Event, EventPayload,
};
use crate::metrics::SinkMetrics;
use crate::Result;

const POLL_DURATION: Duration = Duration::from_millis(100);

/// The in-flight round. Exists only between the commit request and the
/// round's completion or abort.
struct CommitState {
    commit_id: Uuid,
    started_at: Instant,
    expected: BTreeSet<TopicPartition>,
    responses: Vec<CommitResponsePayload>,
    readies: Vec<CommitReadyPayload>,
}

impl CommitState {
    fn new(commit_id: Uuid, expected: BTreeSet<TopicPartition>) -> Self {
        Self {
            commit_id,
            started_at: Instant::now(),
            expected,
            responses: vec![],
            readies: vec![],
        }
    }

    fn covered(&self) -> BTreeSet<TopicPartition> {
        self.readies
            .iter()
            .flat_map(|ready| ready.assignments.iter().map(|a| a.topic_partition()))
            .collect()
    }

    fn is_complete(&self) -> bool {
        let covered = self.covered();
        self.expected.iter().all(|tp| covered.contains(tp))
    }

    /// The round's valid-through timestamp: the minimum assignment
    /// timestamp, unknown when any partition reported none.
    fn vtts(&self) -> Option<i64> {
        let mut min: Option<i64> = None;
        for assignment in self.readies.iter().flat_map(|r| r.assignments.iter()) {
            match assignment.timestamp_ms {
                None => return None,
                Some(ts) => min = Some(min.map_or(ts, |m| m.min(ts))),
            }
        }
        min
    }
}

pub struct Coordinator<T: ChannelTransport> {
    channel: ControlChannel<T>,
    catalog: Arc<dyn Catalog>,
    source_topics: Vec<String>,
    commit_interval: Duration,
    commit_timeout: Duration,
    metrics: Arc<SinkMetrics>,
    state: Option<CommitState>,
    last_commit: Instant,
}

impl<T: ChannelTransport> Coordinator<T> {
    pub fn new(
        config: &SinkConfig,
        channel: ControlChannel<T>,
        catalog: Arc<dyn Catalog>,
        source_topics: Vec<String>,
        metrics: Arc<SinkMetrics>,
    ) -> Self {
        Self {
            channel,
            catalog,
            source_topics,
            commit_interval: config.commit_interval(),
            commit_timeout: config.commit_timeout(),
            metrics,
            state: None,
            last_commit: Instant::now(),
        }
    }

    /// One poll cycle: drain the control topic, then either evaluate the
    /// open round or start a new one when the interval elapsed.
    pub async fn process(&mut self) -> Result<()> {
        let envelopes = self.channel.drain(POLL_DURATION).await?;
        for envelope in envelopes {
            self.receive(envelope).await?;
        }
        if self.state.is_some() {
            self.evaluate_round().await?;
        } else if self.last_commit.elapsed() >= self.commit_interval {
            self.begin_round().await?;
        }
        Ok(())
    }

    async fn receive(&mut self, envelope: Envelope) -> Result<()> {
        match envelope.event.payload {
            EventPayload::CommitRequest(request) => match &self.state {
                Some(state) if state.commit_id == request.commit_id => {}
                Some(state) => {
                    tracing::warn!(
                        current = %state.commit_id,
                        replayed = %request.commit_id,
                        "ignoring commit request while a round is open"
                    );
                }
                None => {
                    // A replayed request from an unfinished round: rebuild
                    // the state so the pending responses behind it aggregate
                    // again. This is the restart-recovery path.
                    let expected = self.expected_partitions().await?;
                    tracing::info!(
                        commit_id = %request.commit_id,
                        "adopting replayed commit round"
                    );
                    self.state = Some(CommitState::new(request.commit_id, expected));
                }
            },
            EventPayload::CommitResponse(response) => match &mut self.state {
                Some(state) if state.commit_id == response.commit_id => {
                    state.responses.push(response);
                }
                _ => {
                    tracing::debug!(
                        commit_id = %response.commit_id,
                        "dropping straggler commit response"
                    );
                }
            },
            EventPayload::CommitReady(ready) => match &mut self.state {
                Some(state) if state.commit_id == ready.commit_id => {
                    state.readies.push(ready);
                }
                _ => {
                    tracing::debug!(
                        commit_id = %ready.commit_id,
                        "dropping straggler commit ready"
                    );
                }
            },
            _ => {}
        }
        Ok(())
    }

    async fn begin_round(&mut self) -> Result<()> {
        let commit_id = Uuid::new_v4();
        let expected = self.expected_partitions().await?;
        tracing::info!(
            commit_id = %commit_id,
            partitions = expected.len(),
            "starting commit round"
        );
        self.state = Some(CommitState::new(commit_id, expected));
        let group_id = self.channel.group_id().to_owned();
        self.channel
            .send(
                vec![Event::new(
                    &group_id,
                    EventPayload::CommitRequest(CommitRequestPayload { commit_id }),
                )],
                HashMap::new(),
            )
            .await?;
        self.metrics.commit_rounds_started.inc();
        Ok(())
    }

    async fn expected_partitions(&self) -> Result<BTreeSet<TopicPartition>> {
        let mut expected = BTreeSet::new();
        for topic in &self.source_topics {
            for partition in self.channel.partitions_for(topic).await? {
                expected.insert(TopicPartition::new(topic.clone(), partition));
            }
        }
        Ok(expected)
    }

    async fn evaluate_round(&mut self) -> Result<()> {
        let complete = self.state.as_ref().is_some_and(|s| s.is_complete());
        if complete {
            let state = self.state.take().expect("checked above");
            self.complete_round(state).await?;
        } else if let Some(state) = &self.state {
            if state.started_at.elapsed() >= self.commit_timeout {
                tracing::warn!(
                    commit_id = %state.commit_id,
                    covered = state.covered().len(),
                    expected = state.expected.len(),
                    "commit round timed out, aborting"
                );
                self.state = None;
                self.metrics.commit_rounds_aborted.inc();
                // Move the cursor past the dead round's events so they do
                // not replay forever; the staged files are orphaned and left
                // to table maintenance.
                self.channel.ack().await?;
            }
        }
        Ok(())
    }

    async fn complete_round(&mut self, state: CommitState) -> Result<()> {
        let vtts = state.vtts();
        let commit_id = state.commit_id;
        let group_id = self.channel.group_id().to_owned();

        // Snapshots commit in lexicographic table order; no cross-table
        // atomicity is promised.
        let mut by_table: BTreeMap<TableIdent, (Vec<DataFile>, Vec<DeleteFile>)> =
            BTreeMap::new();
        for response in state.responses {
            let entry = by_table.entry(response.table.clone()).or_default();
            entry.0.extend(response.data_files);
            entry.1.extend(response.delete_files);
        }

        for (table, (data_files, delete_files)) in by_table {
            if data_files.is_empty() && delete_files.is_empty() {
                continue;
            }
            let snapshot_id = match self
                .commit_table(&table, commit_id, vtts, data_files, delete_files)
                .await
            {
                Ok(snapshot_id) => snapshot_id,
                Err(e) => {
                    // The round is failed wholesale; the unacked control
                    // cursor makes the next drain replay and retry it, and
                    // already-committed tables are skipped by the commit-id
                    // check.
                    tracing::error!(
                        commit_id = %commit_id,
                        table = %table,
                        error = %e,
                        "catalog commit failed, abandoning round"
                    );
                    self.metrics.commit_rounds_aborted.inc();
                    return Ok(());
                }
            };
            self.channel
                .send(
                    vec![Event::new(
                        &group_id,
                        EventPayload::CommitTable(CommitTablePayload {
                            commit_id,
                            table: table.clone(),
                            snapshot_id,
                            vtts_ms: vtts,
                        }),
                    )],
                    HashMap::new(),
                )
                .await?;
        }

        self.channel
            .send(
                vec![Event::new(
                    &group_id,
                    EventPayload::CommitComplete(CommitCompletePayload {
                        commit_id,
                        vtts_ms: vtts,
                    }),
                )],
                HashMap::new(),
            )
            .await?;

        self.last_commit = Instant::now();
        self.metrics.commit_rounds_committed.inc();
        self.metrics
            .commit_duration_seconds
            .observe(state.started_at.elapsed().as_secs_f64());
        tracing::info!(commit_id = %commit_id, vtts = ?vtts, "commit round complete");

        // The cursor advances only here and on abort. A crash anywhere
        // earlier replays the whole round.
        self.channel.ack().await?;
        Ok(())
    }

    async fn commit_table(
        &self,
        table: &TableIdent,
        commit_id: Uuid,
        vtts: Option<i64>,
        data_files: Vec<DataFile>,
        delete_files: Vec<DeleteFile>,
    ) -> Result<i64> {
        // A snapshot carrying this round's commit id means a previous
        // coordinator incarnation already landed these files.
        if let Some(snapshot_id) = self.committed_snapshot(table, commit_id).await? {
            tracing::info!(
                commit_id = %commit_id,
                table = %table,
                snapshot_id,
                "snapshot already committed, skipping catalog append"
            );
            self.metrics.commit_tables_skipped.inc();
            return Ok(snapshot_id);
        }

        let operation = if delete_files.is_empty() {
            CommitOperation::Append
        } else {
            CommitOperation::RowDelta
        };
        let mut properties = BTreeMap::new();
        properties.insert(COMMIT_ID_SNAPSHOT_PROP.to_owned(), commit_id.to_string());
        if let Some(vtts) = vtts {
            properties.insert(VTTS_SNAPSHOT_PROP.to_owned(), vtts.to_string());
        }
        let files = data_files.len() + delete_files.len();
        let snapshot_id = self
            .catalog
            .commit(
                table,
                TableCommit {
                    operation,
                    data_files,
                    delete_files,
                    properties,
                },
            )
            .await?;
        tracing::info!(
            commit_id = %commit_id,
            table = %table,
            snapshot_id,
            files,
            "committed table snapshot"
        );
        Ok(snapshot_id)
    }

    async fn committed_snapshot(
        &self,
        table: &TableIdent,
        commit_id: Uuid,
    ) -> Result<Option<i64>> {
        let snapshots = self.catalog.recent_snapshots(table).await?;
        let commit_id = commit_id.to_string();
        Ok(snapshots
            .iter()
            .find(|s| s.properties.get(COMMIT_ID_SNAPSHOT_PROP) == Some(&commit_id))
            .map(|s| s.snapshot_id))
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.channel.close().await
    }
}
