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

use prometheus::{
    histogram_opts, register_histogram_with_registry,
    register_int_counter_with_registry, Histogram, IntCounter, Registry,
};

/// Connector metrics, registered once per sink task.
#[derive(Debug, Clone)]
pub struct SinkMetrics {
    /// Records routed into a table writer.
    pub records_written: IntCounter,
    /// Dynamically routed records dropped because their table does not
    /// exist. The offset still advances; this counter is the only trace.
    pub records_dropped_table_missing: IntCounter,
    pub commit_rounds_started: IntCounter,
    pub commit_rounds_committed: IntCounter,
    pub commit_rounds_aborted: IntCounter,
    /// Table commits skipped by the snapshot-summary idempotence check.
    pub commit_tables_skipped: IntCounter,
    pub commit_duration_seconds: Histogram,
}

impl SinkMetrics {
    pub fn new(registry: &Registry) -> Self {
        let records_written = register_int_counter_with_registry!(
            "iceberg_sink_records_written",
            "Records routed into a table writer",
            registry
        )
        .unwrap();
        let records_dropped_table_missing = register_int_counter_with_registry!(
            "iceberg_sink_records_dropped_table_missing",
            "Dynamically routed records dropped because the table is missing",
            registry
        )
        .unwrap();
        let commit_rounds_started = register_int_counter_with_registry!(
            "iceberg_sink_commit_rounds_started",
            "Commit rounds initiated by the coordinator",
            registry
        )
        .unwrap();
        let commit_rounds_committed = register_int_counter_with_registry!(
            "iceberg_sink_commit_rounds_committed",
            "Commit rounds completed with a catalog commit",
            registry
        )
        .unwrap();
        let commit_rounds_aborted = register_int_counter_with_registry!(
            "iceberg_sink_commit_rounds_aborted",
            "Commit rounds abandoned on timeout or failure",
            registry
        )
        .unwrap();
        let commit_tables_skipped = register_int_counter_with_registry!(
            "iceberg_sink_commit_tables_skipped",
            "Table commits skipped by the commit-id idempotence check",
            registry
        )
        .unwrap();
        let commit_duration_seconds = register_histogram_with_registry!(
            histogram_opts!(
                "iceberg_sink_commit_duration_seconds",
                "Wall time of a completed commit round"
            ),
            registry
        )
        .unwrap();

        Self {
            records_written,
            records_dropped_table_missing,
            commit_rounds_started,
            commit_rounds_committed,
            commit_rounds_aborted,
            commit_tables_skipped,
            commit_duration_seconds,
        }
    }

    /// Metrics bound to a throwaway registry, for tests and tools that do
    /// not scrape.
    pub fn unregistered() -> Self {
        Self::new(&Registry::new())
    }
}
