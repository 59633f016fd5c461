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

use std::collections::HashMap;
use std::time::Duration;

use anyhow::anyhow;
use iceberg_connect_common::types::TableIdent;
use regex::Regex;
use serde::Deserialize;
use serde_with::formats::CommaSeparator;
use serde_with::{serde_as, DisplayFromStr, StringWithSeparator};

use crate::{ConnectError, Result};

const CATALOG_PROP_PREFIX: &str = "iceberg.catalog.";
const KAFKA_PROP_PREFIX: &str = "iceberg.kafka.";

fn default_control_topic() -> String {
    "control-iceberg".to_owned()
}

fn default_control_group_id() -> String {
    "cg-control-iceberg".to_owned()
}

fn default_commit_interval_ms() -> u64 {
    300_000
}

fn default_commit_timeout_ms() -> u64 {
    600_000
}

/// The flat string properties as handed over by the sink framework.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
struct RawSinkConfig {
    /// Comma-separated destination table identifiers for static routing.
    #[serde(rename = "iceberg.tables", default)]
    #[serde_as(as = "StringWithSeparator::<CommaSeparator, String>")]
    tables: Vec<String>,

    /// If true, the route value is itself the (lowercased) table name.
    #[serde(rename = "iceberg.tables.dynamic-enabled", default)]
    #[serde_as(as = "DisplayFromStr")]
    dynamic_enabled: bool,

    /// Dotted path into the record value; required for regex and dynamic
    /// routing.
    #[serde(rename = "iceberg.tables.route-field", default)]
    route_field: Option<String>,

    #[serde(rename = "iceberg.control.topic", default = "default_control_topic")]
    control_topic: String,

    #[serde(
        rename = "iceberg.control.group-id",
        default = "default_control_group_id"
    )]
    control_group_id: String,

    #[serde(
        rename = "iceberg.control.commit.interval-ms",
        default = "default_commit_interval_ms"
    )]
    #[serde_as(as = "DisplayFromStr")]
    commit_interval_ms: u64,

    #[serde(
        rename = "iceberg.control.commit.timeout-ms",
        default = "default_commit_timeout_ms"
    )]
    #[serde_as(as = "DisplayFromStr")]
    commit_timeout_ms: u64,

    #[serde(rename = "iceberg.hadoop-conf-dir", default)]
    hadoop_conf_dir: Option<String>,

    /// Everything else: per-table routing regexes plus `iceberg.catalog.*`
    /// and `iceberg.kafka.*` passthrough.
    #[serde(flatten)]
    other: HashMap<String, String>,
}

/// How records map to destination tables.
#[derive(Debug, Clone)]
pub enum Routing {
    /// No route field configured: every record goes to every table.
    All { tables: Vec<TableIdent> },
    /// The extracted route value is matched against each table's regex.
    Regex {
        route_field: String,
        routes: Vec<(TableIdent, Regex)>,
    },
    /// The extracted route value is the table name.
    Dynamic { route_field: String },
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    raw: RawSinkConfig,
    tables: Vec<TableIdent>,
    routing: Routing,
}

impl SinkConfig {
    pub fn from_properties(properties: HashMap<String, String>) -> Result<Self> {
        let raw: RawSinkConfig =
            serde_json::from_value(serde_json::to_value(properties).unwrap())
                .map_err(|e| ConnectError::Config(anyhow!(e)))?;

        let tables = raw
            .tables
            .iter()
            .map(|t| TableIdent::parse(t))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ConnectError::Config(anyhow!(e)))?;

        let routing = if raw.dynamic_enabled {
            let route_field = raw.route_field.clone().ok_or_else(|| {
                ConnectError::Config(anyhow!(
                    "iceberg.tables.route-field is required when \
                     iceberg.tables.dynamic-enabled is set"
                ))
            })?;
            Routing::Dynamic { route_field }
        } else if let Some(route_field) = raw.route_field.clone() {
            let mut routes = Vec::with_capacity(tables.len());
            for table in &tables {
                let key = format!("iceberg.tables.{}.route-regex", table);
                if let Some(pattern) = raw.other.get(&key) {
                    let regex = Regex::new(pattern).map_err(|e| {
                        ConnectError::Config(anyhow!("invalid {}: {}", key, e))
                    })?;
                    routes.push((table.clone(), regex));
                }
            }
            if routes.is_empty() {
                return Err(ConnectError::Config(anyhow!(
                    "iceberg.tables.route-field is set but no table defines \
                     a route-regex"
                )));
            }
            Routing::Regex {
                route_field,
                routes,
            }
        } else {
            if tables.is_empty() {
                return Err(ConnectError::Config(anyhow!(
                    "iceberg.tables must name at least one table unless \
                     dynamic routing is enabled"
                )));
            }
            Routing::All {
                tables: tables.clone(),
            }
        };

        Ok(Self {
            raw,
            tables,
            routing,
        })
    }

    pub fn tables(&self) -> &[TableIdent] {
        &self.tables
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn control_topic(&self) -> &str {
        &self.raw.control_topic
    }

    pub fn control_group_id(&self) -> &str {
        &self.raw.control_group_id
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.raw.commit_interval_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.commit_timeout_ms)
    }

    pub fn hadoop_conf_dir(&self) -> Option<&str> {
        self.raw.hadoop_conf_dir.as_deref()
    }

    /// `iceberg.catalog.*` properties with the prefix stripped, handed to
    /// the catalog factory.
    pub fn catalog_props(&self) -> HashMap<String, String> {
        self.strip_prefix(CATALOG_PROP_PREFIX)
    }

    /// `iceberg.kafka.*` client properties for the control cluster.
    pub fn kafka_props(&self) -> HashMap<String, String> {
        self.strip_prefix(KAFKA_PROP_PREFIX)
    }

    fn strip_prefix(&self, prefix: &str) -> HashMap<String, String> {
        self.raw
            .other
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix).map(|k| (k.to_owned(), v.clone()))
            })
            .collect()
    }
}
