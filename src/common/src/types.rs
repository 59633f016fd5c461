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

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A position in one log partition: the offset of the next record to consume
/// and the timestamp of the record that produced it. Both fields are `None`
/// for partitions that have not seen any record, see [`Offset::NULL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub offset: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

impl Offset {
    pub const NULL: Offset = Offset {
        offset: None,
        timestamp_ms: None,
    };

    pub fn new(offset: i64, timestamp_ms: Option<i64>) -> Self {
        Self {
            offset: Some(offset),
            timestamp_ms,
        }
    }

    pub fn is_null(&self) -> bool {
        self.offset.is_none()
    }
}

/// One partition of one source topic. The derived `Ord` (topic, then
/// partition) is the total order used wherever partitions are enumerated.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A partition position as reported inside a commit-ready event. Partitions
/// without buffered records carry a null offset and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
    pub topic: String,
    pub partition: i32,
    pub offset: Option<i64>,
    pub timestamp_ms: Option<i64>,
}

impl TopicPartitionOffset {
    pub fn new(tp: &TopicPartition, offset: Offset) -> Self {
        Self {
            topic: tp.topic.clone(),
            partition: tp.partition,
            offset: offset.offset,
            timestamp_ms: offset.timestamp_ms,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn offset(&self) -> Offset {
        Offset {
            offset: self.offset,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid table identifier: {0:?}")]
pub struct InvalidTableIdent(String);

/// A dotted destination table identifier, e.g. `db.events`. Matching is
/// case-insensitive; the canonical form keeps the user's spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableIdent {
    parts: Vec<String>,
}

impl TableIdent {
    pub fn parse(s: &str) -> Result<Self, InvalidTableIdent> {
        let parts: Vec<String> = s
            .split('.')
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return Err(InvalidTableIdent(s.to_owned()));
        }
        Ok(Self { parts })
    }

    /// The identifier with every part lowercased, used for dynamic routing
    /// where the route value is matched case-insensitively.
    pub fn to_lowercase(&self) -> TableIdent {
        TableIdent {
            parts: self.parts.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        self.parts.last().expect("non-empty by construction")
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl TryFrom<String> for TableIdent {
    type Error = InvalidTableIdent;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TableIdent::parse(&s)
    }
}

impl From<TableIdent> for String {
    fn from(ident: TableIdent) -> Self {
        ident.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_null_sentinel() {
        assert!(Offset::NULL.is_null());
        assert!(!Offset::new(42, Some(1000)).is_null());
    }

    #[test]
    fn test_topic_partition_order() {
        let mut tps = vec![
            TopicPartition::new("b", 0),
            TopicPartition::new("a", 1),
            TopicPartition::new("a", 0),
        ];
        tps.sort();
        assert_eq!(
            tps,
            vec![
                TopicPartition::new("a", 0),
                TopicPartition::new("a", 1),
                TopicPartition::new("b", 0),
            ]
        );
    }

    #[test]
    fn test_table_ident_parse() {
        let ident = TableIdent::parse("db.Orders").unwrap();
        assert_eq!(ident.to_string(), "db.Orders");
        assert_eq!(ident.name(), "Orders");
        assert_eq!(ident.to_lowercase().to_string(), "db.orders");

        assert!(TableIdent::parse("").is_err());
        assert!(TableIdent::parse("...").is_err());
    }

    #[test]
    fn test_table_ident_serde_as_string() {
        let ident = TableIdent::parse("db.t").unwrap();
        let json = serde_json::to_string(&ident).unwrap();
        assert_eq!(json, "\"db.t\"");
        let back: TableIdent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ident);
    }
}
