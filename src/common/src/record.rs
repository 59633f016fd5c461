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

use bytes::Bytes;
use serde_json::Value;

use crate::types::{Offset, TopicPartition};

/// One record handed over by the sink framework. The value has already been
/// deserialized by the framework's converter; structured rows and plain maps
/// both arrive as JSON objects.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Value>,
}

impl SinkRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// The source position this record advances its partition to. Sink
    /// offsets denote the next record to consume, hence `offset + 1`.
    pub fn next_offset(&self) -> Offset {
        Offset::new(self.offset + 1, self.timestamp_ms)
    }
}

/// Dotted-path lookup into a record value, e.g. `meta.table` resolves the
/// `table` field of the `meta` object. Returns `None` when any path segment
/// is missing or the intermediate value is not an object.
pub fn extract_from_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve a route value to its string form. Scalars stringify the way they
/// print; nulls and nested values do not route.
pub fn extract_route_value(value: &Value, path: &str) -> Option<String> {
    match extract_from_value(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_next_offset_is_plus_one() {
        let record = SinkRecord {
            topic: "events".to_owned(),
            partition: 3,
            offset: 100,
            timestamp_ms: Some(1_684_408_953_000),
            key: None,
            value: None,
        };
        assert_eq!(
            record.next_offset(),
            Offset::new(101, Some(1_684_408_953_000))
        );
    }

    #[test]
    fn test_extract_nested_field() {
        let value = json!({"meta": {"table": "DB.Orders", "version": 2}, "id": 7});
        assert_eq!(
            extract_from_value(&value, "meta.table"),
            Some(&json!("DB.Orders"))
        );
        assert_eq!(extract_from_value(&value, "id"), Some(&json!(7)));
        assert_eq!(extract_from_value(&value, "meta.missing"), None);
        assert_eq!(extract_from_value(&value, "id.nested"), None);
    }

    #[test]
    fn test_route_value_stringifies_scalars() {
        let value = json!({"route": 42, "flag": true, "nested": {}, "none": null});
        assert_eq!(extract_route_value(&value, "route"), Some("42".to_owned()));
        assert_eq!(extract_route_value(&value, "flag"), Some("true".to_owned()));
        assert_eq!(extract_route_value(&value, "nested"), None);
        assert_eq!(extract_route_value(&value, "none"), None);
    }
}
