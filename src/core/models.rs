use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// A single entry in a job's status log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
    #[serde(flatten)]
    pub payload: LogPayload,
    /// Seconds since the owning buffer was created.
    pub timestamp: f64,
}

/// What a log entry carries besides its message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogPayload {
    Message {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    MemorySample {
        filter: String,
        kilobytes: u64,
    },
    DiskSample {
        filesystems: Vec<DiskUsageRecord>,
    },
}

impl LogPayload {
    pub fn message(data: Option<Value>) -> Self {
        Self::Message { data }
    }
}

/// One row of a `df`-style report, keyed by column header.
///
/// Columns keep the header's order and serialize as a JSON object in that
/// order. Columns the row did not have are absent rather than empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskUsageRecord(pub Vec<(String, String)>);

impl DiskUsageRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(header, _)| header == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(header, _)| header.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for DiskUsageRecord {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for DiskUsageRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (header, value) in &self.0 {
            map.serialize_entry(header, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DiskUsageRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = DiskUsageRecord;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of column headers to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut columns = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, String>()? {
                    columns.push(entry);
                }
                Ok(DiskUsageRecord(columns))
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Where a reporter publishes its log document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTarget {
    pub bucket: String,
    pub key: String,
}

impl StatusTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn for_job(bucket: impl Into<String>, request_id: &str) -> Self {
        Self::new(bucket, format!("status/{}.json", request_id))
    }
}

/// Job description read from the payload file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub request_id: String,
    #[serde(default)]
    pub inputs: Vec<InputFile>,
    /// Anything else the pipeline wants; passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A remote file to fetch into the job's input directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFile {
    pub url: String,
    pub path: String,
}

/// Response document stored at `instance-response/<requestId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub status_code: u16,
    /// JSON-encoded string, not a nested object.
    pub body: String,
}

impl JobResponse {
    pub fn success(pkg_name: &str) -> Self {
        Self {
            status_code: 200,
            body: serde_json::json!({ "pkgName": pkg_name }).to_string(),
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            status_code: 500,
            body: serde_json::json!({
                "errorType": "error",
                "errorMessage": message,
            })
            .to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn key_for(request_id: &str) -> String {
        format!("instance-response/{}.json", request_id)
    }
}
