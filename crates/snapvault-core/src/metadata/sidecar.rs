use crate::error::Error;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

/// The fields of an export JSON sidecar that carry capture time.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub photo_taken_time: Option<TimeField>,
    #[serde(default)]
    pub creation_time: Option<TimeField>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimeField {
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub formatted: Option<String>,
}

impl SidecarMetadata {
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn read(path: &Path) -> Result<Self, Error> {
        Self::parse(&fs::read(path)?)
    }

    /// Unix seconds of the capture, preferring photo-taken over creation time.
    pub fn capture_time(&self) -> Option<i64> {
        valid(&self.photo_taken_time).or_else(|| valid(&self.creation_time))
    }
}

fn valid(field: &Option<TimeField>) -> Option<i64> {
    field
        .as_ref()
        .and_then(|f| f.timestamp)
        .filter(|ts| *ts != 0)
}

/// Timestamps appear both as `"1700000000"` and `1700000000`; unparsable counts as absent.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}
