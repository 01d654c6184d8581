use crate::measure::Measurement;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::{self, Write};

/// The line format handed to persistence and upload collaborators.
///
/// Values are decimal strings with one fractional digit so downstream stores
/// never re-round them; `ts` is ISO-8601 UTC at seconds precision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Record {
    pub ts: String,
    pub temperature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<String>,
}

impl From<&Measurement> for Record {
    fn from(measurement: &Measurement) -> Record {
        Record {
            ts: measurement.at.to_rfc3339_opts(SecondsFormat::Secs, false),
            temperature: measurement.temperature.to_string(),
            humidity: measurement.humidity.map(|h| h.to_string()),
        }
    }
}

impl Record {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Writes the record as one JSON line.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> io::Result<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.write_all(b"\n")
    }
}
