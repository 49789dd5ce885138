use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

pub const GENERATION_SUCCEEDED: &str = "generation_succeeded";
pub const GENERATION_FAILED: &str = "generation_failed";
pub const ARTIFACT_DELETED: &str = "artifact_deleted";
pub const CREDITS_CHANGED: &str = "credits_changed";

/// Append-only audit log, one compact JSON object per line.
///
/// Each line is an envelope of `type`, `service` and `ts` with the fields of
/// the record flattened next to them. Records must serialize as maps.
#[derive(Debug, Clone)]
pub struct EventWriter {
    sink: Arc<EventSink>,
}

#[derive(Debug)]
struct EventSink {
    path: PathBuf,
    service: String,
    lock: Mutex<()>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    event_type: &'a str,
    service: &'a str,
    ts: String,
    #[serde(flatten)]
    record: &'a T,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            sink: Arc::new(EventSink {
                path: path.into(),
                service: service.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn emit<T: Serialize>(&self, event_type: &str, record: &T) -> anyhow::Result<()> {
        let line = serde_json::to_string(&Envelope {
            event_type,
            service: &self.sink.service,
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            record,
        })
        .with_context(|| format!("failed to encode {event_type} event"))?;

        if let Some(parent) = self.sink.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .sink
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.sink.path)
            .with_context(|| format!("failed to open {}", self.sink.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde::Serialize;
    use serde_json::Value;

    use super::{EventWriter, ARTIFACT_DELETED, CREDITS_CHANGED, GENERATION_SUCCEEDED};

    #[derive(Serialize)]
    struct Deleted<'a> {
        owner_id: &'a str,
        artifact_id: &'a str,
    }

    fn read_rows(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn record_fields_sit_beside_the_envelope() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "imagify");

        writer.emit(
            ARTIFACT_DELETED,
            &Deleted {
                owner_id: "user-1",
                artifact_id: "a-1",
            },
        )?;

        let rows = read_rows(&path)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["type"], Value::String(ARTIFACT_DELETED.to_string()));
        assert_eq!(rows[0]["service"], Value::String("imagify".to_string()));
        assert_eq!(rows[0]["owner_id"], Value::String("user-1".to_string()));
        assert_eq!(rows[0]["artifact_id"], Value::String("a-1".to_string()));
        DateTime::parse_from_rfc3339(rows[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn appends_one_line_per_event_and_creates_parent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "imagify");
        let clone = writer.clone();

        writer.emit(GENERATION_SUCCEEDED, &serde_json::json!({ "provider": "Collage" }))?;
        clone.emit(CREDITS_CHANGED, &serde_json::json!({ "balance": 99 }))?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 2);
        let rows = read_rows(&path)?;
        assert_eq!(rows[0]["provider"], Value::String("Collage".to_string()));
        assert_eq!(rows[1]["type"], Value::String(CREDITS_CHANGED.to_string()));
        assert_eq!(rows[1]["balance"], Value::from(99));
        Ok(())
    }

    #[test]
    fn scalar_records_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "imagify");
        assert!(writer.emit(CREDITS_CHANGED, &42).is_err());
        assert!(!path.exists());
        Ok(())
    }
}
