use crate::events::{Event, EventLog};
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Host event log using JSONL (JSON Lines) files with gzip compression
pub struct JsonlEventLog {
    base_path: PathBuf,
    // In-memory buffer of events not yet written to disk
    buffer: RwLock<Vec<Event>>,
    flush_threshold: usize,
}

impl JsonlEventLog {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&base_path).context("Failed to create event log directory")?;
        Ok(Self {
            base_path,
            buffer: RwLock::new(Vec::new()),
            flush_threshold: 100,
        })
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Format: events/YYYY/MM/DD/host.jsonl.gz
    fn event_log_path(&self, date: NaiveDate) -> PathBuf {
        self.base_path
            .join("events")
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()))
            .join("host.jsonl.gz")
    }

    /// Flush buffered events to disk
    pub async fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.is_empty() {
            return Ok(());
        }

        let mut events_by_date: BTreeMap<NaiveDate, Vec<Event>> = BTreeMap::new();
        for event in buffer.drain(..) {
            events_by_date
                .entry(event.timestamp.date_naive())
                .or_default()
                .push(event);
        }

        for (date, events) in events_by_date {
            let path = self.event_log_path(date);

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create event log directory")?;
            }

            let mut all_events = if path.exists() {
                read_jsonl_gz(&path)?
            } else {
                Vec::new()
            };
            all_events.extend(events);

            write_jsonl_gz(&path, &all_events).await?;
        }

        Ok(())
    }

    fn log_files(&self) -> Result<Vec<PathBuf>> {
        let events_dir = self.base_path.join("events");
        if !events_dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        // Walk year/month/day directories
        for year in subdirs(&events_dir)? {
            for month in subdirs(&year)? {
                for day in subdirs(&month)? {
                    let log_file = day.join("host.jsonl.gz");
                    if log_file.exists() {
                        files.push(log_file);
                    }
                }
            }
        }
        Ok(files)
    }
}

fn subdirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path)
        .with_context(|| format!("Failed to read directory {}", path.display()))?
    {
        let entry = entry.context("Failed to read directory entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn read_jsonl_gz(path: &Path) -> Result<Vec<Event>> {
    use flate2::read::GzDecoder;
    use std::io::BufRead;

    let file = std::fs::File::open(path).context("Failed to open event log")?;
    let reader = std::io::BufReader::new(GzDecoder::new(file));

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read line from event log")?;
        let event: Event = serde_json::from_str(&line).context("Failed to parse event")?;
        events.push(event);
    }
    Ok(events)
}

async fn write_jsonl_gz(path: &Path, events: &[Event]) -> Result<()> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());

    for event in events {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        encoder
            .write_all(json.as_bytes())
            .context("Failed to write event")?;
        encoder.write_all(b"\n").context("Failed to write newline")?;
    }

    let compressed = encoder.finish().context("Failed to finish compression")?;
    tokio::fs::write(path, compressed)
        .await
        .context("Failed to write event log file")?;

    Ok(())
}

#[async_trait::async_trait]
impl EventLog for JsonlEventLog {
    async fn append(&self, event: Event) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        buffer.push(event);

        if buffer.len() >= self.flush_threshold {
            drop(buffer);
            self.flush().await?;
        }

        Ok(())
    }

    async fn events(&self) -> Result<Vec<Event>> {
        // Flush any buffered events first
        self.flush().await?;

        let mut all_events = Vec::new();
        for file in self.log_files()? {
            all_events.extend(read_jsonl_gz(&file)?);
        }
        all_events.sort_by_key(|e| e.timestamp);

        Ok(all_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::types::ClientId;
    use tempfile::TempDir;

    fn client_event(id: &str) -> Event {
        Event::new(EventType::ClientUnregistered {
            client_id: ClientId::new(id),
        })
    }

    #[tokio::test]
    async fn test_jsonl_event_log() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();

        let event = client_event("c1");
        log.append(event.clone()).await.unwrap();
        log.flush().await.unwrap();

        let events = log.events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
    }

    #[tokio::test]
    async fn test_flush_appends_to_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let log = JsonlEventLog::new(temp_dir.path().to_path_buf())
            .unwrap()
            .with_flush_threshold(1);

        log.append(client_event("c1")).await.unwrap();
        log.append(client_event("c2")).await.unwrap();

        // A second log over the same directory sees both events
        let reopened = JsonlEventLog::new(temp_dir.path().to_path_buf()).unwrap();
        let events = reopened.events().await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
