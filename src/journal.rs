//! Daily JSON-lines journal of published fares.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use refresh_engine::CacheSnapshot;
use serde_json::json;
use tracing::warn;

pub struct FareJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl FareJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("fares-{}.jsonl", day_key)))
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    fn write_lines(&mut self, events: &[serde_json::Value]) -> std::io::Result<()> {
        self.rotate_if_needed()?;
        for event in events {
            let line = serde_json::to_string(event)?;
            writeln!(self.file, "{}", line)?;
        }
        self.file.flush()
    }

    /// Write a single event. Failures are logged, never returned.
    pub fn write_event(&mut self, event: serde_json::Value) {
        if let Err(e) = self.write_lines(std::slice::from_ref(&event)) {
            warn!("Fare journal write failed: {}", e);
        }
    }

    /// One row per retained entry of `snapshot`.
    pub fn record_snapshot(&mut self, snapshot: &CacheSnapshot, currency: &str) {
        let refreshed_at = snapshot
            .refreshed_at
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let rows: Vec<serde_json::Value> = snapshot
            .groups
            .iter()
            .flat_map(|(key, entries)| entries.iter().map(move |entry| (key, entry)))
            .map(|(key, entry)| {
                let details = &entry.quote.details;
                json!({
                    "kind": "fare",
                    "cycle_id": snapshot.cycle_id,
                    "refreshed_at": refreshed_at,
                    "group": key,
                    "origin": entry.query.route.origin.iata,
                    "destination": entry.query.route.destination.iata,
                    "outbound_month": entry.query.months.outbound(),
                    "inbound_month": entry.query.months.inbound(),
                    "date_out": details.outbound_date,
                    "date_back": details.inbound_date,
                    "stay_days": details.stay_days(),
                    "direct": details.direct,
                    "price": entry.price(),
                    "currency": currency,
                })
            })
            .collect();

        if let Err(e) = self.write_lines(&rows) {
            warn!(
                "Fare journal write failed for cycle {}: {}",
                snapshot.cycle_id, e
            );
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(format!("fares-{}.jsonl", self.day_key))
    }
}
