//! On-disk calendar documents, one JSON file per (persona, month).
//!
//! Every read and write of a document goes through [`CalendarStore`], which
//! holds the document's advisory lock for the duration of the I/O. Writes go
//! to a temporary sibling first and are renamed into place.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;

use super::types::{date_key, parse_date, CalendarMonth, DailyPlan, MonthKey};
use crate::config::CalendarConfig;
use crate::error::{Error, Result};
use crate::lock;

/// Lock bounds for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub load_timeout: Duration,
    /// Longer than loads: a save usually follows an expensive generation call
    pub save_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(5),
            save_timeout: Duration::from_secs(10),
            poll_interval: lock::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl From<&CalendarConfig> for StoreOptions {
    fn from(config: &CalendarConfig) -> Self {
        Self {
            load_timeout: Duration::from_millis(config.load_timeout_ms),
            save_timeout: Duration::from_millis(config.save_timeout_ms),
            poll_interval: Duration::from_millis(config.lock_poll_ms.max(1)),
        }
    }
}

/// Calendar documents stored under a single directory.
#[derive(Debug, Clone)]
pub struct CalendarStore {
    dir: PathBuf,
    options: StoreOptions,
}

impl CalendarStore {
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
        }
    }

    pub fn from_config(config: &CalendarConfig) -> Self {
        Self::new(config.resolved_dir(), StoreOptions::from(config))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// `{dir}/{persona}_{YYYY-MM}.json`. Path separators in the name become `_`.
    pub fn path_for(&self, persona_name: &str, month: MonthKey) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", file_stem_for(persona_name), month))
    }

    /// Whether a document exists. Takes no lock; a stale answer only costs a
    /// redundant generation.
    pub fn exists(&self, persona_name: &str, month: MonthKey) -> bool {
        self.path_for(persona_name, month).is_file()
    }

    /// Read a month document under its lock.
    ///
    /// `Ok(None)` when absent. A busy lock is [`Error::LockTimeout`], never "absent".
    pub fn load(&self, persona_name: &str, month: MonthKey) -> Result<Option<CalendarMonth>> {
        let path = self.path_for(persona_name, month);
        if !path.exists() {
            return Ok(None);
        }

        let _guard = lock::acquire(&path, self.options.load_timeout, self.options.poll_interval)?;
        let document = read_document(&path)?;
        if let Some(document) = &document {
            tracing::debug!(
                persona = persona_name,
                month = %month,
                days = document.calendar.len(),
                "Loaded calendar"
            );
        }
        Ok(document)
    }

    /// Replace a month document. Returns `false` on any failure, after logging it.
    pub fn save(&self, persona_name: &str, month: MonthKey, document: &CalendarMonth) -> bool {
        match self.try_save(persona_name, month, document) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    persona = persona_name,
                    month = %month,
                    error = %e,
                    "Failed to save calendar"
                );
                false
            }
        }
    }

    /// Like [`CalendarStore::save`] but reports why a save failed.
    pub fn try_save(&self, persona_name: &str, month: MonthKey, document: &CalendarMonth) -> Result<()> {
        check_document(persona_name, month, document)?;

        let path = self.path_for(persona_name, month);
        fs::create_dir_all(&self.dir)?;
        let json = document.to_pretty_json()?;

        let _guard = lock::acquire(&path, self.options.save_timeout, self.options.poll_interval)?;
        write_atomic(&path, json.as_bytes())?;

        tracing::info!(
            persona = persona_name,
            month = %month,
            days = document.calendar.len(),
            path = %path.display(),
            "Saved calendar"
        );
        Ok(())
    }

    /// Read, change and rewrite a month document under one lock hold.
    ///
    /// `change` receives the stored document (`None` when absent) and returns
    /// the document to write. No other cooperating writer can interleave.
    pub fn update<F>(&self, persona_name: &str, month: MonthKey, change: F) -> Result<CalendarMonth>
    where
        F: FnOnce(Option<CalendarMonth>) -> CalendarMonth,
    {
        let path = self.path_for(persona_name, month);
        fs::create_dir_all(&self.dir)?;

        let _guard = lock::acquire(&path, self.options.save_timeout, self.options.poll_interval)?;
        let document = change(read_document(&path)?);
        check_document(persona_name, month, &document)?;
        write_atomic(&path, document.to_pretty_json()?.as_bytes())?;

        tracing::info!(
            persona = persona_name,
            month = %month,
            days = document.calendar.len(),
            path = %path.display(),
            "Updated calendar"
        );
        Ok(document)
    }

    /// The plan for `date`, if its month document and day entry exist.
    pub fn get_day_plan(&self, persona_name: &str, date: NaiveDate) -> Result<Option<DailyPlan>> {
        Ok(self
            .load(persona_name, MonthKey::of(date))?
            .and_then(|mut doc| doc.calendar.remove(&date_key(date))))
    }

    /// Months with a stored document for `persona_name`, oldest first.
    pub fn list_months(&self, persona_name: &str) -> Result<Vec<MonthKey>> {
        let stem = file_stem_for(persona_name);
        let pattern = format!(
            "{}/{}_*.json",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            glob::Pattern::escape(&stem)
        );
        let prefix = format!("{stem}_");

        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Calendar(format!("invalid calendar path pattern: {e}")))?;

        let mut months: Vec<MonthKey> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable calendar entry");
                    None
                }
            })
            .filter_map(|path| {
                let name = path.file_stem()?.to_str()?.to_string();
                name.strip_prefix(&prefix)?.parse::<MonthKey>().ok()
            })
            .collect();
        months.sort();
        months.dedup();
        Ok(months)
    }
}

fn file_stem_for(persona_name: &str) -> String {
    persona_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

fn read_document(path: &Path) -> Result<Option<CalendarMonth>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_str(&content)?))
}

/// Persisted documents belong to the file's persona and month, are never
/// empty and never hold days outside their month.
fn check_document(persona_name: &str, month: MonthKey, document: &CalendarMonth) -> Result<()> {
    if document.persona_name != persona_name {
        return Err(Error::Calendar(format!(
            "document belongs to `{}`, not `{persona_name}`",
            document.persona_name
        )));
    }
    if document.month != month {
        return Err(Error::Calendar(format!(
            "document is for {}, not {month}",
            document.month
        )));
    }
    if document.calendar.is_empty() {
        return Err(Error::Calendar(format!(
            "refusing to save an empty calendar for {month}"
        )));
    }
    if let Some(key) = document
        .calendar
        .keys()
        .find(|k| !parse_date(k).is_some_and(|d| month.contains(d)))
    {
        return Err(Error::Calendar(format!(
            "day `{key}` is not a date in {month}"
        )));
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Calendar(format!("invalid calendar path {}", path.display())))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(bytes)?;
    tmp_file.write_all(b"\n")?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fast() -> StoreOptions {
        StoreOptions {
            load_timeout: Duration::from_millis(100),
            save_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn month(s: &str) -> MonthKey {
        s.parse().unwrap()
    }

    fn sample(persona: &str, key: &str, dates: &[&str]) -> CalendarMonth {
        let days: BTreeMap<String, DailyPlan> = dates
            .iter()
            .map(|d| {
                (
                    d.to_string(),
                    DailyPlan {
                        topic_type: "lifestyle_mundane".to_string(),
                        theme: format!("theme for {d}"),
                        keywords: vec!["咖啡".to_string()],
                        ..Default::default()
                    },
                )
            })
            .collect();
        CalendarMonth::new(persona, month(key), days)
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01", "2025-03-02"]);

        assert!(!store.exists("Mia", month("2025-03")));
        assert!(store.save("Mia", month("2025-03"), &doc));
        assert!(store.exists("Mia", month("2025-03")));
        assert_eq!(store.load("Mia", month("2025-03")).unwrap(), Some(doc));

        let raw = fs::read_to_string(store.path_for("Mia", month("2025-03"))).unwrap();
        assert!(raw.contains("咖啡"), "non-ASCII must not be escaped");
        assert!(raw.contains("\n  \"persona_name\""));
        assert!(!dir.path().join(".Mia_2025-03.json.tmp").exists());
    }

    #[test]
    fn day_plan_after_save_is_exact() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01", "2025-03-02"]);
        assert!(store.save("Mia", month("2025-03"), &doc));

        let date = NaiveDate::from_ymd_opt(2025, 3, 2).unwrap();
        assert_eq!(
            store.get_day_plan("Mia", date).unwrap().as_ref(),
            doc.calendar.get("2025-03-02")
        );
        let missing = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(store.get_day_plan("Mia", missing).unwrap(), None);
        let other_month = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(store.get_day_plan("Mia", other_month).unwrap(), None);
    }

    #[test]
    fn absent_month_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        assert!(store.load("Nobody", month("2025-03")).unwrap().is_none());
    }

    #[test]
    fn load_reports_lock_timeout_instead_of_absent() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01"]);
        assert!(store.save("Mia", month("2025-03"), &doc));

        let path = store.path_for("Mia", month("2025-03"));
        let _held = lock::acquire(&path, Duration::from_secs(1), Duration::from_millis(10)).unwrap();

        let err = store.load("Mia", month("2025-03")).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_transient());
        assert!(!store.save("Mia", month("2025-03"), &doc));
    }

    #[test]
    fn save_refuses_invalid_documents() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());

        let empty = CalendarMonth::new("Mia", month("2025-03"), BTreeMap::new());
        assert!(!store.save("Mia", month("2025-03"), &empty));

        let stray = sample("Mia", "2025-03", &["2025-03-01", "2025-04-01"]);
        assert!(matches!(
            store.try_save("Mia", month("2025-03"), &stray),
            Err(Error::Calendar(_))
        ));

        let wrong_key = sample("Mia", "2025-03", &["2025-03-01"]);
        assert!(!store.save("Mia", month("2025-04"), &wrong_key));
        assert!(!store.exists("Mia", month("2025-03")));
    }

    #[test]
    fn save_refuses_another_personas_document() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01"]);

        let err = store.try_save("Zoe", month("2025-03"), &doc).unwrap_err();
        assert!(matches!(err, Error::Calendar(ref m) if m.contains("`Mia`")));
        assert!(!store.exists("Zoe", month("2025-03")));
    }

    #[test]
    fn update_merges_into_stored_document() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        assert!(store.save("Mia", month("2025-03"), &sample("Mia", "2025-03", &["2025-03-01"])));

        let fresh = sample("Mia", "2025-03", &["2025-03-10"]);
        let merged = store
            .update("Mia", month("2025-03"), |stored| {
                let mut doc = stored.unwrap();
                doc.merge(fresh.calendar);
                doc
            })
            .unwrap();
        assert_eq!(merged.calendar.len(), 2);
        assert_eq!(store.load("Mia", month("2025-03")).unwrap(), Some(merged));
        assert!(!lock::lock_path_for(&store.path_for("Mia", month("2025-03"))).exists());
    }

    #[test]
    fn concurrent_updates_do_not_lose_writes() {
        let dir = TempDir::new().unwrap();
        let options = StoreOptions {
            load_timeout: Duration::from_secs(2),
            save_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        };
        let store = CalendarStore::new(dir.path(), options);
        assert!(store.save("Mia", month("2025-03"), &sample("Mia", "2025-03", &["2025-03-01"])));

        let (read_tx, read_rx) = std::sync::mpsc::channel();
        let slow_store = store.clone();
        let slow = std::thread::spawn(move || {
            slow_store
                .update("Mia", month("2025-03"), |stored| {
                    read_tx.send(()).unwrap();
                    // Hold the lock between reading and writing.
                    std::thread::sleep(Duration::from_millis(150));
                    let mut doc = stored.unwrap();
                    doc.merge(sample("Mia", "2025-03", &["2025-03-02"]).calendar);
                    doc
                })
                .map(|_| ())
        });

        read_rx.recv().unwrap();
        store
            .update("Mia", month("2025-03"), |stored| {
                let mut doc = stored.unwrap();
                doc.merge(sample("Mia", "2025-03", &["2025-03-03"]).calendar);
                doc
            })
            .unwrap();
        slow.join().unwrap().unwrap();

        let stored = store.load("Mia", month("2025-03")).unwrap().unwrap();
        let dates: Vec<&str> = stored.calendar.keys().map(String::as_str).collect();
        assert_eq!(dates, vec!["2025-03-01", "2025-03-02", "2025-03-03"]);
    }

    #[test]
    fn update_under_held_lock_times_out_unchanged() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01"]);
        assert!(store.save("Mia", month("2025-03"), &doc));

        let path = store.path_for("Mia", month("2025-03"));
        let held = lock::acquire(&path, Duration::from_secs(1), Duration::from_millis(10)).unwrap();
        let err = store
            .update("Mia", month("2025-03"), |_| sample("Mia", "2025-03", &["2025-03-09"]))
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        held.release();
        assert_eq!(store.load("Mia", month("2025-03")).unwrap(), Some(doc));
    }

    #[test]
    fn save_returns_false_on_io_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").unwrap();
        let store = CalendarStore::new(&blocker, fast());
        let doc = sample("Mia", "2025-03", &["2025-03-01"]);
        assert!(!store.save("Mia", month("2025-03"), &doc));
    }

    #[test]
    fn list_months_matches_only_this_persona() {
        let dir = TempDir::new().unwrap();
        let store = CalendarStore::new(dir.path(), fast());
        for key in ["2025-04", "2025-03"] {
            let doc = sample("Mia", key, &[&format!("{key}-01")]);
            assert!(store.save("Mia", month(key), &doc));
        }
        let other = sample("Mia_Rose", "2025-05", &["2025-05-01"]);
        assert!(store.save("Mia_Rose", month("2025-05"), &other));
        fs::write(dir.path().join("Mia_notes.json"), "{}").unwrap();

        assert_eq!(
            store.list_months("Mia").unwrap(),
            vec![month("2025-03"), month("2025-04")]
        );
        assert_eq!(store.list_months("Mia_Rose").unwrap(), vec![month("2025-05")]);
        assert!(store.list_months("Zed").unwrap().is_empty());
    }

    #[test]
    fn persona_names_cannot_escape_the_directory() {
        let store = CalendarStore::new("/tmp/cal", StoreOptions::default());
        assert_eq!(
            store.path_for("../evil", month("2025-03")),
            PathBuf::from("/tmp/cal/.._evil_2025-03.json")
        );
    }
}
