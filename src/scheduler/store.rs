use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid time {0:?}, use HH:MM (e.g. 09:30)")]
    InvalidTime(String),
    #[error("{0} is already scheduled")]
    Duplicate(ScheduleTime),
    #[error("{0} is not scheduled")]
    NotFound(ScheduleTime),
    #[error("schedule file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schedule file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A daily trigger time, always shown as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ScheduleTime(NaiveTime);

impl ScheduleTime {
    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for ScheduleTime {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .map(ScheduleTime)
            .map_err(|_| ScheduleError::InvalidTime(trimmed.to_string()))
    }
}

impl TryFrom<String> for ScheduleTime {
    type Error = ScheduleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScheduleTime> for String {
    fn from(value: ScheduleTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// The schedule file: a JSON array of `HH:MM` strings.
///
/// Every mutation re-reads the file, applies the change and writes it back
/// before returning, so the file is always the whole truth.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    path: PathBuf,
}

impl ScheduleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted, unique times. A missing file is an empty schedule.
    pub fn load(&self) -> Result<Vec<ScheduleTime>, ScheduleError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let raw: Vec<String> = serde_json::from_str(&content)?;
        let mut times = BTreeSet::new();
        for entry in raw {
            match entry.parse::<ScheduleTime>() {
                Ok(time) => {
                    times.insert(time);
                }
                Err(_) => tracing::warn!("Ignoring invalid schedule entry {:?} in {}", entry, self.path.display()),
            }
        }
        Ok(times.into_iter().collect())
    }

    fn save(&self, times: &[ScheduleTime]) -> Result<(), ScheduleError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_string_pretty(times)?)?;
        Ok(())
    }

    pub fn add(&self, raw: &str) -> Result<Vec<ScheduleTime>, ScheduleError> {
        let time: ScheduleTime = raw.parse()?;
        let mut times = self.load()?;
        if times.contains(&time) {
            return Err(ScheduleError::Duplicate(time));
        }
        times.push(time);
        times.sort();
        self.save(&times)?;
        Ok(times)
    }

    pub fn remove(&self, time: ScheduleTime) -> Result<Vec<ScheduleTime>, ScheduleError> {
        let mut times = self.load()?;
        let before = times.len();
        times.retain(|t| *t != time);
        if times.len() == before {
            return Err(ScheduleError::NotFound(time));
        }
        self.save(&times)?;
        Ok(times)
    }

    pub fn clear(&self) -> Result<(), ScheduleError> {
        self.save(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path().join("data").join("schedules.json"));
        (dir, store)
    }

    fn strings(times: &[ScheduleTime]) -> Vec<String> {
        times.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_missing_file_is_empty_schedule() {
        let (_dir, store) = store();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_add_persists_sorted_and_reloads_identically() {
        let (_dir, store) = store();
        store.add("14:30").unwrap();
        let times = store.add("09:00").unwrap();
        assert_eq!(strings(&times), vec!["09:00", "14:30"]);

        let reopened = ScheduleStore::new(store.path());
        assert_eq!(strings(&reopened.load().unwrap()), vec!["09:00", "14:30"]);

        let on_disk: Vec<String> =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk, vec!["09:00", "14:30"]);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let (_dir, store) = store();
        store.add("09:00").unwrap();
        assert!(matches!(store.add(" 09:00 "), Err(ScheduleError::Duplicate(_))));
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_times_are_rejected() {
        let (_dir, store) = store();
        for bad in ["", "24:00", "12:60", "noon", "12-30", "12:30:15"] {
            assert!(
                matches!(store.add(bad), Err(ScheduleError::InvalidTime(_))),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(!store.path().exists());
    }

    #[test]
    fn test_remove_and_clear() {
        let (_dir, store) = store();
        store.add("09:00").unwrap();
        store.add("18:15").unwrap();

        let nine: ScheduleTime = "09:00".parse().unwrap();
        assert_eq!(strings(&store.remove(nine).unwrap()), vec!["18:15"]);
        assert!(matches!(store.remove(nine), Err(ScheduleError::NotFound(_))));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn test_mutations_read_fresh_from_disk() {
        let (_dir, store) = store();
        store.add("09:00").unwrap();
        fs::write(store.path(), r#"["07:45"]"#).unwrap();

        let times = store.add("10:00").unwrap();
        assert_eq!(strings(&times), vec!["07:45", "10:00"]);
    }

    #[test]
    fn test_load_normalizes_hand_edited_files() {
        let (_dir, store) = store();
        fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        fs::write(store.path(), r#"["18:00", "bogus", "08:00", "18:00"]"#).unwrap();
        assert_eq!(strings(&store.load().unwrap()), vec!["08:00", "18:00"]);
    }

    #[test]
    fn test_serde_uses_hh_mm_strings() {
        let time: ScheduleTime = serde_json::from_str("\"07:05\"").unwrap();
        assert_eq!(serde_json::to_string(&time).unwrap(), "\"07:05\"");
        assert!(serde_json::from_str::<ScheduleTime>("\"7h05\"").is_err());
    }
}
