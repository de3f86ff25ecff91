use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bell::model::{
    AppSnapshot, BellSlot, BellType, LessonSlot, MalformedTime, Session, WEEKDAYS, weekday_key,
};

pub const DATA_DIR_NAME: &str = "ATAM Okul Zili";
pub const DATA_FILE_NAME: &str = "okul_zili_data.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to read snapshot file {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid JSON at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("snapshot root must be a JSON object")]
    NotAnObject,
    #[error("unable to write snapshot file {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("unable to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of a soft-failing load: always carries a usable snapshot.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: AppSnapshot,
    pub error: Option<StoreError>,
    pub malformed: Vec<(BellSlot, MalformedTime)>,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> LoadedSnapshot {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot file yet, using defaults");
                return defaults_with(None);
            }
            Err(source) => {
                let err = StoreError::Read {
                    path: self.path.clone(),
                    source,
                };
                warn!(error = %err, "falling back to default snapshot");
                return defaults_with(Some(err));
            }
        };

        match parse_snapshot_text(&content) {
            Ok(snapshot) => {
                let malformed = snapshot.lesson_times.malformed_entries();
                for (slot, err) in &malformed {
                    warn!(%slot, error = %err, "stored bell time will never ring");
                }
                info!(
                    path = %self.path.display(),
                    populated = snapshot.lesson_times.populated_count(),
                    "snapshot loaded"
                );
                LoadedSnapshot {
                    snapshot,
                    error: None,
                    malformed,
                }
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "falling back to default snapshot");
                defaults_with(Some(err))
            }
        }
    }

    /// Writes next to the target and renames over it, so a crash never leaves a half-written file.
    pub fn save(&self, snapshot: &AppSnapshot) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(&snapshot_to_value(snapshot))?;
        let write_error = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let temp = self.temp_path();
        fs::write(&temp, format!("{text}\n")).map_err(write_error)?;
        if let Err(source) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(write_error(source));
        }
        debug!(path = %self.path.display(), "snapshot saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from(DATA_FILE_NAME));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn defaults_with(error: Option<StoreError>) -> LoadedSnapshot {
    LoadedSnapshot {
        snapshot: AppSnapshot::default(),
        error,
        malformed: Vec::new(),
    }
}

/// Windows and macOS use the platform data directory; elsewhere a dot-directory in home.
pub fn default_data_file() -> Option<PathBuf> {
    let dir = if cfg!(any(target_os = "windows", target_os = "macos")) {
        dirs::data_dir()?.join(DATA_DIR_NAME)
    } else {
        dirs::home_dir()?.join(format!(".{DATA_DIR_NAME}"))
    };
    Some(dir.join(DATA_FILE_NAME))
}

/// Merges the file into a default snapshot key by key. Missing keys and non-string leaves stay at their defaults.
pub fn parse_snapshot_text(content: &str) -> Result<AppSnapshot, StoreError> {
    let root = serde_json::from_str::<Value>(content).map_err(|err| StoreError::Parse {
        line: err.line(),
        column: err.column(),
        message: err.to_string(),
    })?;
    let root = root.as_object().ok_or(StoreError::NotAnObject)?;

    let mut snapshot = AppSnapshot::default();
    if let Some(name) = root.get("school_name").and_then(Value::as_str) {
        snapshot.school_name = name.to_string();
    }
    if let Some(logo) = root.get("school_logo_path").and_then(Value::as_str) {
        snapshot.school_logo_path = logo.to_string();
    }
    if let Some(sounds) = root.get("bell_sound_paths") {
        for bell in BellType::ALL {
            if let Some(path) = sounds.get(bell.key()).and_then(Value::as_str) {
                snapshot.bell_sound_paths.set(bell, path);
            }
        }
    }
    if let Some(days) = root.get("lesson_times") {
        for slot in BellSlot::all() {
            let time = days
                .get(weekday_key(slot.day))
                .and_then(|sessions| sessions.get(slot.session.key()))
                .and_then(|lessons| lessons.get(slot.lesson.key()))
                .and_then(|bells| bells.get(slot.bell.key()))
                .and_then(Value::as_str);
            if let Some(time) = time {
                snapshot.lesson_times.set_slot(slot, time);
            }
        }
    }
    Ok(snapshot)
}

/// The full file shape, every timetable key included.
pub fn snapshot_to_value(snapshot: &AppSnapshot) -> Value {
    let mut sounds = Map::new();
    for (bell, path) in snapshot.bell_sound_paths.iter() {
        sounds.insert(bell.key().to_string(), Value::String(path.to_string()));
    }

    let mut days = Map::new();
    for day in WEEKDAYS {
        let mut sessions = Map::new();
        for session in Session::ALL {
            let mut lessons = Map::new();
            for lesson in LessonSlot::all() {
                let mut bells = Map::new();
                for bell in BellType::ALL {
                    let time = snapshot.lesson_times.get(day, session, lesson, bell);
                    bells.insert(bell.key().to_string(), Value::String(time.to_string()));
                }
                lessons.insert(lesson.key(), Value::Object(bells));
            }
            sessions.insert(session.key().to_string(), Value::Object(lessons));
        }
        days.insert(weekday_key(day).to_string(), Value::Object(sessions));
    }

    let mut root = Map::new();
    root.insert(
        "school_name".to_string(),
        Value::String(snapshot.school_name.clone()),
    );
    root.insert(
        "school_logo_path".to_string(),
        Value::String(snapshot.school_logo_path.clone()),
    );
    root.insert("bell_sound_paths".to_string(), Value::Object(sounds));
    root.insert("lesson_times".to_string(), Value::Object(days));
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use tempfile::tempdir;

    use super::*;
    use crate::bell::model::DEFAULT_SCHOOL_NAME;

    fn slot(day: Weekday, session: Session, lesson: u8, bell: BellType) -> BellSlot {
        BellSlot {
            day,
            session,
            lesson: LessonSlot::new(lesson).expect("lesson"),
            bell,
        }
    }

    fn sample_snapshot() -> AppSnapshot {
        let mut snapshot = AppSnapshot::default();
        snapshot.school_name = "Atatürk Ortaokulu".to_string();
        snapshot.school_logo_path = "/srv/logo.png".to_string();
        snapshot
            .bell_sound_paths
            .set(BellType::Entry, "/sounds/içeri.mp3");
        snapshot
            .lesson_times
            .set_slot(slot(Weekday::Mon, Session::Morning, 1, BellType::Entry), "08:30");
        snapshot.lesson_times.set_slot(
            slot(Weekday::Fri, Session::Afternoon, 9, BellType::Break),
            "17:45",
        );
        snapshot
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join("nested").join(DATA_FILE_NAME));
        let snapshot = sample_snapshot();

        store.save(&snapshot).expect("save snapshot");
        assert!(!store.temp_path().exists());

        let loaded = store.load();
        assert!(loaded.error.is_none());
        assert!(loaded.malformed.is_empty());
        assert_eq!(loaded.snapshot, snapshot);
    }

    #[test]
    fn saved_file_materializes_every_key() {
        let value = snapshot_to_value(&AppSnapshot::default());
        let monday = &value["lesson_times"]["Pazartesi"];
        assert_eq!(monday["Sabah"]["1.Ders"]["İçeri"], Value::String(String::new()));
        assert_eq!(monday["Öğle"]["9.Ders"]["Teneffüs"], Value::String(String::new()));
        assert_eq!(
            value["lesson_times"].as_object().map(Map::len),
            Some(WEEKDAYS.len())
        );
        assert_eq!(
            value["school_name"],
            Value::String(DEFAULT_SCHOOL_NAME.to_string())
        );
    }

    #[test]
    fn partial_file_merges_key_by_key() {
        let json = r#"
{
  "school_name": "Cumhuriyet İlkokulu",
  "unknown_top_level": [1, 2, 3],
  "bell_sound_paths": { "Teneffüs": "/sounds/break.mp3", "Zil": "/ignored.mp3" },
  "lesson_times": {
    "Salı": {
      "Öğle": {
        "2.Ders": { "Öğretmenler": "13:35", "İçeri": 1340 },
        "10.Ders": { "İçeri": "18:00" }
      }
    },
    "Funday": {}
  }
}
"#;
        let snapshot = parse_snapshot_text(json).expect("valid snapshot");
        assert_eq!(snapshot.school_name, "Cumhuriyet İlkokulu");
        assert_eq!(snapshot.school_logo_path, "");
        assert_eq!(
            snapshot.bell_sound_paths.get(BellType::Break),
            Some("/sounds/break.mp3")
        );
        assert_eq!(snapshot.bell_sound_paths.get(BellType::Entry), None);
        assert_eq!(
            snapshot.lesson_times.get_slot(slot(
                Weekday::Tue,
                Session::Afternoon,
                2,
                BellType::TeacherBell
            )),
            "13:35"
        );
        assert_eq!(
            snapshot
                .lesson_times
                .get_slot(slot(Weekday::Tue, Session::Afternoon, 2, BellType::Entry)),
            ""
        );
        assert_eq!(snapshot.lesson_times.populated_count(), 1);
    }

    #[test]
    fn missing_file_yields_defaults_without_error() {
        let dir = tempdir().expect("tempdir");
        let loaded = SnapshotStore::new(dir.path().join("absent.json")).load();
        assert!(loaded.error.is_none());
        assert_eq!(loaded.snapshot, AppSnapshot::default());
    }

    #[test]
    fn malformed_json_yields_defaults_and_reports_position() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join(DATA_FILE_NAME);
        fs::write(&path, "{\n  \"school_name\": \n").expect("write file");

        let loaded = SnapshotStore::new(&path).load();
        assert_eq!(loaded.snapshot, AppSnapshot::default());
        let err = loaded.error.expect("parse error");
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().starts_with("invalid JSON at line"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(matches!(
            parse_snapshot_text("[1, 2]"),
            Err(StoreError::NotAnObject)
        ));
    }

    #[test]
    fn malformed_times_are_kept_and_reported() {
        let dir = tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path().join(DATA_FILE_NAME));
        let mut snapshot = AppSnapshot::default();
        let broken = slot(Weekday::Wed, Session::Morning, 3, BellType::Break);
        snapshot.lesson_times.set_slot(broken, "25:99");
        store.save(&snapshot).expect("save");

        let loaded = store.load();
        assert!(loaded.error.is_none());
        assert_eq!(loaded.snapshot.lesson_times.get_slot(broken), "25:99");
        assert_eq!(loaded.malformed.len(), 1);
        assert_eq!(loaded.malformed[0].0, broken);
    }

    #[test]
    fn write_failure_is_reported_not_fatal() {
        let dir = tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "a file, not a directory").expect("write blocker");

        let store = SnapshotStore::new(blocker.join(DATA_FILE_NAME));
        let err = store
            .save(&AppSnapshot::default())
            .expect_err("parent is a file");
        assert!(matches!(err, StoreError::Write { .. }));
    }

    #[test]
    fn default_data_file_uses_fixed_file_name() {
        if let Some(path) = default_data_file() {
            assert_eq!(
                path.file_name().and_then(|name| name.to_str()),
                Some(DATA_FILE_NAME)
            );
            assert!(path.to_string_lossy().contains(DATA_DIR_NAME));
        }
    }
}
