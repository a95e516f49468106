//! Local replica store.
//!
//! The replica is the authoritative local copy of the document. The sync
//! controller only needs three operations from it: snapshot the current
//! state, persist a bumped version stamp, and apply a merged payload. The
//! edit operations below that drive the DayRecord lifecycle live on the
//! concrete stores, not on the trait.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncResult;
use crate::model::{
    generate_entry_id, now_iso, ActivityRecord, DayRecord, Diary, ExerciseBlock, ExerciseSession,
    Finance, Meta, Payload,
};
use crate::validation;

/// Interface the sync controller depends on.
pub trait ReplicaStore: Send {
    /// Snapshot the current local state as a payload, initializing `meta`
    /// if the replica has never been stamped.
    fn snapshot(&self) -> Payload;

    /// Persist a bumped version stamp. Called before the network step of a
    /// push so the counter survives a failed upload.
    fn set_meta(&mut self, meta: &Meta) -> SyncResult<()>;

    /// Replace the replica with a merged payload.
    fn apply(&mut self, payload: &Payload) -> SyncResult<()>;
}

/// In-memory replica with the full set of edit operations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    payload: Payload,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Mark or clear attendance for a day. Clearing writes a tombstone so
    /// the removal survives merges against other devices.
    pub fn set_attendance(&mut self, date_key: &str, present: bool) -> SyncResult<()> {
        validation::validate_date_key(date_key)?;
        let rec = if present {
            DayRecord::Attendance {
                work: 1,
                day_ts: now_iso(),
            }
        } else {
            DayRecord::Tombstone { ts: now_iso() }
        };
        self.payload.set_day(date_key, rec);
        Ok(())
    }

    /// Append a timed session to a day, returning the generated entry id.
    pub fn add_session(&mut self, date_key: &str, minutes: f64) -> SyncResult<String> {
        validation::validate_date_key(date_key)?;
        let mut rec = self.take_activity(date_key);
        let id = generate_entry_id('m');
        rec.sessions.push(minutes);
        rec.starts.push(now_iso());
        rec.ids.push(id.clone());
        rec.day_ts = now_iso();
        self.payload.set_day(date_key, DayRecord::Activity(rec));
        Ok(id)
    }

    /// Remove a session by id. A shrink is an edit, so the record is marked
    /// `replace` to keep the removed entry from being resurrected by a later
    /// union merge. An emptied record collapses into a tombstone.
    pub fn remove_session(&mut self, date_key: &str, id: &str) -> SyncResult<bool> {
        validation::validate_date_key(date_key)?;
        let mut rec = self.take_activity(date_key);
        let Some(pos) = rec.ids.iter().position(|i| i == id) else {
            self.payload.set_day(date_key, DayRecord::Activity(rec));
            return Ok(false);
        };
        rec.sessions.remove(pos);
        rec.starts.remove(pos);
        rec.ids.remove(pos);
        rec.day_ts = now_iso();
        rec.replace = true;
        if rec.is_empty_shell() {
            self.payload
                .set_day(date_key, DayRecord::Tombstone { ts: now_iso() });
        } else {
            self.payload.set_day(date_key, DayRecord::Activity(rec));
        }
        Ok(true)
    }

    /// Replace a day with an explicit tombstone.
    pub fn clear_day(&mut self, date_key: &str) -> SyncResult<()> {
        validation::validate_date_key(date_key)?;
        self.payload
            .set_day(date_key, DayRecord::Tombstone { ts: now_iso() });
        Ok(())
    }

    /// Set or clear the diary text for a day.
    pub fn set_diary(&mut self, date_key: &str, text: &str) -> SyncResult<()> {
        validation::validate_date_key(date_key)?;
        let mut rec = self.take_activity(date_key);
        if text.trim().is_empty() {
            rec.diary = None;
        } else {
            rec.diary = Some(Diary {
                text: text.to_string(),
                updated_at: now_iso(),
            });
        }
        rec.day_ts = now_iso();
        if rec.is_empty_shell() {
            let month = validation::month_key_of(date_key).to_string();
            if let Some(m) = self.payload.data.get_mut(&month) {
                m.remove(date_key);
                if m.is_empty() {
                    self.payload.data.remove(&month);
                }
            }
        } else {
            self.payload.set_day(date_key, DayRecord::Activity(rec));
        }
        Ok(())
    }

    /// Log an exercise session, returning the generated entry id.
    pub fn add_exercise_session(
        &mut self,
        date_key: &str,
        kind: &str,
        seconds: u64,
    ) -> SyncResult<String> {
        validation::validate_date_key(date_key)?;
        let mut rec = self.take_activity(date_key);
        let id = generate_entry_id('e');
        let now = now_iso();
        let block = rec.exercise.get_or_insert_with(|| ExerciseBlock {
            sessions: Vec::new(),
            updated_at: now.clone(),
        });
        block.sessions.push(ExerciseSession {
            id: id.clone(),
            kind: kind.to_string(),
            seconds,
            started_at: now.clone(),
            completed_at: Some(now.clone()),
        });
        block.updated_at = now.clone();
        rec.day_ts = now;
        self.payload.set_day(date_key, DayRecord::Activity(rec));
        Ok(id)
    }

    /// Replace the finance settings block, stamping it with the current time.
    pub fn set_finance(&mut self, fields: serde_json::Map<String, serde_json::Value>) {
        self.payload.finance = Some(Finance {
            updated_at: Some(now_iso()),
            fields,
        });
    }

    /// Current day record, converted to a mutable activity. Attendance and
    /// tombstones are superseded by the first content edit of a day.
    fn take_activity(&mut self, date_key: &str) -> ActivityRecord {
        match self.payload.day(date_key) {
            Some(DayRecord::Activity(a)) => a.clone(),
            _ => ActivityRecord::default(),
        }
    }
}

impl ReplicaStore for MemoryStore {
    fn snapshot(&self) -> Payload {
        self.payload.clone()
    }

    fn set_meta(&mut self, meta: &Meta) -> SyncResult<()> {
        self.payload.meta = meta.clone();
        Ok(())
    }

    fn apply(&mut self, payload: &Payload) -> SyncResult<()> {
        self.payload = payload.clone();
        Ok(())
    }
}

/// Replica persisted as a JSON file, loaded on open and saved on mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    inner: MemoryStore,
    path: PathBuf,
}

impl JsonFileStore {
    /// Open a store at the given path. A missing file yields an empty
    /// replica; the file is created on first mutation.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        let payload = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Payload::default()
        };
        Ok(Self {
            inner: MemoryStore { payload },
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn payload(&self) -> &Payload {
        self.inner.payload()
    }

    fn persist(&self) -> SyncResult<()> {
        let content = serde_json::to_string_pretty(&self.inner.payload)?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn set_attendance(&mut self, date_key: &str, present: bool) -> SyncResult<()> {
        self.inner.set_attendance(date_key, present)?;
        self.persist()
    }

    pub fn add_session(&mut self, date_key: &str, minutes: f64) -> SyncResult<String> {
        let id = self.inner.add_session(date_key, minutes)?;
        self.persist()?;
        Ok(id)
    }

    pub fn remove_session(&mut self, date_key: &str, id: &str) -> SyncResult<bool> {
        let removed = self.inner.remove_session(date_key, id)?;
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn clear_day(&mut self, date_key: &str) -> SyncResult<()> {
        self.inner.clear_day(date_key)?;
        self.persist()
    }

    pub fn set_diary(&mut self, date_key: &str, text: &str) -> SyncResult<()> {
        self.inner.set_diary(date_key, text)?;
        self.persist()
    }

    pub fn add_exercise_session(
        &mut self,
        date_key: &str,
        kind: &str,
        seconds: u64,
    ) -> SyncResult<String> {
        let id = self.inner.add_exercise_session(date_key, kind, seconds)?;
        self.persist()?;
        Ok(id)
    }

    pub fn set_finance(
        &mut self,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> SyncResult<()> {
        self.inner.set_finance(fields);
        self.persist()
    }
}

impl ReplicaStore for JsonFileStore {
    fn snapshot(&self) -> Payload {
        self.inner.snapshot()
    }

    fn set_meta(&mut self, meta: &Meta) -> SyncResult<()> {
        self.inner.set_meta(meta)?;
        self.persist()
    }

    fn apply(&mut self, payload: &Payload) -> SyncResult<()> {
        self.inner.apply(payload)?;
        self.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::is_real_id;
    use tempfile::TempDir;

    #[test]
    fn test_attendance_toggle() {
        let mut store = MemoryStore::new();
        store.set_attendance("2024-03-15", true).unwrap();
        assert!(matches!(
            store.payload().day("2024-03-15"),
            Some(DayRecord::Attendance { work: 1, .. })
        ));

        store.set_attendance("2024-03-15", false).unwrap();
        assert!(store
            .payload()
            .day("2024-03-15")
            .is_some_and(DayRecord::is_tombstone));
    }

    #[test]
    fn test_add_session_generates_real_id() {
        let mut store = MemoryStore::new();
        let id = store.add_session("2024-03-15", 25.0).unwrap();
        assert!(id.starts_with('m'));
        assert!(is_real_id(&id));
        match store.payload().day("2024-03-15") {
            Some(DayRecord::Activity(a)) => {
                assert_eq!(a.sessions, vec![25.0]);
                assert_eq!(a.ids, vec![id]);
                assert_eq!(a.starts.len(), 1);
            }
            other => panic!("expected activity, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_session_marks_replace() {
        let mut store = MemoryStore::new();
        let first = store.add_session("2024-03-15", 10.0).unwrap();
        store.add_session("2024-03-15", 20.0).unwrap();
        assert!(store.remove_session("2024-03-15", &first).unwrap());
        match store.payload().day("2024-03-15") {
            Some(DayRecord::Activity(a)) => {
                assert_eq!(a.sessions, vec![20.0]);
                assert!(a.replace);
            }
            other => panic!("expected activity, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_last_session_leaves_tombstone() {
        let mut store = MemoryStore::new();
        let id = store.add_session("2024-03-15", 10.0).unwrap();
        assert!(store.remove_session("2024-03-15", &id).unwrap());
        assert!(store
            .payload()
            .day("2024-03-15")
            .is_some_and(DayRecord::is_tombstone));
    }

    #[test]
    fn test_remove_unknown_session_is_noop() {
        let mut store = MemoryStore::new();
        store.add_session("2024-03-15", 10.0).unwrap();
        assert!(!store.remove_session("2024-03-15", "m_nonexistent").unwrap());
    }

    #[test]
    fn test_set_diary_and_clear() {
        let mut store = MemoryStore::new();
        store.set_diary("2024-03-15", "went well").unwrap();
        match store.payload().day("2024-03-15") {
            Some(DayRecord::Activity(a)) => {
                assert_eq!(a.diary.as_ref().map(|d| d.text.as_str()), Some("went well"));
            }
            other => panic!("expected activity, got {:?}", other),
        }

        // Clearing the only content removes the shell entirely.
        store.set_diary("2024-03-15", "").unwrap();
        assert!(store.payload().day("2024-03-15").is_none());
    }

    #[test]
    fn test_add_exercise_session() {
        let mut store = MemoryStore::new();
        let id = store.add_exercise_session("2024-03-15", "plank", 90).unwrap();
        assert!(id.starts_with('e'));
        match store.payload().day("2024-03-15") {
            Some(DayRecord::Activity(a)) => {
                let block = a.exercise.as_ref().unwrap();
                assert_eq!(block.sessions.len(), 1);
                assert_eq!(block.sessions[0].kind, "plank");
                assert_eq!(block.sessions[0].seconds, 90);
            }
            other => panic!("expected activity, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_date_key_rejected() {
        let mut store = MemoryStore::new();
        assert!(store.set_attendance("2024-3-15", true).is_err());
        assert!(store.add_session("15/03/2024", 10.0).is_err());
    }

    #[test]
    fn test_set_finance_stamps_updated_at() {
        let mut store = MemoryStore::new();
        let mut fields = serde_json::Map::new();
        fields.insert("budget".to_string(), serde_json::json!(300));
        store.set_finance(fields);
        let finance = store.payload().finance.as_ref().unwrap();
        assert!(finance.updated_at.is_some());
        assert_eq!(finance.fields.get("budget"), Some(&serde_json::json!(300)));
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replica.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store.set_attendance("2024-03-15", true).unwrap();
            store.add_session("2024-03-16", 25.0).unwrap();
        }

        {
            let store = JsonFileStore::open(&path).unwrap();
            assert!(matches!(
                store.payload().day("2024-03-15"),
                Some(DayRecord::Attendance { work: 1, .. })
            ));
            assert!(matches!(
                store.payload().day("2024-03-16"),
                Some(DayRecord::Activity(_))
            ));
        }
    }

    #[test]
    fn test_json_file_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("fresh.json")).unwrap();
        assert_eq!(store.snapshot(), Payload::default());
    }

    #[test]
    fn test_json_file_store_persists_meta() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("replica.json");

        {
            let mut store = JsonFileStore::open(&path).unwrap();
            store
                .set_meta(&Meta {
                    version: 5,
                    updated_at: now_iso(),
                })
                .unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.snapshot().meta.version, 5);
    }
}
