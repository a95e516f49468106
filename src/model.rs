//! Payload model for habitcore.
//!
//! The Payload is the full document exchanged with the remote blob store:
//! per-day records grouped by month, an optional finance settings block, and
//! version metadata. All timestamps are RFC 3339 UTC strings with zero-padded
//! fields, compared lexicographically; "1970" sorts before every real stamp
//! and serves as the epoch default for records that predate stamping.
//!
//! Day records arrive from older clients in several duck-typed shapes (bare
//! `0`/`1` attendance flags, objects with optional arrays). Decoding
//! normalizes all of them into the closed [`DayRecord`] union once at the
//! serde boundary, so the merge engine never sees a malformed record.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Epoch sentinel timestamp; sorts before any RFC 3339 stamp.
pub const EPOCH_TS: &str = "1970";

/// Prefix of merge-synthesized placeholder entry ids.
pub const SYNTHETIC_ID_PREFIX: &str = "v_";

fn epoch_string() -> String {
    EPOCH_TS.to_string()
}

/// Current wall-clock time as an RFC 3339 UTC string with millisecond
/// precision ("2025-01-01T09:00:00.000Z" style, zero-padded throughout).
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out: Vec<char> = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize] as char);
        n /= 36;
    }
    out.iter().rev().collect()
}

/// Generate a fresh entry id: prefix + base36 millis + 5 random base36 chars.
///
/// Activity entries use prefix 'm', exercise entries use prefix 'e'. Anything
/// not starting with [`SYNTHETIC_ID_PREFIX`] counts as a "real" id during
/// merge dedup.
pub fn generate_entry_id(prefix: char) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..5)
        .map(|_| DIGITS[rng.gen_range(0..36)] as char)
        .collect();
    format!("{}{}{}", prefix, to_base36(millis), suffix)
}

/// True if the id was generated locally rather than synthesized by a merge.
pub fn is_real_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with(SYNTHETIC_ID_PREFIX)
}

/// Version metadata stamped on every payload.
///
/// `version` is non-decreasing per device's own pushes but NOT globally
/// ordered across devices (two devices can independently bump from the same
/// base), so `updated_at` wall-clock is the true tiebreaker, never `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default)]
    pub version: u64,
    #[serde(default = "epoch_string")]
    pub updated_at: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: 0,
            updated_at: epoch_string(),
        }
    }
}

/// Flat finance settings block, compared and replaced wholesale by
/// `updated_at` during merge. The fields themselves are opaque to the sync
/// core; only the stamp matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Finance {
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Per-day diary entry; newer `updated_at` wins wholesale during merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diary {
    #[serde(default)]
    pub text: String,
    #[serde(default = "epoch_string")]
    pub updated_at: String,
}

/// One logged exercise session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseSession {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "default_exercise_kind")]
    pub kind: String,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

fn default_exercise_kind() -> String {
    "exercise".to_string()
}

/// Exercise sub-block of an activity record; merged independently of the
/// timed-session arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseBlock {
    #[serde(default)]
    pub sessions: Vec<ExerciseSession>,
    #[serde(default = "epoch_string")]
    pub updated_at: String,
}

impl ExerciseBlock {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Live activity record for one day.
///
/// `sessions[i]` / `starts[i]` / `ids[i]` are parallel arrays (same length
/// invariant, enforced at decode). `ids[i]` is a stable identity key used for
/// dedup across merges. `replace: true` marks this version as an edit/shrink
/// rather than an incremental add, switching the merge policy for this day
/// from union-append to newest-wins-wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub sessions: Vec<f64>,
    pub starts: Vec<String>,
    pub ids: Vec<String>,
    pub day_ts: String,
    pub replace: bool,
    pub exercise: Option<ExerciseBlock>,
    pub diary: Option<Diary>,
}

impl Default for ActivityRecord {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            starts: Vec::new(),
            ids: Vec::new(),
            day_ts: epoch_string(),
            replace: false,
            exercise: None,
            diary: None,
        }
    }
}

impl ActivityRecord {
    /// True when the record carries no content worth keeping: no timed
    /// sessions, no exercise sessions, no diary text.
    pub fn is_empty_shell(&self) -> bool {
        self.sessions.is_empty()
            && self.exercise.as_ref().map_or(true, ExerciseBlock::is_empty)
            && self.diary.is_none()
    }
}

/// One day's record: a closed union decoded from the duck-typed wire shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireDay", into = "WireDay")]
pub enum DayRecord {
    /// Explicit deletion marker; out-lives merges against stale live records.
    Tombstone { ts: String },
    /// Presence flag for the day; `work` is 0 or 1 on the wire.
    Attendance { work: u8, day_ts: String },
    /// Timed sessions plus optional exercise and diary content.
    Activity(ActivityRecord),
}

impl DayRecord {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, DayRecord::Tombstone { .. })
    }
}

/// Raw wire shape of a day value. Older clients write bare `0`/`1`; current
/// clients write objects with whichever fields apply.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireDay {
    Legacy(u8),
    Object(WireDayObject),
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireDayObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    work: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    day_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sessions: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    starts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replace: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exercise: Option<ExerciseBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    diary: Option<Diary>,
}

impl From<WireDay> for DayRecord {
    fn from(wire: WireDay) -> Self {
        match wire {
            WireDay::Legacy(n) => DayRecord::Attendance {
                work: u8::from(n == 1),
                day_ts: epoch_string(),
            },
            WireDay::Object(o) => {
                if o.deleted == Some(true) {
                    return DayRecord::Tombstone {
                        ts: o.ts.unwrap_or_else(epoch_string),
                    };
                }
                if o.sessions.is_some()
                    || o.starts.is_some()
                    || o.ids.is_some()
                    || o.exercise.is_some()
                    || o.diary.is_some()
                {
                    let sessions = o.sessions.unwrap_or_default();
                    let len = sessions.len();
                    // Restore the parallel-array invariant: pad with empty
                    // strings, truncate extras.
                    let mut starts = o.starts.unwrap_or_default();
                    starts.resize(len, String::new());
                    let mut ids = o.ids.unwrap_or_default();
                    ids.resize(len, String::new());
                    return DayRecord::Activity(ActivityRecord {
                        sessions,
                        starts,
                        ids,
                        day_ts: o.day_ts.unwrap_or_else(epoch_string),
                        replace: o.replace.unwrap_or(false),
                        exercise: o.exercise,
                        diary: o.diary,
                    });
                }
                if let Some(work) = o.work {
                    return DayRecord::Attendance {
                        work: u8::from(work == 1),
                        day_ts: o.day_ts.unwrap_or_else(epoch_string),
                    };
                }
                // Unrecognized object: treat as an empty live record, never
                // reject. Merge pruning collects it.
                DayRecord::Activity(ActivityRecord::default())
            }
        }
    }
}

impl From<DayRecord> for WireDay {
    fn from(rec: DayRecord) -> Self {
        match rec {
            DayRecord::Tombstone { ts } => WireDay::Object(WireDayObject {
                deleted: Some(true),
                ts: Some(ts),
                ..Default::default()
            }),
            DayRecord::Attendance { work, day_ts } => WireDay::Object(WireDayObject {
                work: Some(work),
                day_ts: Some(day_ts),
                ..Default::default()
            }),
            DayRecord::Activity(a) => WireDay::Object(WireDayObject {
                sessions: Some(a.sessions),
                starts: Some(a.starts),
                ids: Some(a.ids),
                day_ts: Some(a.day_ts),
                replace: if a.replace { Some(true) } else { None },
                exercise: a.exercise,
                diary: a.diary,
                ..Default::default()
            }),
        }
    }
}

/// Month key ("YYYY-MM") -> date key ("YYYY-MM-DD") -> day record.
pub type MonthMap = BTreeMap<String, DayRecord>;

/// The full exchanged document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Payload {
    #[serde(default)]
    pub data: BTreeMap<String, MonthMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finance: Option<Finance>,
    #[serde(default)]
    pub meta: Meta,
}

impl Payload {
    /// Increment the version counter and stamp `updated_at` with the current
    /// time. Called exactly once per push attempt, immediately before sealing.
    pub fn bump(&mut self) {
        self.meta.version += 1;
        self.meta.updated_at = now_iso();
    }

    /// Look up a day record by its date key.
    pub fn day(&self, date_key: &str) -> Option<&DayRecord> {
        let month = crate::validation::month_key_of(date_key);
        self.data.get(month).and_then(|m| m.get(date_key))
    }

    /// Insert or replace a day record, creating the month map as needed.
    pub fn set_day(&mut self, date_key: &str, rec: DayRecord) {
        let month = crate::validation::month_key_of(date_key).to_string();
        self.data.entry(month).or_default().insert(date_key.to_string(), rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_numeric_decodes_to_attendance() {
        let rec: DayRecord = serde_json::from_str("1").unwrap();
        assert_eq!(
            rec,
            DayRecord::Attendance {
                work: 1,
                day_ts: EPOCH_TS.to_string()
            }
        );

        let rec: DayRecord = serde_json::from_str("0").unwrap();
        assert_eq!(
            rec,
            DayRecord::Attendance {
                work: 0,
                day_ts: EPOCH_TS.to_string()
            }
        );
    }

    #[test]
    fn test_tombstone_decode() {
        let rec: DayRecord =
            serde_json::from_str(r#"{"deleted":true,"ts":"2024-01-01T10:00:00.000Z"}"#).unwrap();
        assert_eq!(
            rec,
            DayRecord::Tombstone {
                ts: "2024-01-01T10:00:00.000Z".to_string()
            }
        );
    }

    #[test]
    fn test_activity_decode_pads_parallel_arrays() {
        let rec: DayRecord = serde_json::from_str(
            r#"{"sessions":[10.0,20.0],"starts":["2024-01-01T09:00:00Z"],"dayTs":"2024-01-01T09:00:00Z"}"#,
        )
        .unwrap();
        match rec {
            DayRecord::Activity(a) => {
                assert_eq!(a.sessions.len(), 2);
                assert_eq!(a.starts, vec!["2024-01-01T09:00:00Z".to_string(), String::new()]);
                assert_eq!(a.ids, vec![String::new(), String::new()]);
                assert!(!a.replace);
            }
            other => panic!("expected activity, got {:?}", other),
        }
    }

    #[test]
    fn test_activity_decode_truncates_excess_ids() {
        let rec: DayRecord = serde_json::from_str(
            r#"{"sessions":[10.0],"starts":["a","b","c"],"ids":["m1","m2"]}"#,
        )
        .unwrap();
        match rec {
            DayRecord::Activity(a) => {
                assert_eq!(a.starts, vec!["a".to_string()]);
                assert_eq!(a.ids, vec!["m1".to_string()]);
            }
            other => panic!("expected activity, got {:?}", other),
        }
    }

    #[test]
    fn test_attendance_object_decode() {
        let rec: DayRecord =
            serde_json::from_str(r#"{"work":1,"dayTs":"2024-05-01T08:00:00.000Z"}"#).unwrap();
        assert_eq!(
            rec,
            DayRecord::Attendance {
                work: 1,
                day_ts: "2024-05-01T08:00:00.000Z".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_object_decodes_to_empty_activity() {
        let rec: DayRecord = serde_json::from_str(r#"{"something":"else"}"#).unwrap();
        match rec {
            DayRecord::Activity(a) => assert!(a.is_empty_shell()),
            other => panic!("expected empty activity, got {:?}", other),
        }
    }

    #[test]
    fn test_replace_flag_omitted_when_false() {
        let rec = DayRecord::Activity(ActivityRecord {
            sessions: vec![10.0],
            starts: vec!["s".to_string()],
            ids: vec!["m1".to_string()],
            day_ts: "2024-01-01T09:00:00Z".to_string(),
            ..Default::default()
        });
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json.get("replace").is_none());
        assert_eq!(json.get("dayTs").and_then(|v| v.as_str()), Some("2024-01-01T09:00:00Z"));
    }

    #[test]
    fn test_day_record_round_trip() {
        let rec = DayRecord::Activity(ActivityRecord {
            sessions: vec![10.0, 25.5],
            starts: vec!["2024-01-01T09:00:00Z".to_string(), "2024-01-01T10:00:00Z".to_string()],
            ids: vec!["m1aaa".to_string(), "m1bbb".to_string()],
            day_ts: "2024-01-01T10:00:00Z".to_string(),
            replace: true,
            exercise: Some(ExerciseBlock {
                sessions: vec![ExerciseSession {
                    id: "e1".to_string(),
                    kind: "plank".to_string(),
                    seconds: 60,
                    started_at: "2024-01-01T09:30:00Z".to_string(),
                    completed_at: Some("2024-01-01T09:31:00Z".to_string()),
                }],
                updated_at: "2024-01-01T09:31:00Z".to_string(),
            }),
            diary: Some(Diary {
                text: "good session".to_string(),
                updated_at: "2024-01-01T10:00:00Z".to_string(),
            }),
        });
        let json = serde_json::to_string(&rec).unwrap();
        let back: DayRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }

    #[test]
    fn test_bump_increments_version_and_restamps() {
        let mut p = Payload::default();
        assert_eq!(p.meta.version, 0);
        assert_eq!(p.meta.updated_at, EPOCH_TS);
        p.bump();
        assert_eq!(p.meta.version, 1);
        assert!(p.meta.updated_at > EPOCH_TS.to_string());
    }

    #[test]
    fn test_set_day_creates_month_map() {
        let mut p = Payload::default();
        p.set_day(
            "2024-03-15",
            DayRecord::Attendance {
                work: 1,
                day_ts: now_iso(),
            },
        );
        assert!(p.data.contains_key("2024-03"));
        assert!(p.day("2024-03-15").is_some());
        assert!(p.day("2024-03-16").is_none());
    }

    #[test]
    fn test_generated_ids_are_real() {
        let id = generate_entry_id('m');
        assert!(id.starts_with('m'));
        assert!(is_real_id(&id));
        assert!(!is_real_id("v_10|2024-01-01T09:00:00Z"));
        assert!(!is_real_id(""));
    }

    #[test]
    fn test_now_iso_is_zero_padded_utc() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T09:00:00.000Z".len());
    }
}
