//! Field-level merge engine.
//!
//! `merge(local, remote)` reconciles two payload snapshots without a server
//! side merge authority. It is total (never fails on well-formed payloads)
//! and deterministic. All "newer wins" comparisons are lexicographic on the
//! zero-padded timestamp strings; ties resolve to the LOCAL side throughout,
//! which keeps `merge(P, P) == P`. The one asymmetric rule: a live record
//! beats a tombstone only when its `day_ts` is STRICTLY newer than the
//! tombstone's `ts`, so on a tie the deletion sticks.

use std::collections::BTreeSet;

use crate::model::{
    is_real_id, ActivityRecord, DayRecord, Diary, ExerciseBlock, ExerciseSession, Finance, Meta,
    MonthMap, Payload, EPOCH_TS, SYNTHETIC_ID_PREFIX,
};

/// Cap on the unioned session list per day; bounds payload growth from
/// pathological repeated merges.
pub const MAX_UNION_ENTRIES: usize = 48;

/// Dedup fingerprint for a timed session: minutes rounded to 2 decimal
/// places, joined with the start timestamp. Entries lacking a start time
/// share a fingerprint bucket per duration; that collapse is a known
/// limitation of the format, kept for compatibility with existing payloads.
pub fn fingerprint(minutes: f64, start: &str) -> String {
    let rounded = (minutes * 100.0).round() / 100.0;
    format!("{}|{}", rounded, start)
}

fn newer<'a>(local: &'a str, remote: &'a str) -> &'a str {
    if remote > local {
        remote
    } else {
        local
    }
}

/// Merge two payload snapshots into one.
pub fn merge(local: &Payload, remote: &Payload) -> Payload {
    let mut merged = Payload {
        finance: merge_finance(local, remote),
        ..Default::default()
    };

    let months: BTreeSet<&String> = local.data.keys().chain(remote.data.keys()).collect();
    for month in months {
        let l_month = local.data.get(month);
        let r_month = remote.data.get(month);
        let days: BTreeSet<&String> = l_month
            .map(|m| m.keys().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .chain(
                r_month
                    .map(|m| m.keys().collect::<Vec<_>>())
                    .unwrap_or_default(),
            )
            .collect();

        let mut merged_month = MonthMap::new();
        for day in days {
            let l_val = l_month.and_then(|m| m.get(day));
            let r_val = r_month.and_then(|m| m.get(day));
            let rec = match (l_val, r_val) {
                (Some(l), Some(r)) => merge_day(l, r),
                (Some(l), None) => l.clone(),
                (None, Some(r)) => r.clone(),
                (None, None) => continue,
            };
            // Garbage-collect empty live shells; never prune tombstones or
            // attendance records.
            if let DayRecord::Activity(a) = &rec {
                if a.is_empty_shell() {
                    continue;
                }
            }
            merged_month.insert(day.clone(), rec);
        }
        if !merged_month.is_empty() {
            merged.data.insert(month.clone(), merged_month);
        }
    }

    merged.meta = merge_meta(&local.meta, &remote.meta);
    merged
}

fn merge_finance(local: &Payload, remote: &Payload) -> Option<Finance> {
    match (&local.finance, &remote.finance) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => {
            // Fall back to the payload-level stamp for unstamped blocks.
            let lu = l.updated_at.as_deref().unwrap_or(&local.meta.updated_at);
            let ru = r.updated_at.as_deref().unwrap_or(&remote.meta.updated_at);
            if ru > lu {
                Some(r.clone())
            } else {
                Some(l.clone())
            }
        }
    }
}

/// Wholesale: `version` and `updated_at` travel together, never mixed.
fn merge_meta(local: &Meta, remote: &Meta) -> Meta {
    if remote.updated_at > local.updated_at {
        remote.clone()
    } else {
        local.clone()
    }
}

/// Live view of a non-tombstone day record.
enum LiveView<'a> {
    Activity(&'a ActivityRecord),
    Attendance { work: u8, day_ts: &'a str },
}

impl<'a> LiveView<'a> {
    fn of(rec: &'a DayRecord) -> Option<Self> {
        match rec {
            DayRecord::Tombstone { .. } => None,
            DayRecord::Attendance { work, day_ts } => Some(LiveView::Attendance {
                work: *work,
                day_ts,
            }),
            DayRecord::Activity(a) => Some(LiveView::Activity(a)),
        }
    }

    fn day_ts(&self) -> &str {
        match self {
            LiveView::Activity(a) => &a.day_ts,
            LiveView::Attendance { day_ts, .. } => day_ts,
        }
    }

    fn replace(&self) -> bool {
        matches!(self, LiveView::Activity(a) if a.replace)
    }
}

/// Merge one day's record from both sides.
pub fn merge_day(local: &DayRecord, remote: &DayRecord) -> DayRecord {
    let (l_live, r_live) = match (LiveView::of(local), LiveView::of(remote)) {
        (None, None) => {
            // Both tombstones: newer ts wins, tie local.
            let (DayRecord::Tombstone { ts: lt }, DayRecord::Tombstone { ts: rt }) =
                (local, remote)
            else {
                return local.clone();
            };
            return if rt > lt {
                remote.clone()
            } else {
                local.clone()
            };
        }
        (None, Some(live)) => {
            // Delete beats stale concurrent edit; a later edit beats an
            // earlier delete.
            let DayRecord::Tombstone { ts } = local else {
                return local.clone();
            };
            return if live.day_ts() > ts.as_str() {
                remote.clone()
            } else {
                local.clone()
            };
        }
        (Some(live), None) => {
            let DayRecord::Tombstone { ts } = remote else {
                return remote.clone();
            };
            return if live.day_ts() > ts.as_str() {
                local.clone()
            } else {
                remote.clone()
            };
        }
        (Some(l), Some(r)) => (l, r),
    };

    // Edit/shrink marker: the newer side is an authoritative snapshot for
    // this day, so no union. Individually deleted entries must not be
    // resurrected by merging against a stale pre-edit snapshot.
    if l_live.replace() || r_live.replace() {
        return if r_live.day_ts() > l_live.day_ts() {
            remote.clone()
        } else {
            local.clone()
        };
    }

    match (l_live, r_live) {
        (LiveView::Activity(l), LiveView::Activity(r)) => {
            DayRecord::Activity(union_merge(l, r))
        }
        // Mixed live shapes: treat the attendance side as an empty activity
        // so its day_ts provenance still participates in the union.
        (LiveView::Activity(l), LiveView::Attendance { day_ts, .. }) => {
            let empty = ActivityRecord {
                day_ts: day_ts.to_string(),
                ..Default::default()
            };
            DayRecord::Activity(union_merge(l, &empty))
        }
        (LiveView::Attendance { day_ts, .. }, LiveView::Activity(r)) => {
            let empty = ActivityRecord {
                day_ts: day_ts.to_string(),
                ..Default::default()
            };
            DayRecord::Activity(union_merge(&empty, r))
        }
        (
            LiveView::Attendance {
                work: lw,
                day_ts: lts,
            },
            LiveView::Attendance {
                work: rw,
                day_ts: rts,
            },
        ) => merge_attendance(lw, lts, rw, rts),
    }
}

/// Attendance is OR-like: presence beats absence regardless of timestamp.
/// When both sides agree, the newer `day_ts` provenance is kept (tie local).
fn merge_attendance(lw: u8, lts: &str, rw: u8, rts: &str) -> DayRecord {
    let pick = |work: u8, ts: &str| DayRecord::Attendance {
        work,
        day_ts: ts.to_string(),
    };
    if lw == 1 && rw == 1 {
        pick(1, newer(lts, rts))
    } else if lw == 1 {
        pick(1, lts)
    } else if rw == 1 {
        pick(1, rts)
    } else {
        pick(0, newer(lts, rts))
    }
}

struct UnionEntry {
    minutes: f64,
    start: String,
    id: String,
}

fn absorb(entries: &mut Vec<(String, UnionEntry)>, rec: &ActivityRecord) {
    for i in 0..rec.sessions.len() {
        let minutes = rec.sessions[i];
        let start = rec.starts.get(i).cloned().unwrap_or_default();
        let fp = fingerprint(minutes, &start);
        let id = rec
            .ids
            .get(i)
            .filter(|id| !id.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("{}{}", SYNTHETIC_ID_PREFIX, fp));
        match entries.iter_mut().find(|(f, _)| *f == fp) {
            None => entries.push((fp, UnionEntry { minutes, start, id })),
            Some((_, cur)) => {
                // Same logical entry seen on both sides: keep one, preferring
                // a real id over a synthesized placeholder.
                if is_real_id(&id) && !is_real_id(&cur.id) {
                    *cur = UnionEntry { minutes, start, id };
                }
            }
        }
    }
}

/// Union-append with fingerprint dedup for two live additive records.
fn union_merge(local: &ActivityRecord, remote: &ActivityRecord) -> ActivityRecord {
    let mut entries: Vec<(String, UnionEntry)> = Vec::new();
    absorb(&mut entries, local);
    absorb(&mut entries, remote);

    if entries.len() > MAX_UNION_ENTRIES {
        // Over cap: keep the newest entries by start time. Only the overflow
        // path re-sorts, so in-order payloads merge idempotently.
        entries.sort_by(|(af, a), (bf, b)| a.start.cmp(&b.start).then_with(|| af.cmp(bf)));
        let excess = entries.len() - MAX_UNION_ENTRIES;
        entries.drain(0..excess);
    }

    let exercise = merge_exercise(local.exercise.as_ref(), remote.exercise.as_ref())
        .filter(|block| !block.is_empty());
    let diary = merge_diary(local.diary.as_ref(), remote.diary.as_ref());

    ActivityRecord {
        sessions: entries.iter().map(|(_, e)| e.minutes).collect(),
        starts: entries.iter().map(|(_, e)| e.start.clone()).collect(),
        ids: entries.iter().map(|(_, e)| e.id.clone()).collect(),
        day_ts: newer(&local.day_ts, &remote.day_ts).to_string(),
        replace: false,
        exercise,
        diary,
    }
}

fn exercise_time(s: &ExerciseSession) -> &str {
    match s.completed_at.as_deref().filter(|t| !t.is_empty()) {
        Some(t) => t,
        None if !s.started_at.is_empty() => &s.started_at,
        None => EPOCH_TS,
    }
}

fn exercise_key(s: &ExerciseSession) -> String {
    if s.id.is_empty() {
        format!("{}|{}|{}", s.kind, s.started_at, s.seconds)
    } else {
        s.id.clone()
    }
}

/// Merge exercise blocks independently: exact id match wins as the dedup key,
/// falling back to the `(type, startedAt, seconds)` fingerprint; the entry
/// with the newer `completed_at`/`started_at` is preferred.
pub fn merge_exercise(
    local: Option<&ExerciseBlock>,
    remote: Option<&ExerciseBlock>,
) -> Option<ExerciseBlock> {
    let (l, r) = match (local, remote) {
        (None, None) => return None,
        (Some(l), None) => return Some(l.clone()),
        (None, Some(r)) => return Some(r.clone()),
        (Some(l), Some(r)) => (l, r),
    };

    let mut entries: Vec<(String, ExerciseSession)> = Vec::new();
    let mut put = |item: &ExerciseSession| {
        let key = exercise_key(item);
        match entries.iter_mut().find(|(k, _)| *k == key) {
            None => entries.push((key, item.clone())),
            Some((_, existing)) => {
                if exercise_time(item) > exercise_time(existing) {
                    let keep_id = if item.id.is_empty() {
                        existing.id.clone()
                    } else {
                        item.id.clone()
                    };
                    *existing = ExerciseSession {
                        id: keep_id,
                        ..item.clone()
                    };
                } else if existing.id.is_empty() && !item.id.is_empty() {
                    *existing = item.clone();
                }
            }
        }
    };
    for s in &l.sessions {
        put(s);
    }
    for s in &r.sessions {
        put(s);
    }

    Some(ExerciseBlock {
        sessions: entries.into_iter().map(|(_, s)| s).collect(),
        updated_at: newer(&l.updated_at, &r.updated_at).to_string(),
    })
}

fn merge_diary(local: Option<&Diary>, remote: Option<&Diary>) -> Option<Diary> {
    match (local, remote) {
        (None, None) => None,
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (Some(l), Some(r)) => {
            if r.updated_at > l.updated_at {
                Some(r.clone())
            } else {
                Some(l.clone())
            }
        }
    }
}

/// One-shot cleanup for records written before entry ids existed: collapse
/// duplicate fingerprints inside a single record and mint real ids for the
/// survivors. Returns true when anything changed so the caller can mark the
/// replica dirty.
pub fn dedup_sessions(rec: &mut ActivityRecord) -> bool {
    let mut entries: Vec<(String, UnionEntry)> = Vec::new();
    absorb(&mut entries, rec);
    let mut changed = entries.len() != rec.sessions.len();
    for (_, entry) in entries.iter_mut() {
        if !is_real_id(&entry.id) {
            entry.id = crate::model::generate_entry_id('m');
            changed = true;
        }
    }
    if changed {
        rec.sessions = entries.iter().map(|(_, e)| e.minutes).collect();
        rec.starts = entries.iter().map(|(_, e)| e.start.clone()).collect();
        rec.ids = entries.iter().map(|(_, e)| e.id.clone()).collect();
    }
    changed
}
