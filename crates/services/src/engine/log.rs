//! # Positional identity log
//!
//! Pure transformations of a [`PositionalLog`]. Each takes the current log
//! and returns the next one; the engine turns the result into a patch.

use chrono::{DateTime, Utc};

use binder_domains::{IdGenerator, PositionLogEntry, PositionalLog, PreconditionViolation};

/// One fresh entry per chunk, positions `0..chunks`.
pub fn fresh_log(chunks: usize, now: DateTime<Utc>, ids: &dyn IdGenerator) -> PositionalLog {
    PositionalLog {
        entries: (0..chunks)
            .map(|position| PositionLogEntry::fresh(ids.next_uuid(), position, now))
            .collect(),
    }
}

/// Makes room for a new chunk at `at`.
///
/// Appending (`at == len`) adds one fresh entry. Otherwise the entry at `at`
/// moves to `at + 1` with a refreshed update time, a fresh entry takes
/// `at`, and every later entry shifts up by one.
pub fn insert_entry(
    log: &PositionalLog,
    at: usize,
    now: DateTime<Utc>,
    ids: &dyn IdGenerator,
) -> Result<PositionalLog, PreconditionViolation> {
    let len = log.entries.len();
    if at > len {
        return Err(PreconditionViolation::index("log", at, len));
    }
    if at == len {
        let mut entries = log.entries.clone();
        entries.push(PositionLogEntry::fresh(ids.next_uuid(), at, now));
        return Ok(PositionalLog { entries });
    }

    let mut entries = Vec::with_capacity(len + 1);
    for entry in &log.entries {
        if entry.position < at {
            entries.push(entry.clone());
        } else if entry.position == at {
            entries.push(PositionLogEntry::fresh(ids.next_uuid(), at, now));
            entries.push(PositionLogEntry {
                position: at + 1,
                updated_at: now,
                ..entry.clone()
            });
        } else {
            entries.push(PositionLogEntry {
                position: entry.position + 1,
                ..entry.clone()
            });
        }
    }
    Ok(PositionalLog { entries })
}

/// Folds the entry at `at + 1` into the one at `at`.
///
/// The surviving entry gets a fresh uuid and records both predecessors at
/// the head of its lineage, followed by everything either of them already
/// carried. Later entries shift down by one and keep their timestamps.
pub fn merge_entries(
    log: &PositionalLog,
    at: usize,
    now: DateTime<Utc>,
    ids: &dyn IdGenerator,
) -> Result<PositionalLog, PreconditionViolation> {
    let len = log.entries.len();
    let (Some(first), Some(second)) = (log.entry_at(at), log.entry_at(at + 1)) else {
        return Err(PreconditionViolation::index("log", at + 1, len));
    };

    let mut lineage = vec![first.uuid, second.uuid];
    lineage.extend(first.lineage.iter().copied());
    lineage.extend(second.lineage.iter().copied());
    let merged = PositionLogEntry {
        uuid: ids.next_uuid(),
        position: at,
        created_at: first.created_at,
        updated_at: now,
        lineage,
    };

    let entries = log
        .entries
        .iter()
        .filter(|entry| entry.position != at + 1)
        .map(|entry| {
            if entry.position == at {
                merged.clone()
            } else if entry.position > at + 1 {
                PositionLogEntry {
                    position: entry.position - 1,
                    ..entry.clone()
                }
            } else {
                entry.clone()
            }
        })
        .collect();
    Ok(PositionalLog { entries })
}

/// Moves the entry at position `from` to position `to` with the same
/// remove-then-insert semantics the chunk arrays get.
pub fn reposition_entries(
    log: &PositionalLog,
    from: usize,
    to: usize,
    now: DateTime<Utc>,
) -> Result<PositionalLog, PreconditionViolation> {
    let len = log.entries.len();
    if from >= len {
        return Err(PreconditionViolation::index("log", from, len));
    }
    if to >= len {
        return Err(PreconditionViolation::index("log", to, len));
    }

    let mut sorted = log.entries.clone();
    sorted.sort_by_key(|entry| entry.position);
    let moved = sorted.remove(from);
    sorted.insert(to, moved);

    let entries = sorted
        .into_iter()
        .enumerate()
        .map(|(position, entry)| PositionLogEntry {
            position,
            updated_at: if position == to { now } else { entry.updated_at },
            ..entry
        })
        .collect();
    Ok(PositionalLog { entries })
}

/// Refreshes the update time of the entry at `at`.
pub fn touch_entry(log: &PositionalLog, at: usize, now: DateTime<Utc>) -> Result<PositionalLog, PreconditionViolation> {
    let len = log.entries.len();
    let mut entries = log.entries.clone();
    let entry = entries
        .iter_mut()
        .find(|entry| entry.position == at)
        .ok_or_else(|| PreconditionViolation::index("log", at, len))?;
    entry.updated_at = now;
    Ok(PositionalLog { entries })
}
