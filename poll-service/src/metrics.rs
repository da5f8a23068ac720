use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;
use serde_json::{json, Value};

use crate::database::path::DbLocation;
use crate::error::VoteError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VoteOutcome {
    Success,
    NotPublished,
    InvalidOption,
    NotFound,
    Conflict,
    Internal,
}

impl VoteOutcome {
    pub fn of<T>(result: &Result<T, VoteError>) -> Self {
        match result {
            Ok(_) => VoteOutcome::Success,
            Err(VoteError::PollNotPublished(_)) => VoteOutcome::NotPublished,
            Err(VoteError::InvalidOption { .. }) => VoteOutcome::InvalidOption,
            Err(VoteError::NotFound(_)) => VoteOutcome::NotFound,
            Err(VoteError::Conflict(_)) => VoteOutcome::Conflict,
            Err(VoteError::Storage(_) | VoteError::Internal(_)) => VoteOutcome::Internal,
        }
    }

    fn label(self) -> &'static str {
        match self {
            VoteOutcome::Success => "success",
            VoteOutcome::NotPublished => "not_published",
            VoteOutcome::InvalidOption => "invalid_option",
            VoteOutcome::NotFound => "not_found",
            VoteOutcome::Conflict => "conflict",
            VoteOutcome::Internal => "internal",
        }
    }
}

#[derive(Default)]
pub struct Metrics {
    vote_total: HashMap<VoteOutcome, u64>,
    broadcast_delivered_total: u64,
    broadcast_dropped_total: u64,
}

static METRICS: OnceCell<Mutex<Metrics>> = OnceCell::new();

fn get() -> MutexGuard<'static, Metrics> {
    METRICS
        .get_or_init(|| Mutex::new(Metrics::default()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

pub fn record_vote_outcome(outcome: VoteOutcome) {
    *get().vote_total.entry(outcome).or_insert(0) += 1;
}

pub fn record_broadcast(delivered: usize, dropped: usize) {
    let mut m = get();
    m.broadcast_delivered_total += delivered as u64;
    m.broadcast_dropped_total += dropped as u64;
}

pub fn snapshot_as_json(location: &DbLocation, live_subscribers: usize) -> Value {
    let m = get();

    let mut votes: Vec<(&'static str, u64)> = m
        .vote_total
        .iter()
        .map(|(outcome, count)| (outcome.label(), *count))
        .collect();
    votes.sort_unstable();
    let votes: Vec<Value> = votes
        .into_iter()
        .map(|(outcome, count)| json!({ "outcome": outcome, "count": count }))
        .collect();

    let broadcasts = json!({
        "delivered_total": m.broadcast_delivered_total,
        "dropped_total": m.broadcast_dropped_total,
        "live_subscribers": live_subscribers,
    });
    drop(m);

    json!({
        "vote_total": votes,
        "broadcast": broadcasts,
        "storage": storage_json(location),
    })
}

fn storage_json(location: &DbLocation) -> Value {
    match location {
        DbLocation::Memory => json!({
            "db_path": ":memory:",
            "db_size_mb": null,
            "free_storage_mb": null,
        }),
        DbLocation::File(path) => {
            let db_bytes = std::fs::metadata(path)
                .ok()
                .and_then(|m| if m.is_file() { Some(m.len()) } else { None });
            json!({
                "db_path": path.display().to_string(),
                "db_size_mb": db_bytes.map(|b| round2(bytes_to_mb(b))),
                "free_storage_mb": filesystem_free_mb(path),
            })
        }
    }
}

fn bytes_to_mb(bytes: u64) -> f64 {
    let mb = 1024.0 * 1024.0;
    (bytes as f64) / mb
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn filesystem_free_mb(db_path: &std::path::Path) -> Option<f64> {
    use sysinfo::Disks;
    let disks = Disks::new_with_refreshed_list();
    let path = db_path.canonicalize().ok()?;
    disks
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| round2(bytes_to_mb(d.available_space())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_follows_error_kind() {
        assert_eq!(VoteOutcome::of::<()>(&Ok(())), VoteOutcome::Success);
        assert_eq!(
            VoteOutcome::of::<()>(&Err(VoteError::PollNotPublished(1))),
            VoteOutcome::NotPublished
        );
        assert_eq!(
            VoteOutcome::of::<()>(&Err(VoteError::Conflict("busy".into()))),
            VoteOutcome::Conflict
        );
    }

    #[test]
    fn memory_storage_has_no_size() {
        let value = snapshot_as_json(&DbLocation::Memory, 0);
        assert_eq!(value["storage"]["db_path"], ":memory:");
        assert!(value["storage"]["db_size_mb"].is_null());
        assert!(value["vote_total"].is_array());
    }
}
