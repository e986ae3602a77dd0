// Queue ordering rules
//
// There is no in-memory queue: the job store's lease query is the queue.
// Jobs are handed out by (priority DESC, not_before ASC, created_at ASC, insertion order).

use crate::domain::job::Job;
use std::cmp::Ordering;

/// Lowest accepted priority
pub const MIN_PRIORITY: i32 = -100;

/// Highest accepted priority
pub const MAX_PRIORITY: i32 = 100;

pub const DEFAULT_PRIORITY: i32 = 0;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// Compare two jobs by dequeue order (`Less` = leased first).
///
/// Full ties are broken by the store's insertion sequence.
pub fn dequeue_order(a: &Job, b: &Job) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.not_before.cmp(&b.not_before))
        .then(a.created_at.cmp(&b.created_at))
}

pub fn is_valid_priority(priority: i32) -> bool {
    (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority)
}
