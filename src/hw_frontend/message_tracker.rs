//! Tracking of sent commands awaiting acknowledgement.
//!
//! Each tracked entry keeps the encoded wire bytes so an expired entry can
//! be resent verbatim. Entries leave the tracker on a matching ack, or
//! through [`MessageTracker::take_expired`] once their timeout elapses and
//! the retry budget runs out.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default ack timeout for a sent command
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Default number of resends before giving up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

struct TrackedEntry {
    bytes: Vec<u8>,
    sent_at: Instant,
    retries: u32,
}

/// What to do about an entry whose ack timed out.
#[derive(Debug, PartialEq)]
pub enum Expired {
    /// Resend these bytes; the entry stays tracked with its retry count bumped
    Retry { uuid: u64, bytes: Vec<u8> },
    /// Retry budget exhausted; the entry has been dropped
    GaveUp { uuid: u64 },
}

/// Map from packet uuid to its pending-send entry. Shared between a
/// frontend's reader (confirming) and writer (tracking, expiring) threads.
pub struct MessageTracker {
    entries: Mutex<HashMap<u64, TrackedEntry>>,
    timeout: Duration,
    max_retries: u32,
}

impl MessageTracker {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
            max_retries,
        }
    }

    /// Start tracking a sent packet
    pub fn track(&self, uuid: u64, bytes: Vec<u8>) {
        self.entries.lock().insert(
            uuid,
            TrackedEntry {
                bytes,
                sent_at: Instant::now(),
                retries: 0,
            },
        );
    }

    /// Remove an entry on a matching ack. Returns whether it was tracked.
    pub fn confirm(&self, uuid: u64) -> bool {
        self.entries.lock().remove(&uuid).is_some()
    }

    /// Collect entries whose timeout elapsed. Entries with retries left are
    /// returned for resending and re-armed; the rest are dropped.
    pub fn take_expired(&self) -> Vec<Expired> {
        let mut expired = Vec::new();
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let timed_out: Vec<u64> = entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.sent_at) >= self.timeout)
            .map(|(uuid, _)| *uuid)
            .collect();

        for uuid in timed_out {
            let entry = entries.get_mut(&uuid).unwrap();
            if entry.retries < self.max_retries {
                entry.retries += 1;
                entry.sent_at = now;
                expired.push(Expired::Retry {
                    uuid,
                    bytes: entry.bytes.clone(),
                });
            } else {
                entries.remove(&uuid);
                expired.push(Expired::GaveUp { uuid });
            }
        }
        expired
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Drop all tracked entries (used when ack verification is switched off)
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn confirm_removes_tracked_entry() {
        let tracker = MessageTracker::new(Duration::from_millis(100), 2);
        tracker.track(42, vec![1, 2, 3]);
        assert_eq!(tracker.pending_count(), 1);
        assert!(tracker.confirm(42));
        assert!(!tracker.confirm(42));
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn entry_expires_into_retries_then_gives_up() {
        let tracker = MessageTracker::new(Duration::from_millis(1), 2);
        tracker.track(7, vec![0xAA]);

        for _ in 0..2 {
            thread::sleep(Duration::from_millis(5));
            let expired = tracker.take_expired();
            assert_eq!(
                expired,
                vec![Expired::Retry {
                    uuid: 7,
                    bytes: vec![0xAA]
                }]
            );
        }

        thread::sleep(Duration::from_millis(5));
        let expired = tracker.take_expired();
        assert_eq!(expired, vec![Expired::GaveUp { uuid: 7 }]);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn fresh_entries_do_not_expire() {
        let tracker = MessageTracker::new(Duration::from_secs(10), 2);
        tracker.track(1, vec![]);
        assert!(tracker.take_expired().is_empty());
        assert_eq!(tracker.pending_count(), 1);
    }
}
