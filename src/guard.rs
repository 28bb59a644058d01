// LocalAgent Gate - Duplicate-Request Guard
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Fingerprints the exact prompt text (SHA256, case and whitespace
// sensitive) and blocks a prompt repeated inside the detection window
// more often than allowed. Idle fingerprints are evicted on every call.
// The table is owned here behind one lock and never exposed.

use crate::config::{FINGERPRINT_RETENTION, LOOP_WINDOW, MAX_REPEATS};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Allowed,
    Blocked { repeats: u32 },
}

impl GuardVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardVerdict::Blocked { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Fingerprint {
    count: u32,
    last_seen: Instant,
}

/// SHA256 hex digest of the exact prompt text.
pub fn fingerprint(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

#[derive(Debug)]
pub struct RequestGuard {
    window: Duration,
    max_repeats: u32,
    retention: Duration,
    table: Mutex<HashMap<String, Fingerprint>>,
}

impl Default for RequestGuard {
    fn default() -> Self {
        Self::new(LOOP_WINDOW, MAX_REPEATS, FINGERPRINT_RETENTION)
    }
}

impl RequestGuard {
    pub fn new(window: Duration, max_repeats: u32, retention: Duration) -> Self {
        Self { window, max_repeats, retention, table: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Fingerprint>> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn check_and_record(&self, prompt: &str) -> GuardVerdict {
        self.check_and_record_at(prompt, Instant::now())
    }

    /// Same as check_and_record with an injected clock.
    pub fn check_and_record_at(&self, prompt: &str, now: Instant) -> GuardVerdict {
        let key = fingerprint(prompt);
        let mut table = self.lock();

        let verdict = match table.get_mut(&key) {
            None => {
                table.insert(key, Fingerprint { count: 1, last_seen: now });
                GuardVerdict::Allowed
            }
            Some(entry) => {
                let elapsed = now.saturating_duration_since(entry.last_seen);
                entry.last_seen = now;
                if elapsed < self.window {
                    entry.count = entry.count.saturating_add(1);
                    if entry.count > self.max_repeats {
                        GuardVerdict::Blocked { repeats: entry.count }
                    } else {
                        GuardVerdict::Allowed
                    }
                } else {
                    entry.count = 1;
                    GuardVerdict::Allowed
                }
            }
        };

        let retention = self.retention;
        table.retain(|_, fp| now.saturating_duration_since(fp.last_seen) <= retention);

        verdict
    }

    /// Number of live fingerprints.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
