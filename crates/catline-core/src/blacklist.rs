use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

// ============== Failure Blacklist ==============

/// Past this many tracked hosts, recording a failure for a new host first
/// sweeps entries that no longer matter.
const SWEEP_AT: usize = 4096;

#[derive(Clone, Debug)]
struct Entry {
    failures: u32,
    last_failure: Instant,
    blocked_until: Option<Instant>,
}

impl Entry {
    fn fresh(now: Instant) -> Self {
        Self {
            failures: 0,
            last_failure: now,
            blocked_until: None,
        }
    }

    /// An elapsed block, or a sub-threshold count idle for a whole block time.
    fn is_stale(&self, now: Instant, idle: Duration) -> bool {
        match self.blocked_until {
            Some(until) => now >= until,
            None => now.saturating_duration_since(self.last_failure) >= idle,
        }
    }
}

/// Per-host failure counter with a timed block.
///
/// Expiry is lazy: a block is only cleared when `on_list` (or `register`)
/// observes that it has elapsed. The map is swept only when it grows past
/// [`SWEEP_AT`] hosts.
#[derive(Clone, Debug)]
pub struct Blacklist {
    fail_max: u32,
    block_time: Duration,
    sweep_at: usize,
    entries: HashMap<String, Entry>,
}

impl Blacklist {
    pub fn new(fail_max: u32, block_time: Duration) -> Self {
        Self {
            fail_max: fail_max.max(1),
            block_time,
            sweep_at: SWEEP_AT,
            entries: HashMap::new(),
        }
    }

    pub fn on_list(&mut self, host: &str) -> bool {
        self.on_list_at(host, Instant::now())
    }

    pub fn on_list_at(&mut self, host: &str, now: Instant) -> bool {
        let Some(blocked_until) = self.entries.get(host).map(|e| e.blocked_until) else {
            return false;
        };

        match blocked_until {
            Some(until) if now < until => true,
            Some(_) => {
                self.entries.remove(host);
                false
            }
            None => false,
        }
    }

    pub fn register(&mut self, host: &str, success: bool) {
        self.register_at(host, success, Instant::now())
    }

    pub fn register_at(&mut self, host: &str, success: bool, now: Instant) {
        if success {
            self.entries.remove(host);
            return;
        }

        if self.entries.len() >= self.sweep_at && !self.entries.contains_key(host) {
            self.sweep(now);
        }

        let entry = self
            .entries
            .entry(host.to_string())
            .or_insert_with(|| Entry::fresh(now));
        let blocked_until = entry.blocked_until;
        match blocked_until {
            // Already blocked: the caller should have refused the peer. Extend nothing.
            Some(until) if now < until => return,
            Some(_) => *entry = Entry::fresh(now),
            None => {}
        }

        entry.failures = entry.failures.saturating_add(1);
        entry.last_failure = now;
        if entry.failures >= self.fail_max {
            entry.blocked_until = Some(now + self.block_time);
        }
    }

    fn sweep(&mut self, now: Instant) {
        let before = self.entries.len();
        let idle = self.block_time;
        self.entries.retain(|_, e| !e.is_stale(now, idle));
        tracing::debug!(
            removed = before - self.entries.len(),
            kept = self.entries.len(),
            "swept blacklist"
        );
    }
}
