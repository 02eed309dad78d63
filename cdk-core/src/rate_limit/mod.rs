//! Per-caller request throttling.
//!
//! Sliding-window counters keyed by `(action, caller key)`, where the caller
//! key is the authenticated identity or, when there is none, the network
//! origin. Each action has its own budget, so exhausting one action never
//! blocks another action or another caller.
//!
//! State is process-local. A fleet of N instances admits up to N times the
//! nominal budget.
//!
//! Authenticated callers and bare network origins live in separate tables.
//! Idle windows in both are swept every `cleanup_interval` checks. Only the
//! origin table is capped at `max_tracked_keys`: once it is full a new origin
//! forces a sweep and is rejected if there is still no room. Authenticated
//! callers come from the key file, so their table is bounded by it and never
//! refuses a caller for lack of room.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CreateBatch,
    Redeem,
    Verify,
    /// Read-only operator and history lookups.
    Query,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateBatch => "create_batch",
            Action::Redeem => "redeem",
            Action::Verify => "verify",
            Action::Query => "query",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who an attempt is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerKey<'a> {
    User(&'a str),
    Origin(&'a str),
}

impl fmt::Display for CallerKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallerKey::User(id) => write!(f, "user:{id}"),
            CallerKey::Origin(origin) => write!(f, "origin:{origin}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_requests: u32,
    pub window: Duration,
}

impl Budget {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub create_batch: Budget,
    pub redeem: Budget,
    pub verify: Budget,
    pub query: Budget,
    /// Sweep idle windows every N checks.
    pub cleanup_interval: u64,
    /// Cap on windows held for unauthenticated origins.
    pub max_tracked_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            create_batch: Budget::per_minute(10),
            redeem: Budget::per_minute(20),
            verify: Budget::per_minute(30),
            query: Budget::per_minute(60),
            cleanup_interval: 100,
            max_tracked_keys: 10_000,
        }
    }
}

impl RateLimitConfig {
    pub fn budget(&self, action: Action) -> Budget {
        match action {
            Action::CreateBatch => self.create_batch,
            Action::Redeem => self.redeem,
            Action::Verify => self.verify,
            Action::Query => self.query,
        }
    }
}

type WindowKey = (Action, String);

/// One table of sliding windows. `tracked` counts entries and is only
/// raised through `try_reserve`, so a capped table never exceeds its cap.
struct WindowTable {
    windows: DashMap<WindowKey, VecDeque<Instant>>,
    tracked: AtomicUsize,
    capacity: Option<usize>,
}

impl WindowTable {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            windows: DashMap::new(),
            tracked: AtomicUsize::new(0),
            capacity,
        }
    }

    fn try_reserve(&self) -> bool {
        match self.capacity {
            None => {
                self.tracked.fetch_add(1, Ordering::SeqCst);
                true
            }
            Some(cap) => self
                .tracked
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < cap).then_some(n + 1))
                .is_ok(),
        }
    }

    fn release(&self) {
        self.tracked.fetch_sub(1, Ordering::SeqCst);
    }

    fn len(&self) -> usize {
        self.tracked.load(Ordering::SeqCst)
    }

    fn sweep(&self, config: &RateLimitConfig, now: Instant) -> usize {
        let mut removed = 0;
        self.windows.retain(|(action, _), window| {
            let budget = config.budget(*action);
            let live = window
                .back()
                .is_some_and(|last| now.duration_since(*last) < budget.window);
            if !live {
                removed += 1;
            }
            live
        });
        self.tracked.fetch_sub(removed, Ordering::SeqCst);
        removed
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    users: WindowTable,
    origins: WindowTable,
    request_count: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let origin_cap = config.max_tracked_keys;
        Self {
            config,
            users: WindowTable::new(None),
            origins: WindowTable::new(Some(origin_cap)),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Records one attempt of `action` by `key`, or fails with
    /// `Error::RateLimited` if the budget for that pair is spent.
    pub fn check(&self, action: Action, key: CallerKey<'_>) -> Result<(), Error> {
        self.check_at(action, key, Instant::now())
    }

    pub fn check_at(&self, action: Action, key: CallerKey<'_>, now: Instant) -> Result<(), Error> {
        let budget = self.config.budget(action);

        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && self.config.cleanup_interval > 0 && count % self.config.cleanup_interval == 0 {
            debug!(request_count = count, "running periodic rate limiter cleanup");
            self.cleanup(now);
        }

        let (table, id) = match key {
            CallerKey::User(id) => (&self.users, id),
            CallerKey::Origin(origin) => (&self.origins, origin),
        };
        let map_key = (action, id.to_string());

        // Reserve before taking the entry: a sweep cannot run while a shard
        // lock is held.
        let mut reserved = false;
        if !table.windows.contains_key(&map_key) {
            if !table.try_reserve() {
                self.cleanup(now);
                if !table.try_reserve() {
                    return Err(self.at_capacity(action, key, budget));
                }
            }
            reserved = true;
        }

        let mut entry = match table.windows.entry(map_key) {
            Entry::Occupied(occupied) => {
                if reserved {
                    table.release();
                }
                occupied.into_ref()
            }
            Entry::Vacant(vacant) => {
                // Swept between the lookup and the entry.
                if !reserved && !table.try_reserve() {
                    drop(vacant);
                    return Err(self.at_capacity(action, key, budget));
                }
                vacant.insert(VecDeque::new())
            }
        };
        let window = entry.value_mut();

        while let Some(&oldest) = window.front() {
            if now.duration_since(oldest) >= budget.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= budget.max_requests as usize {
            let retry_after = window
                .front()
                .map(|oldest| budget.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(budget.window);
            let retry_after_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            warn!(
                action = %action,
                key = %key,
                requests = window.len(),
                max = budget.max_requests,
                "rate limit exceeded"
            );
            return Err(Error::RateLimited {
                action: action.to_string(),
                retry_after_secs: retry_after_secs.max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Drops windows with no attempt inside their budget window.
    pub fn cleanup(&self, now: Instant) {
        let removed = self.users.sweep(&self.config, now) + self.origins.sweep(&self.config, now);
        if removed > 0 {
            debug!(removed, remaining = self.tracked_keys(), "rate limiter cleanup");
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.users.len() + self.origins.len()
    }

    pub fn tracked_origins(&self) -> usize {
        self.origins.len()
    }

    fn at_capacity(&self, action: Action, key: CallerKey<'_>, budget: Budget) -> Error {
        warn!(
            action = %action,
            key = %key,
            tracked = self.origins.len(),
            "rate limiter at origin capacity, rejecting new origin"
        );
        Error::RateLimited {
            action: action.to_string(),
            retry_after_secs: budget.window.as_secs().max(1),
        }
    }
}
