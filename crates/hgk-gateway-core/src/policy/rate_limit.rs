// crates/hgk-gateway-core/src/policy/rate_limit.rs
// ============================================================================
// Module: Rate Limit Windows
// Description: Sliding-window request counters for named limiters.
// Purpose: Bound call volume per limiter without background timers.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`RateLimitWindow`] keeps the instants of recent admissions, oldest
//! first. Expired instants are evicted lazily whenever the window is touched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default limiter window.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// SECTION: Window
// ============================================================================

/// Sliding time window counter bound to one named limiter.
///
/// # Invariants
/// - After eviction at `now`, no stored instant is older than `now - window`.
/// - The queue never exceeds `max_count` entries.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    /// Maximum admissions per window.
    max_count: u32,
    /// Window length.
    window: Duration,
    /// Admission instants, oldest first.
    timestamps: VecDeque<Instant>,
}

impl RateLimitWindow {
    /// Creates an empty window.
    #[must_use]
    pub const fn new(max_count: u32, window: Duration) -> Self {
        Self {
            max_count,
            window,
            timestamps: VecDeque::new(),
        }
    }

    /// Creates a one-minute window admitting `max_count` calls.
    #[must_use]
    pub const fn per_minute(max_count: u32) -> Self {
        Self::new(max_count, DEFAULT_RATE_LIMIT_WINDOW)
    }

    /// Returns the admission ceiling.
    #[must_use]
    pub const fn max_count(&self) -> u32 {
        self.max_count
    }

    /// Returns the window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Admits and records a call now, or refuses when the window is full.
    pub fn check_and_record(&mut self) -> bool {
        self.check_and_record_at(Instant::now())
    }

    /// Admits and records a call at `now`, or refuses when the window is full.
    pub fn check_and_record_at(&mut self, now: Instant) -> bool {
        self.evict_expired(now);
        if self.is_full() {
            return false;
        }
        self.record(now);
        true
    }

    /// Returns the unused budget at `now`.
    pub fn remaining_at(&mut self, now: Instant) -> u32 {
        self.evict_expired(now);
        let used = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);
        self.max_count.saturating_sub(used)
    }

    /// Drops instants that fell out of the window.
    pub(crate) fn evict_expired(&mut self, now: Instant) {
        while self
            .timestamps
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) > self.window)
        {
            self.timestamps.pop_front();
        }
    }

    /// Returns true when no further call fits in the window.
    pub(crate) fn is_full(&self) -> bool {
        self.timestamps.len() >= usize::try_from(self.max_count).unwrap_or(usize::MAX)
    }

    /// Records an admission without checking capacity.
    pub(crate) fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
    }
}
