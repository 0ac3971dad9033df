// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Moving average of the fraction of traces the writer managed to keep.

use std::collections::VecDeque;

/// Number of individual trace outcomes remembered by default.
pub const DEFAULT_WINDOW: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    kept: bool,
    count: u64,
}

/// Bounded window of trace outcomes, oldest first.
///
/// Outcomes are stored as runs so that recording a cycle costs the same no
/// matter how many traces it covers. The tracker is owned by the worker and
/// only updated from the flush cycle; readers see the rate as it was after the
/// previous cycle.
#[derive(Debug, Clone)]
pub struct KeepRateTracker {
    window: u64,
    runs: VecDeque<Run>,
    kept: u64,
    dropped: u64,
}

impl Default for KeepRateTracker {
    fn default() -> Self {
        KeepRateTracker::new(DEFAULT_WINDOW)
    }
}

impl KeepRateTracker {
    /// A `window` of zero is treated as one.
    pub fn new(window: u64) -> Self {
        KeepRateTracker {
            window: window.max(1),
            runs: VecDeque::new(),
            kept: 0,
            dropped: 0,
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Fraction of remembered traces that were kept, `1.0` without history.
    pub fn snapshot(&self) -> f64 {
        let total = self.kept + self.dropped;
        if total == 0 {
            return 1.0;
        }
        self.kept as f64 / total as f64
    }

    pub fn drop_rate(&self) -> f64 {
        1.0 - self.snapshot()
    }

    /// Folds one cycle's outcomes into the window. Kept traces are recorded
    /// before dropped ones.
    pub fn record_cycle(&mut self, accepted: u64, dropped: u64) {
        if accepted == 0 && dropped == 0 {
            return;
        }
        self.push(true, accepted);
        self.push(false, dropped);
        self.evict();
    }

    fn push(&mut self, kept: bool, count: u64) {
        if count == 0 {
            return;
        }
        // Anything older than the window is evicted right away.
        let count = count.min(self.window);
        if kept {
            self.kept += count;
        } else {
            self.dropped += count;
        }
        match self.runs.back_mut() {
            Some(last) if last.kept == kept => last.count += count,
            _ => self.runs.push_back(Run { kept, count }),
        }
    }

    fn evict(&mut self) {
        let mut excess = (self.kept + self.dropped).saturating_sub(self.window);
        while excess > 0 {
            let Some(front) = self.runs.front_mut() else {
                break;
            };
            let n = front.count.min(excess);
            front.count -= n;
            excess -= n;
            if front.kept {
                self.kept -= n;
            } else {
                self.dropped -= n;
            }
            if front.count == 0 {
                self.runs.pop_front();
            }
        }
    }
}
