// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::{CallFrame, SearchResultItem};

/// One handled pause: the call stack and what the heap search found there.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Call stack at the pause, innermost first
    pub call_frames: Vec<CallFrame>,
    /// Heap matches at the pause
    pub matches: Vec<SearchResultItem>,
}

/// Decision taken after recording a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepVerdict {
    /// Keep stepping
    Continue {
        /// The target appeared for the first time at this step
        match_found: bool,
        /// The target is present and the tolerance window is filling up
        finalising: bool,
    },
    /// Stop and report
    Found,
}

/// Step bookkeeping of a BDHS run, free of any I/O.
#[derive(Debug, Clone)]
pub struct StepTracker {
    tolerance_before: usize,
    tolerance_after: usize,
    max_steps: usize,
    idle_tick_limit: usize,
    step: usize,
    idle_ticks: usize,
    first_match_index: Option<usize>,
    history: Vec<HistoryEntry>,
}

impl StepTracker {
    /// Creates a tracker for a fresh run.
    pub fn new(tolerance_before: usize, tolerance_after: usize, max_steps: usize, idle_tick_limit: usize) -> Self {
        Self {
            tolerance_before,
            tolerance_after,
            max_steps,
            idle_tick_limit,
            step: 0,
            idle_ticks: 0,
            first_match_index: None,
            history: Vec::new(),
        }
    }

    /// Counts a pause. Returns the new step number.
    pub fn on_pause(&mut self) -> usize {
        self.step += 1;
        self.idle_ticks = 0;
        self.step
    }

    /// Whether the current step is past the budget.
    pub fn budget_exceeded(&self) -> bool {
        self.step > self.max_steps
    }

    /// Appends a pause to the history and applies the match policy.
    ///
    /// A run is found once the target vanishes after having appeared, or once it has stayed
    /// for more than `tolerance_after` steps past its first appearance.
    pub fn record(&mut self, call_frames: Vec<CallFrame>, matches: Vec<SearchResultItem>) -> StepVerdict {
        let has_match = !matches.is_empty();
        self.history.push(HistoryEntry { call_frames, matches });
        let len = self.history.len();

        match (self.first_match_index, has_match) {
            (Some(_), false) => StepVerdict::Found,
            (None, true) => {
                self.first_match_index = Some(len - 1);
                StepVerdict::Continue { match_found: true, finalising: false }
            }
            (Some(first), true) if len - first - 1 <= self.tolerance_after => {
                StepVerdict::Continue { match_found: false, finalising: true }
            }
            (Some(_), true) => StepVerdict::Found,
            (None, false) => StepVerdict::Continue { match_found: false, finalising: false },
        }
    }

    /// Counts an interval tick. Returns `true` when the run has been idle long enough to stop.
    ///
    /// Ticks outside the idle state reset the counter.
    pub fn tick(&mut self, idle: bool) -> bool {
        if !idle {
            self.idle_ticks = 0;
            return false;
        }
        if self.idle_ticks >= self.idle_tick_limit {
            return true;
        }
        self.idle_ticks += 1;
        false
    }

    /// History entries reported in a result, newest first with their index.
    pub fn window(&self) -> impl Iterator<Item = (usize, &HistoryEntry)> {
        let span = self.tolerance_before.saturating_add(self.tolerance_after).saturating_add(1);
        let stop = self.history.len().saturating_sub(span);
        self.history.iter().enumerate().skip(stop).rev()
    }

    /// Current step number.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Configured step budget.
    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// History index of the first pause where the target was present.
    pub fn first_match_index(&self) -> Option<usize> {
        self.first_match_index
    }

    /// Every recorded pause.
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsValue;

    fn hit() -> Vec<SearchResultItem> {
        vec![SearchResultItem {
            value: JsValue::Null,
            class_name: "Object".to_string(),
            class_annotations: Vec::new(),
            path: None,
            similarity: None,
            node_id: 1,
        }]
    }

    fn record(tracker: &mut StepTracker, found: bool) -> StepVerdict {
        tracker.on_pause();
        tracker.record(Vec::new(), if found { hit() } else { Vec::new() })
    }

    #[test]
    fn test_match_then_vanish() {
        let mut tracker = StepTracker::new(6, 2, 5000, 4);
        assert_eq!(record(&mut tracker, false), StepVerdict::Continue { match_found: false, finalising: false });
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: true, finalising: false });
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: false, finalising: true });
        assert_eq!(record(&mut tracker, false), StepVerdict::Found);
        assert_eq!(tracker.first_match_index(), Some(1));
        assert_eq!(tracker.history().len(), 4);
    }

    #[test]
    fn test_tolerance_window_closes() {
        let mut tracker = StepTracker::new(1, 2, 5000, 4);
        record(&mut tracker, false);
        record(&mut tracker, false);
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: true, finalising: false });
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: false, finalising: true });
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: false, finalising: true });
        assert_eq!(record(&mut tracker, true), StepVerdict::Found);

        // before + after + 1 = 4 entries out of 6, newest first.
        let indices: Vec<usize> = tracker.window().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![5, 4, 3, 2]);
    }

    #[test]
    fn test_unbounded_tolerances() {
        let mut tracker = StepTracker::new(usize::MAX, usize::MAX, 10, 4);
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: true, finalising: false });
        assert_eq!(record(&mut tracker, true), StepVerdict::Continue { match_found: false, finalising: true });
        assert_eq!(record(&mut tracker, false), StepVerdict::Found);

        let indices: Vec<usize> = tracker.window().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![2, 1, 0]);
    }

    #[test]
    fn test_step_budget() {
        let mut tracker = StepTracker::new(6, 15, 3, 4);
        for _ in 0..3 {
            tracker.on_pause();
            assert!(!tracker.budget_exceeded());
        }
        tracker.on_pause();
        assert!(tracker.budget_exceeded());
        assert_eq!(tracker.step(), 4);
    }

    #[test]
    fn test_idle_ticks() {
        let mut tracker = StepTracker::new(6, 15, 5000, 4);
        for _ in 0..4 {
            assert!(!tracker.tick(true));
        }
        assert!(tracker.tick(true));

        // Leaving idle or pausing resets the counter.
        let mut tracker = StepTracker::new(6, 15, 5000, 4);
        for _ in 0..3 {
            tracker.tick(true);
        }
        tracker.on_pause();
        for _ in 0..4 {
            assert!(!tracker.tick(true));
        }
        assert!(!tracker.tick(false));
        assert!(!tracker.tick(true));
    }
}
