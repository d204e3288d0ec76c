//! Step-indexed storage of player inputs
//!
//! The aggregator is passive: it records every data packet against its step
//! and never decides whether a step is complete. Relaying happens for every
//! received packet regardless of how many players have reported.

use log::debug;
use serde_json::Value;
use shared::{PlayerId, StepIndex};
use std::collections::{BTreeMap, HashMap};

/// Inputs received for one simulation step
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub index: StepIndex,
    /// Number of data packets observed for this step, duplicates included
    pub received: u32,
    /// Latest payload per contributing player
    pub inputs: HashMap<PlayerId, Value>,
}

/// Per-step input history with a bounded retention window
///
/// When a limit is set, at most that many distinct steps are kept and the
/// lowest step index is evicted first.
#[derive(Debug)]
pub struct StepAggregator {
    steps: BTreeMap<StepIndex, Step>,
    retention: Option<usize>,
}

impl StepAggregator {
    /// Creates an aggregator; `None` keeps every step for the process lifetime
    pub fn new(retention: Option<usize>) -> Self {
        Self {
            steps: BTreeMap::new(),
            retention: retention.filter(|limit| *limit > 0),
        }
    }

    /// Records a player's payload for a step and returns the step's packet count
    pub fn record(&mut self, index: StepIndex, player: PlayerId, payload: Value) -> u32 {
        let step = self.steps.entry(index).or_insert_with(|| Step {
            index,
            received: 0,
            inputs: HashMap::new(),
        });
        step.received = step.received.saturating_add(1);
        step.inputs.insert(player, payload);
        let received = step.received;

        self.evict();
        received
    }

    pub fn get(&self, index: StepIndex) -> Option<&Step> {
        self.steps.get(&index)
    }

    /// Lowest retained step index
    pub fn oldest(&self) -> Option<StepIndex> {
        self.steps.keys().next().copied()
    }

    /// Highest retained step index
    pub fn newest(&self) -> Option<StepIndex> {
        self.steps.keys().next_back().copied()
    }

    pub fn retention(&self) -> Option<usize> {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn evict(&mut self) {
        let Some(limit) = self.retention else {
            return;
        };
        while self.steps.len() > limit {
            if let Some((index, _)) = self.steps.pop_first() {
                debug!("Evicted step {}", index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_received_count_saturates() {
        let mut steps = StepAggregator::new(None);
        steps.record(9, 0, json!(1));
        steps.steps.get_mut(&9).unwrap().received = u32::MAX - 1;

        assert_eq!(steps.record(9, 1, json!(2)), u32::MAX);
        assert_eq!(steps.record(9, 2, json!(3)), u32::MAX);
        assert_eq!(steps.get(9).unwrap().received, u32::MAX);
        assert_eq!(steps.get(9).unwrap().inputs.len(), 3);
    }

    #[test]
    fn test_first_packet_creates_step() {
        let mut steps = StepAggregator::new(None);

        let received = steps.record(5, 0, json!("P"));

        assert_eq!(received, 1);
        let step = steps.get(5).unwrap();
        assert_eq!(step.index, 5);
        assert_eq!(step.received, 1);
        assert_eq!(step.inputs.len(), 1);
        assert_eq!(step.inputs[&0], json!("P"));
    }

    #[test]
    fn test_multiple_players_same_step() {
        let mut steps = StepAggregator::new(None);

        steps.record(1, 0, json!({"left": true}));
        steps.record(1, 1, json!({"left": false}));

        let step = steps.get(1).unwrap();
        assert_eq!(step.received, 2);
        assert_eq!(step.inputs[&0], json!({"left": true}));
        assert_eq!(step.inputs[&1], json!({"left": false}));
    }

    #[test]
    fn test_count_includes_duplicates() {
        let mut steps = StepAggregator::new(None);

        steps.record(3, 0, json!(1));
        steps.record(3, 0, json!(2));
        let received = steps.record(3, 0, json!(3));

        let step = steps.get(3).unwrap();
        assert_eq!(received, 3);
        assert_eq!(step.received, 3);
        assert_eq!(step.inputs.len(), 1);
        assert_eq!(step.inputs[&0], json!(3));
    }

    #[test]
    fn test_steps_are_independent() {
        let mut steps = StepAggregator::new(None);

        steps.record(1, 0, json!("a"));
        steps.record(2, 0, json!("b"));

        assert_eq!(steps.len(), 2);
        assert_eq!(steps.get(1).unwrap().received, 1);
        assert_eq!(steps.get(2).unwrap().received, 1);
        assert!(steps.get(3).is_none());
    }

    #[test]
    fn test_unbounded_keeps_everything() {
        let mut steps = StepAggregator::new(None);
        for index in 0..5000 {
            steps.record(index, 0, json!(index));
        }
        assert_eq!(steps.len(), 5000);
        assert_eq!(steps.oldest(), Some(0));
        assert_eq!(steps.newest(), Some(4999));
    }

    #[test]
    fn test_zero_retention_is_unbounded() {
        let steps = StepAggregator::new(Some(0));
        assert_eq!(steps.retention(), None);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let mut steps = StepAggregator::new(Some(3));
        for index in 10..15 {
            steps.record(index, 0, json!(index));
        }

        assert_eq!(steps.len(), 3);
        assert_eq!(steps.oldest(), Some(12));
        assert_eq!(steps.newest(), Some(14));
        assert!(steps.get(10).is_none());
        assert!(steps.get(11).is_none());
    }

    #[test]
    fn test_late_step_below_window_is_not_retained() {
        let mut steps = StepAggregator::new(Some(2));
        steps.record(10, 0, json!("a"));
        steps.record(11, 0, json!("b"));

        let received = steps.record(3, 1, json!("late"));

        assert_eq!(received, 1);
        assert!(steps.get(3).is_none());
        assert_eq!(steps.oldest(), Some(10));
    }

    #[test]
    fn test_updating_retained_step_does_not_evict() {
        let mut steps = StepAggregator::new(Some(2));
        steps.record(1, 0, json!("a"));
        steps.record(2, 0, json!("b"));
        steps.record(1, 1, json!("c"));

        assert_eq!(steps.len(), 2);
        assert_eq!(steps.get(1).unwrap().received, 2);
    }
}
