//! Time-window reads over relations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Relation, Snapshot};
use crate::types::Fact;

/// Inclusive time range; a missing bound is open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: None,
        }
    }

    pub fn until(to: DateTime<Utc>) -> Self {
        Self {
            from: None,
            to: Some(to),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from) && self.to.map_or(true, |to| timestamp <= to)
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from > to)
    }
}

impl Relation {
    /// Facts inside `window`, oldest first.
    ///
    /// Binary search when arrival order is also time order, a scan otherwise.
    pub fn windowed(&self, window: &TimeWindow) -> Vec<Arc<Fact>> {
        if window.is_empty() {
            return Vec::new();
        }
        let facts = self.facts();
        if !self.is_time_ordered() {
            return facts
                .iter()
                .filter(|f| window.contains(f.timestamp))
                .cloned()
                .collect();
        }

        let start = match window.from {
            Some(from) => facts.partition_point(|f| f.timestamp < from),
            None => 0,
        };
        let end = match window.to {
            Some(to) => facts.partition_point(|f| f.timestamp <= to),
            None => facts.len(),
        };
        if start >= end {
            return Vec::new();
        }
        facts.range(start..end).cloned().collect()
    }
}

impl Snapshot {
    /// Facts of `predicate` inside `window`, oldest first.
    pub fn windowed(&self, predicate: &str, window: &TimeWindow) -> Vec<Arc<Fact>> {
        self.relation(predicate)
            .map(|r| r.windowed(window))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;
    use crate::store::FactStore;
    use crate::types::FactInput;
    use crate::value::Value;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn store_with(times: &[i64]) -> FactStore {
        let store = FactStore::new(64, Vec::new());
        let facts = times
            .iter()
            .map(|t| FactInput::new("tick", vec![Value::Int(*t)]).at(at(*t)));
        store.push(facts, &RuleSet::default());
        store
    }

    fn ticks(facts: &[Arc<Fact>]) -> Vec<Value> {
        facts.iter().map(|f| f.args[0].clone()).collect()
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let store = store_with(&[1, 2, 3, 4, 5]);
        let snapshot = store.snapshot();
        let hits = snapshot.windowed("tick", &TimeWindow::between(at(2), at(4)));
        assert_eq!(ticks(&hits), vec![Value::Int(2), Value::Int(3), Value::Int(4)]);
    }

    #[test]
    fn test_open_bounds() {
        let store = store_with(&[1, 2, 3]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.windowed("tick", &TimeWindow::since(at(2))).len(), 2);
        assert_eq!(snapshot.windowed("tick", &TimeWindow::until(at(2))).len(), 2);
        assert_eq!(snapshot.windowed("tick", &TimeWindow::default()).len(), 3);
        assert!(snapshot.windowed("missing", &TimeWindow::default()).is_empty());
    }

    #[test]
    fn test_inverted_window_is_empty() {
        let store = store_with(&[1, 2, 3]);
        let window = TimeWindow::between(at(3), at(1));
        assert!(store.snapshot().windowed("tick", &window).is_empty());
    }

    #[test]
    fn test_out_of_order_arrivals_fall_back_to_scan() {
        let store = store_with(&[5, 1, 4, 2, 3]);
        let snapshot = store.snapshot();
        let hits = snapshot.windowed("tick", &TimeWindow::between(at(2), at(4)));
        assert_eq!(ticks(&hits), vec![Value::Int(4), Value::Int(2), Value::Int(3)]);
    }
}
