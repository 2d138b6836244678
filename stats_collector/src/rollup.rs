//! Rollup of minute summaries into the hour and day windows.

use std::collections::VecDeque;

use resources::objects::metrics::{Percentiles, Usage};

use crate::percentile;

/// Minute summaries retained per node.
const MINUTES_PER_HOUR: usize = 60;
/// Hour summaries retained per node.
const HOURS_PER_DAY: usize = 24;

/// Ring buffers of past window summaries for one node.
///
/// Every successful minute poll is pushed here; each 60th push closes the
/// minute ring into an hour summary. The longer windows are reduced on
/// demand, so an evicted node's history simply drops with it.
#[derive(Debug, Default)]
pub struct NodeHistory {
    minutes: VecDeque<Usage>,
    hours: VecDeque<Usage>,
    minute_pushes: u64,
}

impl NodeHistory {
    pub fn push_minute(&mut self, usage: Usage) {
        self.minutes.push_back(usage);
        if self.minutes.len() > MINUTES_PER_HOUR {
            self.minutes.pop_front();
        }
        self.minute_pushes += 1;
        if self.minute_pushes % MINUTES_PER_HOUR as u64 == 0 {
            let hour = reduce_windows(self.minutes.iter());
            self.hours.push_back(hour);
            if self.hours.len() > HOURS_PER_DAY {
                self.hours.pop_front();
            }
        }
    }

    /// Usage over the trailing hour, invalid until a minute summary exists.
    pub fn hour_usage(&self) -> Usage {
        reduce_windows(self.minutes.iter())
    }

    /// Usage over the trailing day, invalid until a full hour has closed.
    pub fn day_usage(&self) -> Usage {
        reduce_windows(self.hours.iter())
    }
}

/// Combine window summaries: means average out, maxes keep the peak, and the
/// ninety track is re-ranked across member windows.
fn reduce_windows<'a>(windows: impl Iterator<Item = &'a Usage>) -> Usage {
    let mut cpu = Percentiles::default();
    let mut memory = Percentiles::default();
    let mut cpu_mean = 0.0;
    let mut memory_mean = 0.0;
    let mut cpu_nineties = Vec::new();
    let mut memory_nineties = Vec::new();
    let mut count = 0u64;

    for window in windows {
        count += 1;
        cpu.max = cpu.max.max(window.cpu.max);
        memory.max = memory.max.max(window.memory.max);
        cpu_mean = percentile::add_to_mean(cpu_mean, window.cpu.mean, count);
        memory_mean = percentile::add_to_mean(memory_mean, window.memory.mean, count);
        cpu_nineties.push(window.cpu.ninety);
        memory_nineties.push(window.memory.ninety);
    }
    if count == 0 {
        return Usage::default();
    }

    cpu.mean = cpu_mean as u64;
    memory.mean = memory_mean as u64;
    cpu.ninety = percentile::ninety_percentile(&mut cpu_nineties);
    memory.ninety = percentile::ninety_percentile(&mut memory_nineties);
    Usage {
        valid: true,
        cpu,
        memory,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minute(mean: u64, max: u64, ninety: u64) -> Usage {
        Usage {
            valid: true,
            cpu: Percentiles {
                mean,
                max,
                ninety,
            },
            memory: Percentiles {
                mean: mean * 1024,
                max: max * 1024,
                ninety: ninety * 1024,
            },
        }
    }

    #[test]
    fn empty_history_is_invalid() {
        let history = NodeHistory::default();
        assert!(!history.hour_usage().valid);
        assert!(!history.day_usage().valid);
    }

    #[test]
    fn hour_reduces_over_minutes() {
        let mut history = NodeHistory::default();
        history.push_minute(minute(10, 100, 50));
        history.push_minute(minute(30, 400, 70));
        let hour = history.hour_usage();
        assert!(hour.valid);
        assert_eq!(hour.cpu.mean, 20);
        assert_eq!(hour.cpu.max, 400);
        // Day only opens once a full hour has closed.
        assert!(!history.day_usage().valid);
    }

    #[test]
    fn minute_ring_is_bounded() {
        let mut history = NodeHistory::default();
        for i in 0..90 {
            history.push_minute(minute(i, i, i));
        }
        assert_eq!(history.minutes.len(), MINUTES_PER_HOUR);
        // Push 60 closed one hour summary.
        assert_eq!(history.hours.len(), 1);
        assert!(history.day_usage().valid);
    }

    #[test]
    fn summary_ordering_holds() {
        let mut history = NodeHistory::default();
        for i in 0..10 {
            history.push_minute(minute(10 + i, 200 + i, 90 + i));
        }
        let hour = history.hour_usage();
        assert!(hour.cpu.mean <= hour.cpu.ninety && hour.cpu.ninety <= hour.cpu.max);
    }
}
