//! Per-node probe history and the health classification derived from it.

use std::collections::VecDeque;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::config::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    /// Not enough samples to fill the window yet.
    Pending,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Pending => "PENDING",
            HealthState::Healthy => "HEALTHY",
            HealthState::Unhealthy => "UNHEALTHY",
        };
        f.write_str(s)
    }
}

/// One recorded probe result. Serialized as 0 (pass) or 1 (fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Pass,
    Fail,
}

impl Sample {
    pub fn bit(self) -> u8 {
        match self {
            Sample::Pass => 0,
            Sample::Fail => 1,
        }
    }

    fn glyph(self) -> char {
        match self {
            Sample::Pass => '+',
            Sample::Fail => '-',
        }
    }
}

impl Serialize for Sample {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.bit())
    }
}

/// Bounded, oldest-first ring of samples.
#[derive(Debug, Clone)]
pub struct HealthHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl HealthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: Sample) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    /// The newest `size` samples, oldest first.
    pub fn window(&self, size: usize) -> impl Iterator<Item = Sample> + '_ {
        self.samples
            .iter()
            .skip(self.samples.len().saturating_sub(size))
            .copied()
    }

    /// `+` for each pass, `-` for each failure.
    pub fn render(&self) -> String {
        self.samples.iter().map(|s| s.glyph()).collect()
    }
}

/// Classify a node from the newest `window_size` samples.
pub fn classify(history: &HealthHistory, cfg: &HealthConfig) -> HealthState {
    if history.len() < cfg.window_size {
        return HealthState::Pending;
    }

    let failures = history
        .window(cfg.window_size)
        .filter(|s| *s == Sample::Fail)
        .count();
    if failures >= cfg.unhealthy_threshold {
        HealthState::Unhealthy
    } else {
        HealthState::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(window_size: usize, history_size: usize, unhealthy_threshold: usize) -> HealthConfig {
        HealthConfig {
            window_size,
            history_size,
            unhealthy_threshold,
        }
    }

    fn history(bits: &[u8], capacity: usize) -> HealthHistory {
        let mut h = HealthHistory::new(capacity);
        for b in bits {
            h.push(if *b == 0 { Sample::Pass } else { Sample::Fail });
        }
        h
    }

    #[test]
    fn test_short_history_is_pending() {
        let c = cfg(5, 10, 3);
        assert_eq!(classify(&history(&[], 10), &c), HealthState::Pending);
        assert_eq!(classify(&history(&[1, 1, 1, 1], 10), &c), HealthState::Pending);
        assert_eq!(classify(&history(&[0, 0, 0, 0], 10), &c), HealthState::Pending);
    }

    #[test]
    fn test_threshold_boundary() {
        let c = cfg(5, 5, 3);
        assert_eq!(classify(&history(&[1, 0, 1, 0, 0], 5), &c), HealthState::Healthy);
        assert_eq!(classify(&history(&[1, 0, 1, 0, 1], 5), &c), HealthState::Unhealthy);
    }

    #[test]
    fn test_only_window_counts() {
        // Old failures outside the window are kept for display but ignored
        let c = cfg(3, 6, 2);
        let h = history(&[1, 1, 1, 0, 0, 1], 6);
        assert_eq!(classify(&h, &c), HealthState::Healthy);
        assert_eq!(h.render(), "---++-");
    }

    #[test]
    fn test_capacity_keeps_newest() {
        let h = history(&[1, 1, 0, 0, 1, 0, 1], 4);
        assert_eq!(h.len(), 4);
        assert_eq!(
            h.samples(),
            vec![Sample::Pass, Sample::Fail, Sample::Pass, Sample::Fail]
        );
    }

    #[test]
    fn test_sliding_into_unhealthy() {
        let c = cfg(5, 5, 3);
        let mut h = history(&[0, 0, 0, 0, 0], 5);
        assert_eq!(classify(&h, &c), HealthState::Healthy);

        let mut states = Vec::new();
        for _ in 0..3 {
            h.push(Sample::Fail);
            states.push(classify(&h, &c));
        }
        assert_eq!(
            states,
            vec![HealthState::Healthy, HealthState::Healthy, HealthState::Unhealthy]
        );
        assert_eq!(h.render(), "++---");
    }

    #[test]
    fn test_sample_serializes_as_bit() {
        let json = serde_json::to_string(&history(&[0, 1], 4).samples()).unwrap();
        assert_eq!(json, "[0,1]");
        assert_eq!(serde_json::to_string(&HealthState::Pending).unwrap(), "\"PENDING\"");
    }
}
