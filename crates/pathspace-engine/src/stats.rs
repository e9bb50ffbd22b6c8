//! Per-subtree search statistics.

use crate::verdict::VerificationStatus;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

/// Leaf counts per verdict bucket plus named realization counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsCounter {
    statuses: [usize; 3],
    ignored: usize,
    realizations: BTreeMap<String, usize>,
}

fn bucket(status: VerificationStatus) -> usize {
    match status {
        VerificationStatus::Refuted => 0,
        VerificationStatus::Unknown => 1,
        VerificationStatus::Confirmed => 2,
    }
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a single leaf with the given status.
    pub fn leaf(status: Option<VerificationStatus>) -> Self {
        let mut stats = Self::new();
        stats.record(status);
        stats
    }

    pub fn record(&mut self, status: Option<VerificationStatus>) {
        match status {
            Some(status) => self.statuses[bucket(status)] += 1,
            None => self.ignored += 1,
        }
    }

    pub fn count(&self, status: VerificationStatus) -> usize {
        self.statuses[bucket(status)]
    }

    /// Leaves whose path was void.
    pub fn ignored(&self) -> usize {
        self.ignored
    }

    pub fn iterations(&self) -> usize {
        self.statuses.iter().sum::<usize>() + self.ignored
    }

    pub fn unknown_pct(&self) -> f64 {
        self.count(VerificationStatus::Unknown) as f64 / (self.iterations() + 1) as f64
    }

    pub fn realizations(&self, key: &str) -> usize {
        self.realizations.get(key).copied().unwrap_or(0)
    }

    pub fn set_realizations(&mut self, key: impl Into<String>, count: usize) {
        self.realizations.insert(key.into(), count);
    }

    pub fn realization_keys(&self) -> impl Iterator<Item = (&str, usize)> {
        self.realizations.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Only the verdict buckets, dropping realization counters.
    pub fn statuses_only(&self) -> Self {
        Self {
            statuses: self.statuses,
            ignored: self.ignored,
            realizations: BTreeMap::new(),
        }
    }
}

impl AddAssign<&StatsCounter> for StatsCounter {
    fn add_assign(&mut self, other: &StatsCounter) {
        for (mine, theirs) in self.statuses.iter_mut().zip(other.statuses) {
            *mine += theirs;
        }
        self.ignored += other.ignored;
        for (key, count) in &other.realizations {
            *self.realizations.entry(key.clone()).or_insert(0) += count;
        }
    }
}

impl Add for StatsCounter {
    type Output = StatsCounter;

    fn add(mut self, other: StatsCounter) -> StatsCounter {
        self += &other;
        self
    }
}

impl fmt::Display for StatsCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "refuted={} unknown={} confirmed={} ignored={}",
            self.count(VerificationStatus::Refuted),
            self.count(VerificationStatus::Unknown),
            self.count(VerificationStatus::Confirmed),
            self.ignored
        )
    }
}
