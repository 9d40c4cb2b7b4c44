use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use super::mid::{Mid, ModuleType};
use crate::{CrawlError, CrawlResult};

/// Computes a module score from its counters. Lower is less loaded.
pub type ScoreCalculator = fn(&Counts) -> u64;

pub fn calculate_score_simple(counts: &Counts) -> u64 {
    counts.called
        + (counts.accepted << 1)
        + (counts.completed << 2)
        + (counts.handling << 4)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub called: u64,
    pub accepted: u64,
    pub completed: u64,
    pub handling: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub id: String,
    pub called: u64,
    pub accepted: u64,
    pub completed: u64,
    pub handling: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Identity, counters and score shared by every module implementation.
#[derive(Debug)]
pub struct ModuleBase {
    mid: Mid,
    module_type: ModuleType,
    calculator: ScoreCalculator,
    score: AtomicU64,
    called: AtomicU64,
    accepted: AtomicU64,
    completed: AtomicU64,
    handling: AtomicU64,
}

impl ModuleBase {
    pub fn new(mid: Mid, calculator: Option<ScoreCalculator>) -> CrawlResult<Self> {
        let module_type = mid.module_type()?;
        Ok(Self {
            mid,
            module_type,
            calculator: calculator.unwrap_or(calculate_score_simple),
            score: AtomicU64::new(0),
            called: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            handling: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &Mid {
        &self.mid
    }

    pub fn module_type(&self) -> ModuleType {
        self.module_type
    }

    pub fn score(&self) -> u64 {
        self.score.load(Ordering::SeqCst)
    }

    pub fn set_score(&self, score: u64) {
        self.score.store(score, Ordering::SeqCst);
    }

    /// Recomputes the score from the current counters and stores it.
    pub fn update_score(&self) -> u64 {
        let score = (self.calculator)(&self.counts());
        self.set_score(score);
        score
    }

    pub fn counts(&self) -> Counts {
        Counts {
            called: self.called.load(Ordering::SeqCst),
            accepted: self.accepted.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            handling: self.handling.load(Ordering::SeqCst),
        }
    }

    pub fn incr_called(&self) {
        self.called.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn handling_number(&self) -> u64 {
        self.handling.load(Ordering::SeqCst)
    }

    /// Counts one unit of work as in progress until the guard drops.
    pub fn start_handling(&self) -> HandlingGuard<'_> {
        self.handling.fetch_add(1, Ordering::SeqCst);
        HandlingGuard { base: self }
    }

    pub fn clear(&self) {
        for counter in [&self.called, &self.accepted, &self.completed, &self.handling] {
            counter.store(0, Ordering::SeqCst);
        }
        self.set_score(0);
    }

    pub fn summary(&self, extra: Option<Value>) -> ModuleSummary {
        let counts = self.counts();
        ModuleSummary {
            id: self.mid.to_string(),
            called: counts.called,
            accepted: counts.accepted,
            completed: counts.completed,
            handling: counts.handling,
            extra,
        }
    }

    pub(crate) fn expect_type(&self, module_type: ModuleType) -> CrawlResult<()> {
        if self.module_type != module_type {
            return Err(CrawlError::Argument(format!(
                "module {} is not a {}",
                self.mid, module_type
            )));
        }
        Ok(())
    }
}

pub struct HandlingGuard<'a> {
    base: &'a ModuleBase,
}

impl Drop for HandlingGuard<'_> {
    fn drop(&mut self) {
        self.base.handling.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Common surface of downloaders, analyzers and pipelines.
pub trait Module: Send + Sync {
    fn base(&self) -> &ModuleBase;

    fn id(&self) -> &Mid {
        self.base().id()
    }

    fn addr(&self) -> Option<std::net::SocketAddr> {
        self.base().id().addr()
    }

    fn score(&self) -> u64 {
        self.base().score()
    }

    fn update_score(&self) -> u64 {
        self.base().update_score()
    }

    fn counts(&self) -> Counts {
        self.base().counts()
    }

    fn handling_number(&self) -> u64 {
        self.base().handling_number()
    }

    /// Implementation specific details reported alongside the counters.
    fn extra(&self) -> Option<Value> {
        None
    }

    fn summary(&self) -> ModuleSummary {
        self.base().summary(self.extra())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_simple() {
        let counts = Counts {
            called: 1,
            accepted: 1,
            completed: 1,
            handling: 1,
        };
        assert_eq!(calculate_score_simple(&counts), 1 + 2 + 4 + 16);
    }

    #[test]
    fn test_counters_and_guard() {
        let base = ModuleBase::new("D1|127.0.0.1:8080".parse().unwrap(), None).unwrap();
        base.incr_called();
        {
            let _guard = base.start_handling();
            assert_eq!(base.handling_number(), 1);
            base.incr_accepted();
        }
        assert_eq!(base.handling_number(), 0);
        assert_eq!(base.update_score(), 1 + 2);

        let summary = base.summary(None);
        assert_eq!(summary.id, "D1|127.0.0.1:8080");
        assert_eq!(summary.called, 1);

        base.clear();
        assert_eq!(base.counts(), Counts::default());
        assert_eq!(base.score(), 0);
    }

    #[test]
    fn test_expect_type() {
        let base = ModuleBase::new("A3".parse().unwrap(), None).unwrap();
        assert!(base.expect_type(ModuleType::Analyzer).is_ok());
        assert!(base.expect_type(ModuleType::Pipeline).is_err());
    }
}
