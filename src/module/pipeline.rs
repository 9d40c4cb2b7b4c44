use async_trait::async_trait;
use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::base::{Module, ModuleBase, ScoreCalculator};
use super::data::Item;
use super::mid::{Mid, ModuleType};
use crate::{CrawlError, CrawlResult, Stage};

/// One processing step. Returns the item handed to the next step.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &Item) -> CrawlResult<Item>;
}

#[async_trait]
impl<F> ItemProcessor for F
where
    F: Fn(&Item) -> CrawlResult<Item> + Send + Sync,
{
    async fn process(&self, item: &Item) -> CrawlResult<Item> {
        self(item)
    }
}

#[async_trait]
pub trait Pipeline: Module {
    fn processor_count(&self) -> usize;

    fn fail_fast(&self) -> bool;

    fn set_fail_fast(&self, fail_fast: bool);

    async fn send(&self, item: Item) -> Vec<CrawlError>;
}

/// Chains item processors in order.
pub struct LocalPipeline {
    base: ModuleBase,
    processors: Vec<Arc<dyn ItemProcessor>>,
    fail_fast: AtomicBool,
}

impl LocalPipeline {
    pub fn new(
        mid: Mid,
        processors: Vec<Arc<dyn ItemProcessor>>,
        calculator: Option<ScoreCalculator>,
    ) -> CrawlResult<Self> {
        let base = ModuleBase::new(mid, calculator)?;
        base.expect_type(ModuleType::Pipeline)?;
        if processors.is_empty() {
            return Err(CrawlError::Argument(
                "pipeline needs at least one item processor".to_string(),
            ));
        }
        Ok(Self {
            base,
            processors,
            fail_fast: AtomicBool::new(false),
        })
    }

    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        self.set_fail_fast(fail_fast);
        self
    }

    /// Runs the chain and returns the last successfully produced item.
    /// A failing step leaves the current item unchanged for the next step.
    pub async fn run(&self, item: Item) -> (Item, Vec<CrawlError>) {
        let _handling = self.base.start_handling();
        self.base.incr_called();
        self.base.incr_accepted();

        let fail_fast = self.fail_fast();
        let mut current = item;
        let mut errors = Vec::new();
        for (index, processor) in self.processors.iter().enumerate() {
            match processor.process(&current).await {
                Ok(next) => current = next,
                Err(e) => {
                    trace!("Item processor {} failed: {}", index, e);
                    errors.push(match e {
                        stage @ CrawlError::Stage { .. } => stage,
                        other => CrawlError::stage(
                            Stage::Process,
                            other.to_string(),
                            format!("processor #{}", index),
                        ),
                    });
                    if fail_fast {
                        break;
                    }
                }
            }
        }
        if errors.is_empty() {
            self.base.incr_completed();
        }
        (current, errors)
    }
}

impl Module for LocalPipeline {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Pipeline for LocalPipeline {
    fn processor_count(&self) -> usize {
        self.processors.len()
    }

    fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::SeqCst)
    }

    fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::SeqCst);
    }

    async fn send(&self, item: Item) -> Vec<CrawlError> {
        self.run(item).await.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn processor(fail: bool) -> Arc<dyn ItemProcessor> {
        Arc::new(move |item: &Item| -> CrawlResult<Item> {
            if fail {
                return Err(CrawlError::Argument("fail".into()));
            }
            let number = item
                .get("number")
                .and_then(Value::as_u64)
                .ok_or_else(|| CrawlError::Argument("not found the number".into()))?;
            let mut next = item.clone();
            next.insert("number".into(), Value::from(number + 1));
            Ok(next)
        })
    }

    fn item() -> Item {
        Item::from([("number".to_string(), Value::from(0))])
    }

    #[test]
    fn test_new_rejects_bad_args() {
        assert!(LocalPipeline::new("P1".parse().unwrap(), Vec::new(), None).is_err());
        assert!(LocalPipeline::new("A1".parse().unwrap(), vec![processor(false)], None).is_err());
        assert!(LocalPipeline::new(Mid::new_unchecked("P127.0.0.1"), vec![processor(false)], None).is_err());
    }

    #[tokio::test]
    async fn test_send_runs_every_processor() {
        let processors = (0..12).map(|_| processor(false)).collect();
        let pipeline = LocalPipeline::new("P1|127.0.0.1:8080".parse().unwrap(), processors, None).unwrap();
        let (processed, errors) = pipeline.run(item()).await;
        assert!(errors.is_empty());
        assert_eq!(processed["number"], 12);
        assert_eq!(pipeline.counts().completed, 1);
    }

    #[tokio::test]
    async fn test_fail_fast() {
        let processors: Vec<_> = (0..12).map(|i| processor(i % 3 == 0)).collect();
        let pipeline = LocalPipeline::new("P1".parse().unwrap(), processors, None).unwrap();
        assert!(!pipeline.fail_fast());

        let (processed, errors) = pipeline.run(item()).await;
        assert_eq!(errors.len(), 4);
        assert_eq!(processed["number"], 8);
        assert!(errors.iter().all(|e| e.kind() == crate::ErrorKind::Process));

        pipeline.set_fail_fast(true);
        assert_eq!(pipeline.send(item()).await.len(), 1);

        pipeline.set_fail_fast(false);
        assert_eq!(pipeline.send(item()).await.len(), 4);

        let counts = pipeline.counts();
        assert_eq!((counts.called, counts.accepted, counts.completed, counts.handling), (3, 3, 0, 0));
    }
}
