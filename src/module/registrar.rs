use log::debug;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::analyzer::Analyzer;
use super::base::{Module, ModuleBase, ModuleSummary};
use super::downloader::Downloader;
use super::mid::{Mid, ModuleType};
use super::pipeline::Pipeline;
use crate::{CrawlError, CrawlResult};

/// A registered module, typed by its role.
#[derive(Clone)]
pub enum ModuleRef {
    Downloader(Arc<dyn Downloader>),
    Analyzer(Arc<dyn Analyzer>),
    Pipeline(Arc<dyn Pipeline>),
}

impl ModuleRef {
    pub fn module_type(&self) -> ModuleType {
        match self {
            ModuleRef::Downloader(_) => ModuleType::Downloader,
            ModuleRef::Analyzer(_) => ModuleType::Analyzer,
            ModuleRef::Pipeline(_) => ModuleType::Pipeline,
        }
    }

    pub fn base(&self) -> &ModuleBase {
        match self {
            ModuleRef::Downloader(m) => m.base(),
            ModuleRef::Analyzer(m) => m.base(),
            ModuleRef::Pipeline(m) => m.base(),
        }
    }

    pub fn id(&self) -> &Mid {
        self.base().id()
    }

    pub fn update_score(&self) -> u64 {
        self.base().update_score()
    }

    pub fn handling_number(&self) -> u64 {
        self.base().handling_number()
    }

    pub fn summary(&self) -> ModuleSummary {
        match self {
            ModuleRef::Downloader(m) => m.summary(),
            ModuleRef::Analyzer(m) => m.summary(),
            ModuleRef::Pipeline(m) => m.summary(),
        }
    }
}

impl std::fmt::Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.module_type(), self.id())
    }
}

/// Thread-safe module index keyed by type and MID.
#[derive(Default)]
pub struct Registrar {
    modules: RwLock<HashMap<ModuleType, BTreeMap<Mid, ModuleRef>>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module. Re-registering the same MID replaces it and returns `false`.
    pub fn register(&self, module: ModuleRef) -> CrawlResult<bool> {
        let mid = module.id().clone();
        let parts = mid.parts()?;
        if parts.module_type != module.module_type() {
            return Err(CrawlError::Argument(format!(
                "module type mismatch: MID {} is a {}, module is a {}",
                mid,
                parts.module_type,
                module.module_type()
            )));
        }
        let mut modules = self.modules.write();
        let inserted = modules
            .entry(parts.module_type)
            .or_default()
            .insert(mid.clone(), module)
            .is_none();
        debug!("Registered module {} (new={})", mid, inserted);
        Ok(inserted)
    }

    pub fn unregister(&self, mid: &Mid) -> CrawlResult<ModuleRef> {
        let module_type = mid.module_type()?;
        let mut modules = self.modules.write();
        modules
            .get_mut(&module_type)
            .and_then(|by_mid| by_mid.remove(mid))
            .ok_or_else(|| CrawlError::NotFound(format!("module {}", mid)))
    }

    /// Returns the least loaded module of the given type, recomputing scores first.
    pub fn get(&self, module_type: ModuleType) -> CrawlResult<ModuleRef> {
        let modules = self.modules.read();
        modules
            .get(&module_type)
            .into_iter()
            .flat_map(|by_mid| by_mid.values())
            .min_by_key(|module| module.update_score())
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(format!("no {} registered", module_type)))
    }

    pub fn get_downloader(&self) -> CrawlResult<Arc<dyn Downloader>> {
        match self.get(ModuleType::Downloader)? {
            ModuleRef::Downloader(downloader) => Ok(downloader),
            other => Err(CrawlError::Argument(format!("{:?} is not a downloader", other))),
        }
    }

    pub fn get_analyzer(&self) -> CrawlResult<Arc<dyn Analyzer>> {
        match self.get(ModuleType::Analyzer)? {
            ModuleRef::Analyzer(analyzer) => Ok(analyzer),
            other => Err(CrawlError::Argument(format!("{:?} is not an analyzer", other))),
        }
    }

    pub fn get_pipeline(&self) -> CrawlResult<Arc<dyn Pipeline>> {
        match self.get(ModuleType::Pipeline)? {
            ModuleRef::Pipeline(pipeline) => Ok(pipeline),
            other => Err(CrawlError::Argument(format!("{:?} is not a pipeline", other))),
        }
    }

    pub fn get_all_by_type(&self, module_type: ModuleType) -> CrawlResult<BTreeMap<Mid, ModuleRef>> {
        self.modules
            .read()
            .get(&module_type)
            .filter(|by_mid| !by_mid.is_empty())
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(format!("no {} registered", module_type)))
    }

    pub fn get_all(&self) -> BTreeMap<Mid, ModuleRef> {
        self.modules
            .read()
            .values()
            .flat_map(|by_mid| by_mid.iter().map(|(mid, m)| (mid.clone(), m.clone())))
            .collect()
    }

    pub fn clear(&self) {
        self.modules.write().clear();
    }
}
