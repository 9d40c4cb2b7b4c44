pub mod analyzer;
pub mod base;
pub mod data;
pub mod downloader;
pub mod mid;
pub mod pipeline;
pub mod registrar;
pub mod sn;

pub use analyzer::{Analyzer, LocalAnalyzer, ResponseParser};
pub use base::{calculate_score_simple, Counts, Module, ModuleBase, ModuleSummary, ScoreCalculator};
pub use data::{Data, Item};
pub use downloader::{Downloader, HttpDownloader};
pub use mid::{generate_mid, split_mid, Mid, ModuleType};
pub use pipeline::{ItemProcessor, LocalPipeline, Pipeline};
pub use registrar::{ModuleRef, Registrar};
pub use sn::SnGenerator;
