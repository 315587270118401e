//! Ingestion and enrichment pipelines for dumpsift.
//!
//! - [`harvest`]: run the entity parsers over one classified device
//! - [`dedup`]: identity keys, duplicate clustering, secret sealing
//! - [`intake`]: the archive intake loop and one-shot ingest
//! - [`enrichment`]: the balance enrichment loop

pub mod dedup;
pub mod enrichment;
pub mod harvest;
pub mod intake;

pub use dedup::build_bundle;
pub use enrichment::{BalanceEnricher, CycleReport};
pub use harvest::{Harvest, Sourced, harvest_device};
pub use intake::{
    IngestOutcome, IngestReport, IntakeLoop, IntakeProgress, IntakeStage, SilentProgress,
};
