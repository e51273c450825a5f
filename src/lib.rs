pub mod advisory;
pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod narrative;
pub mod output;
pub mod scoring;
pub mod signals;

pub use audit::{Auditor, MetadataSource, SnapshotFile};
pub use config::Config;
pub use error::{AuditError, ConfigError};
pub use model::{AuditReport, PackageSpec, RiskAssessment, RiskTier, Severity, VulnerabilityRecord};
pub use scoring::{score, RiskModel, WeightedModel};
pub use signals::PackageSignals;
