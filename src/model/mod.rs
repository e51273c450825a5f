//! Core data types for packages, vulnerabilities and audit results.
//!
//! - [`PackageSpec`] - A validated package identifier
//! - [`PackageMetadata`] - Registry metadata snapshot for one version
//! - [`VulnerabilityRecord`] - A normalized vulnerability
//! - [`RiskAssessment`] - Score, tier and reasons
//! - [`AuditReport`] - Complete audit result
//!
//! # Example
//!
//! ```
//! use pkgrisk::model::{PackageSpec, RiskAssessment, RiskTier};
//!
//! let spec = PackageSpec::parse("@types/node", Some("20.1.0")).unwrap();
//! assert_eq!(spec.to_string(), "@types/node@20.1.0");
//!
//! let assessment = RiskAssessment::new(85, Vec::new());
//! assert_eq!(assessment.tier, RiskTier::Critical);
//! ```

mod assessment;
mod package;
mod report;
mod vulnerability;

pub use assessment::*;
pub use package::*;
pub use report::*;
pub use vulnerability::*;
