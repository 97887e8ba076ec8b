//! BT-RADS Case Engine
//!
//! Drives patient cases through a validated decision graph and produces a
//! scored, fully audited [`BtradsResult`](btrads_types::BtradsResult).
//!
//! # Architecture
//!
//! The [`CaseOrchestrator`] composes:
//!
//! - [`ExtractorRegistry`]: named [`Extractor`]s, resolved per graph node at build time
//! - [`RuleEngine`](btrads_rules::RuleEngine): quantitative overrides
//! - [`ValidationGate`]: optional human confirmation, one pending request per case
//! - [`CaseEventSink`] and [`StatusNotifier`]: best-effort collaborators
//!
//! [`BatchRunner`] runs many cases against one orchestrator.
//!
//! # Example
//!
//! ```rust
//! use btrads_engine::*;
//! use btrads_types::{BtradsScore, ExtractedValue, PatientRecord};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let graph = Arc::new(reference_graph().unwrap());
//! let answers = StaticExtractor::new("scripted")
//!     .answer(SUITABLE_PRIOR, ExtractedValue::Flag(true), 0.9)
//!     .answer(MEDICATIONS, ExtractedValue::category("neither"), 0.85);
//! let registry = ExtractorRegistry::new().with_all(EXTRACTOR_REFS, Arc::new(answers));
//! let orchestrator = CaseOrchestrator::builder(graph, registry).build().unwrap();
//!
//! let patient = PatientRecord::new("p-001").with_change_pct(-48.0, -25.0);
//! let result = orchestrator.run(&patient).await;
//! assert_eq!(result.score, BtradsScore::Bt1a);
//! # }
//! ```

#![deny(unsafe_code)]

mod batch;
mod config;
mod extractor;
pub mod extractors;
mod notification;
mod orchestrator;
mod persistence;
mod reference_graph;
mod validation_gate;

pub use batch::*;
pub use config::*;
pub use extractor::*;
pub use extractors::{KeywordExtractor, RuleExtractor, StaticExtractor};
pub use notification::*;
pub use orchestrator::*;
pub use persistence::*;
pub use reference_graph::*;
pub use validation_gate::*;
