//! BT-RADS Domain Types
//!
//! BT-RADS classifies brain tumor follow-up imaging into one of eight
//! categories by walking a fixed clinical decision graph. This crate holds
//! the data model shared by the rule engine and the orchestrator.
//!
//! # Key Concepts
//!
//! - **DecisionGraph**: validated, read-only nodes and value-keyed edges.
//!   Extraction nodes ask an extractor, decision nodes ask a rule, terminal
//!   nodes carry a score.
//! - **ExtractionResult / ValidatedResult**: what an extractor proposed and
//!   what a validator confirmed or corrected.
//! - **CaseState**: the mutable traversal record of one patient.
//! - **ClinicalContext**: quantitative inputs, derived once per case.
//! - **BtradsResult**: the final immutable snapshot.

#![deny(unsafe_code)]

mod case;
mod context;
mod errors;
mod extraction;
mod graph;
mod result;
mod score;

pub use case::*;
pub use context::*;
pub use errors::*;
pub use extraction::*;
pub use graph::*;
pub use result::*;
pub use score::*;
