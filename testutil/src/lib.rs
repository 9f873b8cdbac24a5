/// Testing utilities for the validator ledger
/// 
/// Provides:
/// - Test data generators
/// - Fixed four-node key fixtures
/// - Proptest strategies for protocol inputs

pub mod generators;
pub mod fixtures;

pub use generators::*;
