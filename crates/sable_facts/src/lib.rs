//! Fact derivation, propagation and querying over `sable_ir` routines.
//!
//! The engine records what is provably true about values and the memory they
//! point to, scoped to dominance regions, and uses it to fold comparisons and
//! forward loads.

pub mod consts;
pub mod engine;
pub mod error;
pub mod factset;
pub mod knowledge;
pub mod location;
pub mod producers;

pub use consts::{ConstRegions, IS_CONST, NOT_ZERO};
pub use engine::{ApplyStats, FactEngine, reinterpret_op};
pub use error::FactError;
pub use factset::{Domain, FactSet, FactTable};
pub use knowledge::{Knowledge, KnownValue};
pub use location::{Indirection, Location};
pub use producers::{FactProducer, FactProducers, NoAliasCalls, NonNullParams};
