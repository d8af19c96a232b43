//! Typed indices into the per-function arenas.
//!
//! Instructions refer to blocks and values through these `u32` wrappers rather
//! than through references, so a `Function` can be edited in place while an
//! interpreter or an analysis holds positions into it.

use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};

/// A basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Block(u32);
entity_impl!(Block, "bb");

/// An instruction, placed in at most one block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// An SSA value: an instruction result, a parameter, or a constant.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Value(u32);
entity_impl!(Value, "v");
