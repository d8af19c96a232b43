//! Instruction kinds.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::entities::{Block, Value};
use crate::types::Signature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    pub fn can_trap(self) -> bool {
        matches!(
            self,
            BinaryOp::SDiv | BinaryOp::UDiv | BinaryOp::SRem | BinaryOp::URem
        )
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Mul
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Xor
                | BinaryOp::FAdd
                | BinaryOp::FMul
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::SDiv => "sdiv",
            BinaryOp::UDiv => "udiv",
            BinaryOp::SRem => "srem",
            BinaryOp::URem => "urem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::LShr => "lshr",
            BinaryOp::AShr => "ashr",
            BinaryOp::FAdd => "fadd",
            BinaryOp::FSub => "fsub",
            BinaryOp::FMul => "fmul",
            BinaryOp::FDiv => "fdiv",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntCC {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl IntCC {
    pub fn is_equality(self) -> bool {
        matches!(self, IntCC::Eq | IntCC::Ne)
    }

    /// The result the comparison produces when both operands are equal.
    pub fn is_true_when_equal(self) -> bool {
        matches!(
            self,
            IntCC::Eq | IntCC::Sle | IntCC::Sge | IntCC::Ule | IntCC::Uge
        )
    }

    /// The predicate that holds with the operands swapped.
    pub fn swapped(self) -> Self {
        match self {
            IntCC::Eq => IntCC::Eq,
            IntCC::Ne => IntCC::Ne,
            IntCC::Slt => IntCC::Sgt,
            IntCC::Sle => IntCC::Sge,
            IntCC::Sgt => IntCC::Slt,
            IntCC::Sge => IntCC::Sle,
            IntCC::Ult => IntCC::Ugt,
            IntCC::Ule => IntCC::Uge,
            IntCC::Ugt => IntCC::Ult,
            IntCC::Uge => IntCC::Ule,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntCC::Eq => "eq",
            IntCC::Ne => "ne",
            IntCC::Slt => "slt",
            IntCC::Sle => "sle",
            IntCC::Sgt => "sgt",
            IntCC::Sge => "sge",
            IntCC::Ult => "ult",
            IntCC::Ule => "ule",
            IntCC::Ugt => "ugt",
            IntCC::Uge => "uge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastOp {
    Bitcast,
    PtrToInt,
    IntToPtr,
    ZExt,
    SExt,
    Trunc,
}

impl CastOp {
    /// Casts that keep every bit of the operand.
    pub fn is_reinterpret(self) -> bool {
        matches!(self, CastOp::Bitcast | CastOp::PtrToInt | CastOp::IntToPtr)
    }

    pub fn name(self) -> &'static str {
        match self {
            CastOp::Bitcast => "bitcast",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::Trunc => "trunc",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for IntCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for CastOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The operation performed by an instruction.
///
/// The result type, when there is one, lives on the result value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstKind {
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    Icmp {
        cc: IntCC,
        lhs: Value,
        rhs: Value,
    },
    Cast {
        op: CastOp,
        arg: Value,
    },
    Select {
        cond: Value,
        if_true: Value,
        if_false: Value,
    },
    /// `base + offset` with a constant byte offset.
    Gep {
        base: Value,
        offset: i64,
    },
    /// `base + index * scale`.
    GepIndexed {
        base: Value,
        index: Value,
        scale: i64,
    },
    Load {
        ptr: Value,
        volatile: bool,
    },
    Store {
        ptr: Value,
        value: Value,
        volatile: bool,
    },
    Phi {
        incoming: Vec<(Block, Value)>,
    },
    Call {
        callee: Value,
        args: Vec<Value>,
        sig: Signature,
        /// The returned pointer aliases nothing else visible to the caller.
        noalias: bool,
    },
    Assume {
        cond: Value,
    },
    Jump {
        dest: Block,
    },
    Branch {
        cond: Value,
        then_dest: Block,
        else_dest: Block,
        weights: Option<[u32; 2]>,
    },
    /// Successor order is `default` first, then the cases.
    Switch {
        value: Value,
        cases: Vec<(u64, Block)>,
        default: Block,
        weights: Option<Vec<u32>>,
    },
    Return {
        value: Option<Value>,
    },
    Unreachable,
}

impl InstKind {
    pub fn operands(&self) -> SmallVec<[Value; 4]> {
        let mut out = SmallVec::new();
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
            InstKind::Cast { arg, .. } => out.push(*arg),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => out.extend([*cond, *if_true, *if_false]),
            InstKind::Gep { base, .. } => out.push(*base),
            InstKind::GepIndexed { base, index, .. } => out.extend([*base, *index]),
            InstKind::Load { ptr, .. } => out.push(*ptr),
            InstKind::Store { ptr, value, .. } => out.extend([*ptr, *value]),
            InstKind::Phi { incoming } => out.extend(incoming.iter().map(|(_, value)| *value)),
            InstKind::Call { callee, args, .. } => {
                out.push(*callee);
                out.extend(args.iter().copied());
            }
            InstKind::Assume { cond } => out.push(*cond),
            InstKind::Branch { cond, .. } => out.push(*cond),
            InstKind::Switch { value, .. } => out.push(*value),
            InstKind::Return { value } => out.extend(*value),
            InstKind::Jump { .. } | InstKind::Unreachable => {}
        }
        out
    }

    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            InstKind::Binary { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            InstKind::Cast { arg, .. } => *arg = f(*arg),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                *cond = f(*cond);
                *if_true = f(*if_true);
                *if_false = f(*if_false);
            }
            InstKind::Gep { base, .. } => *base = f(*base),
            InstKind::GepIndexed { base, index, .. } => {
                *base = f(*base);
                *index = f(*index);
            }
            InstKind::Load { ptr, .. } => *ptr = f(*ptr),
            InstKind::Store { ptr, value, .. } => {
                *ptr = f(*ptr);
                *value = f(*value);
            }
            InstKind::Phi { incoming } => {
                for (_, value) in incoming {
                    *value = f(*value);
                }
            }
            InstKind::Call { callee, args, .. } => {
                *callee = f(*callee);
                for arg in args {
                    *arg = f(*arg);
                }
            }
            InstKind::Assume { cond } | InstKind::Branch { cond, .. } => *cond = f(*cond),
            InstKind::Switch { value, .. } => *value = f(*value),
            InstKind::Return { value } => {
                if let Some(value) = value {
                    *value = f(*value);
                }
            }
            InstKind::Jump { .. } | InstKind::Unreachable => {}
        }
    }

    pub fn successors(&self) -> SmallVec<[Block; 2]> {
        let mut out = SmallVec::new();
        match self {
            InstKind::Jump { dest } => out.push(*dest),
            InstKind::Branch {
                then_dest,
                else_dest,
                ..
            } => out.extend([*then_dest, *else_dest]),
            InstKind::Switch { cases, default, .. } => {
                out.push(*default);
                out.extend(cases.iter().map(|(_, block)| *block));
            }
            _ => {}
        }
        out
    }

    /// Rewrites block references: branch targets and phi predecessors.
    pub fn map_blocks(&mut self, mut f: impl FnMut(Block) -> Block) {
        match self {
            InstKind::Jump { dest } => *dest = f(*dest),
            InstKind::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                *then_dest = f(*then_dest);
                *else_dest = f(*else_dest);
            }
            InstKind::Switch { cases, default, .. } => {
                *default = f(*default);
                for (_, block) in cases {
                    *block = f(*block);
                }
            }
            InstKind::Phi { incoming } => {
                for (block, _) in incoming {
                    *block = f(*block);
                }
            }
            _ => {}
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Jump { .. }
                | InstKind::Branch { .. }
                | InstKind::Switch { .. }
                | InstKind::Return { .. }
                | InstKind::Unreachable
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }

    /// Whether removing the instruction could change observable behavior,
    /// assuming its result is unused.
    pub fn has_side_effects(&self) -> bool {
        match self {
            InstKind::Binary { op, .. } => op.can_trap(),
            InstKind::Load { volatile, .. } => *volatile,
            InstKind::Store { .. } | InstKind::Call { .. } | InstKind::Assume { .. } => true,
            other => other.is_terminator(),
        }
    }

    /// Result depends only on the operands: no memory, no traps, no control.
    pub fn is_pure(&self) -> bool {
        match self {
            InstKind::Binary { op, .. } => !op.can_trap(),
            InstKind::Icmp { .. }
            | InstKind::Cast { .. }
            | InstKind::Select { .. }
            | InstKind::Gep { .. }
            | InstKind::GepIndexed { .. } => true,
            _ => false,
        }
    }
}
