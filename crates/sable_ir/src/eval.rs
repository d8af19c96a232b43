//! Constant evaluation and the scalar folding rules shared by the interpreter
//! and the optimizer.

use sable_symbol::{SymbolError, SymbolResolver};

use crate::entities::Value;
use crate::function::{Function, ValueDef};
use crate::instructions::{BinaryOp, CastOp, InstKind, IntCC};
use crate::machine::Machine;
use crate::types::Type;

/// Applies `op` to operands of type `ty`. `None` when the operation traps.
pub fn fold_binary(op: BinaryOp, ty: Type, lhs: u64, rhs: u64) -> Option<u64> {
    let (lhs, rhs) = (ty.normalize(lhs), ty.normalize(rhs));
    let (slhs, srhs) = (ty.sign_extend(lhs), ty.sign_extend(rhs));
    let shift = (rhs % u64::from(ty.bits().max(1))) as u32;
    let float = |f: fn(f64, f64) -> f64| f(f64::from_bits(lhs), f64::from_bits(rhs)).to_bits();

    let bits = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::UDiv => lhs.checked_div(rhs)?,
        BinaryOp::URem => lhs.checked_rem(rhs)?,
        BinaryOp::SDiv => slhs.checked_div(srhs)? as u64,
        BinaryOp::SRem => slhs.checked_rem(srhs)? as u64,
        BinaryOp::And => lhs & rhs,
        BinaryOp::Or => lhs | rhs,
        BinaryOp::Xor => lhs ^ rhs,
        BinaryOp::Shl => lhs << shift,
        BinaryOp::LShr => lhs >> shift,
        BinaryOp::AShr => (slhs >> shift) as u64,
        BinaryOp::FAdd => return Some(float(|a, b| a + b)),
        BinaryOp::FSub => return Some(float(|a, b| a - b)),
        BinaryOp::FMul => return Some(float(|a, b| a * b)),
        BinaryOp::FDiv => return Some(float(|a, b| a / b)),
    };
    Some(ty.normalize(bits))
}

pub fn fold_icmp(cc: IntCC, ty: Type, lhs: u64, rhs: u64) -> bool {
    let (lhs, rhs) = (ty.normalize(lhs), ty.normalize(rhs));
    let (slhs, srhs) = (ty.sign_extend(lhs), ty.sign_extend(rhs));
    match cc {
        IntCC::Eq => lhs == rhs,
        IntCC::Ne => lhs != rhs,
        IntCC::Slt => slhs < srhs,
        IntCC::Sle => slhs <= srhs,
        IntCC::Sgt => slhs > srhs,
        IntCC::Sge => slhs >= srhs,
        IntCC::Ult => lhs < rhs,
        IntCC::Ule => lhs <= rhs,
        IntCC::Ugt => lhs > rhs,
        IntCC::Uge => lhs >= rhs,
    }
}

pub fn fold_cast(op: CastOp, from: Type, to: Type, bits: u64) -> u64 {
    let bits = from.normalize(bits);
    match op {
        CastOp::SExt => to.normalize(from.sign_extend(bits) as u64),
        CastOp::ZExt | CastOp::Trunc | CastOp::Bitcast | CastOp::PtrToInt | CastOp::IntToPtr => {
            to.normalize(bits)
        }
    }
}

/// Evaluates values that are constant for the lifetime of the process:
/// immediates, symbol addresses, and pure arithmetic over them.
pub struct Evaluator<'a> {
    resolver: &'a SymbolResolver,
    machine: Option<&'a dyn Machine>,
}

impl<'a> Evaluator<'a> {
    pub fn new(resolver: &'a SymbolResolver) -> Self {
        Self {
            resolver,
            machine: None,
        }
    }

    pub fn with_machine(resolver: &'a SymbolResolver, machine: &'a dyn Machine) -> Self {
        Self {
            resolver,
            machine: Some(machine),
        }
    }

    pub fn resolver(&self) -> &SymbolResolver {
        self.resolver
    }

    /// The bits of `value` if it is a process-lifetime constant.
    ///
    /// Symbols that cannot be resolved are errors rather than "not constant".
    pub fn eval_const(&self, func: &Function, value: Value) -> Result<Option<u64>, SymbolError> {
        match func.value_def(value) {
            ValueDef::Const(bits) => Ok(Some(*bits)),
            ValueDef::Symbol(name) => self.resolver.resolve_address(name).map(Some),
            ValueDef::Param(_) => Ok(None),
            ValueDef::Inst(inst) => {
                let ty = func.value_type(value);
                match func.kind(*inst) {
                    InstKind::Gep { base, offset } => Ok(self
                        .eval_const(func, *base)?
                        .map(|base| base.wrapping_add(*offset as u64))),
                    InstKind::Cast { op, arg } if op.is_reinterpret() => {
                        self.eval_const(func, *arg)
                    }
                    InstKind::Binary { op, lhs, rhs } if !op.can_trap() => {
                        let Some(lhs) = self.eval_const(func, *lhs)? else {
                            return Ok(None);
                        };
                        let Some(rhs) = self.eval_const(func, *rhs)? else {
                            return Ok(None);
                        };
                        Ok(fold_binary(*op, ty, lhs, rhs))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Reads process memory without side effects, if a machine is attached.
    pub fn peek(&self, address: u64, size: u32) -> Option<u64> {
        self.machine?.peek(address, size)
    }
}
