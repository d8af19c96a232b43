//! A straightforward IR interpreter with an optional tracing hook.

use ahash::AHashMap;
use cranelift_entity::SecondaryMap;
use sable_symbol::SymbolResolver;
use tracing::trace;

use crate::entities::{Block, Inst, Value};
use crate::error::ExecError;
use crate::eval::{fold_binary, fold_cast, fold_icmp};
use crate::function::{Function, ValueDef};
use crate::instructions::InstKind;
use crate::machine::Machine;

/// What the interpreter should do with a call after the hook has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAction {
    /// Perform the call on the machine.
    Execute,
    /// The hook rewrote the function at the call site; resume at the same
    /// position of the same block.
    Rewritten,
}

/// Observes and rewrites a function while it is being interpreted.
pub trait CallHook {
    fn before_call(
        &mut self,
        func: &mut Function,
        call: Inst,
        callee: u64,
    ) -> Result<CallAction, ExecError>;

    /// `succ` indexes the successors of the terminator `inst`.
    fn branch_taken(&mut self, _func: &mut Function, _inst: Inst, _succ: usize) {}
}

/// A hook that observes nothing.
pub struct NoHook;

impl CallHook for NoHook {
    fn before_call(&mut self, _: &mut Function, _: Inst, _: u64) -> Result<CallAction, ExecError> {
        Ok(CallAction::Execute)
    }
}

enum FuncRef<'f> {
    Shared(&'f Function),
    Traced(&'f mut Function, &'f mut dyn CallHook),
}

impl FuncRef<'_> {
    fn func(&self) -> &Function {
        match self {
            FuncRef::Shared(func) => func,
            FuncRef::Traced(func, _) => func,
        }
    }
}

pub struct Interpreter<'a> {
    resolver: &'a SymbolResolver,
}

struct Frame<'a> {
    args: &'a [u64],
    values: SecondaryMap<Value, u64>,
    symbols: AHashMap<Value, u64>,
}

impl<'a> Interpreter<'a> {
    pub fn new(resolver: &'a SymbolResolver) -> Self {
        Self { resolver }
    }

    /// Runs `func` without tracing.
    pub fn run(
        &self,
        func: &Function,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, ExecError> {
        self.execute(FuncRef::Shared(func), machine, args)
    }

    /// Runs `func`, letting `hook` rewrite it at calls and observe branches.
    pub fn run_traced<'f>(
        &self,
        func: &'f mut Function,
        hook: &'f mut dyn CallHook,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, ExecError> {
        self.execute(FuncRef::Traced(func, hook), machine, args)
    }

    fn execute(
        &self,
        mut func: FuncRef<'_>,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, ExecError> {
        let Some(entry) = func.func().entry_block() else {
            return Err(ExecError::Unsupported(format!(
                "`{}` has no body",
                func.func().name
            )));
        };
        if args.len() < func.func().params.len() {
            return Err(ExecError::Unsupported(format!(
                "`{}` expects {} arguments, got {}",
                func.func().name,
                func.func().params.len(),
                args.len()
            )));
        }

        let mut frame = Frame {
            args,
            values: SecondaryMap::new(),
            symbols: AHashMap::new(),
        };
        let mut block = entry;
        let mut index = self.enter_block(func.func(), &mut frame, entry, None)?;

        loop {
            let Some(inst) = func.func().block_insts(block).get(index).copied() else {
                return Err(ExecError::Unsupported(format!(
                    "{block} has no terminator"
                )));
            };
            let kind = func.func().kind(inst).clone();
            let next = match kind {
                InstKind::Call { callee, args, .. } => {
                    let address = self.value(func.func(), &mut frame, callee)?;
                    if let FuncRef::Traced(f, hook) = &mut func {
                        if hook.before_call(f, inst, address)? == CallAction::Rewritten {
                            continue;
                        }
                    }
                    let args = args
                        .iter()
                        .map(|arg| self.value(func.func(), &mut frame, *arg))
                        .collect::<Result<Vec<_>, _>>()?;
                    trace!(address, "call");
                    let result = machine.call(address, &args)?;
                    self.define(func.func(), &mut frame, inst, result);
                    None
                }
                InstKind::Jump { dest } => Some(dest),
                InstKind::Branch {
                    cond,
                    then_dest,
                    else_dest,
                    ..
                } => {
                    let taken = self.value(func.func(), &mut frame, cond)? & 1 != 0;
                    let succ = if taken { 0 } else { 1 };
                    if let FuncRef::Traced(f, hook) = &mut func {
                        hook.branch_taken(f, inst, succ);
                    }
                    Some(if taken { then_dest } else { else_dest })
                }
                InstKind::Switch {
                    value,
                    cases,
                    default,
                    ..
                } => {
                    let ty = func.func().value_type(value);
                    let scrutinee = ty.normalize(self.value(func.func(), &mut frame, value)?);
                    let (succ, dest) = cases
                        .iter()
                        .position(|(case, _)| ty.normalize(*case) == scrutinee)
                        .map_or((0, default), |position| (position + 1, cases[position].1));
                    if let FuncRef::Traced(f, hook) = &mut func {
                        hook.branch_taken(f, inst, succ);
                    }
                    Some(dest)
                }
                InstKind::Return { value } => {
                    return match value {
                        Some(value) => self.value(func.func(), &mut frame, value),
                        None => Ok(0),
                    };
                }
                InstKind::Unreachable => return Err(ExecError::Unreachable),
                InstKind::Phi { .. } => {
                    return Err(ExecError::Unsupported(format!(
                        "phi {inst} after the head of {block}"
                    )));
                }
                other => {
                    self.step(func.func(), &mut frame, machine, inst, &other)?;
                    None
                }
            };

            match next {
                Some(dest) => {
                    index = self.enter_block(func.func(), &mut frame, dest, Some(block))?;
                    block = dest;
                }
                None => index += 1,
            }
        }
    }

    /// Evaluates the phis of `block` simultaneously; returns the index of the
    /// first non-phi instruction.
    fn enter_block(
        &self,
        func: &Function,
        frame: &mut Frame<'_>,
        block: Block,
        from: Option<Block>,
    ) -> Result<usize, ExecError> {
        let phis = func.phis(block);
        let mut incoming = Vec::with_capacity(phis.len());
        for phi in &phis {
            let InstKind::Phi { incoming: arms } = func.kind(*phi) else {
                continue;
            };
            let value = from
                .and_then(|from| arms.iter().find(|(pred, _)| *pred == from))
                .map(|(_, value)| *value)
                .ok_or_else(|| {
                    ExecError::Unsupported(format!("{phi} has no entry for the incoming edge"))
                })?;
            incoming.push((*phi, self.value(func, frame, value)?));
        }
        for (phi, bits) in incoming {
            self.define(func, frame, phi, bits);
        }
        Ok(phis.len())
    }

    fn step(
        &self,
        func: &Function,
        frame: &mut Frame<'_>,
        machine: &mut dyn Machine,
        inst: Inst,
        kind: &InstKind,
    ) -> Result<(), ExecError> {
        let result_ty = func.inst_result(inst).map(|value| func.value_type(value));
        let bits = match kind {
            InstKind::Binary { op, lhs, rhs } => {
                let ty = func.value_type(*lhs);
                let lhs = self.value(func, frame, *lhs)?;
                let rhs = self.value(func, frame, *rhs)?;
                fold_binary(*op, ty, lhs, rhs).ok_or(ExecError::DivisionByZero)?
            }
            InstKind::Icmp { cc, lhs, rhs } => {
                let ty = func.value_type(*lhs);
                let lhs = self.value(func, frame, *lhs)?;
                let rhs = self.value(func, frame, *rhs)?;
                u64::from(fold_icmp(*cc, ty, lhs, rhs))
            }
            InstKind::Cast { op, arg } => {
                let from = func.value_type(*arg);
                let to = result_ty.unwrap_or(from);
                fold_cast(*op, from, to, self.value(func, frame, *arg)?)
            }
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                if self.value(func, frame, *cond)? & 1 != 0 {
                    self.value(func, frame, *if_true)?
                } else {
                    self.value(func, frame, *if_false)?
                }
            }
            InstKind::Gep { base, offset } => self
                .value(func, frame, *base)?
                .wrapping_add(*offset as u64),
            InstKind::GepIndexed { base, index, scale } => {
                let index_ty = func.value_type(*index);
                let index = index_ty.sign_extend(self.value(func, frame, *index)?);
                self.value(func, frame, *base)?
                    .wrapping_add(index.wrapping_mul(*scale) as u64)
            }
            InstKind::Load { ptr, .. } => {
                let size = result_ty.map_or(0, |ty| ty.bytes());
                let address = self.value(func, frame, *ptr)?;
                machine.load(address, size)?
            }
            InstKind::Store { ptr, value, .. } => {
                let size = func.value_type(*value).bytes();
                let address = self.value(func, frame, *ptr)?;
                let bits = self.value(func, frame, *value)?;
                machine.store(address, size, bits)?;
                return Ok(());
            }
            InstKind::Assume { cond } => {
                if self.value(func, frame, *cond)? & 1 == 0 {
                    return Err(ExecError::AssumptionFailed(inst));
                }
                return Ok(());
            }
            other => {
                return Err(ExecError::Unsupported(format!(
                    "cannot step {other:?} at {inst}"
                )));
            }
        };
        self.define(func, frame, inst, bits);
        Ok(())
    }

    fn define(&self, func: &Function, frame: &mut Frame<'_>, inst: Inst, bits: u64) {
        if let Some(result) = func.inst_result(inst) {
            frame.values[result] = func.value_type(result).normalize(bits);
        }
    }

    fn value(&self, func: &Function, frame: &mut Frame<'_>, value: Value) -> Result<u64, ExecError> {
        match func.value_def(value) {
            ValueDef::Inst(_) => Ok(frame.values[value]),
            ValueDef::Param(index) => frame
                .args
                .get(*index as usize)
                .map(|bits| func.value_type(value).normalize(*bits))
                .ok_or_else(|| ExecError::Unsupported(format!("missing argument {index}"))),
            ValueDef::Const(bits) => Ok(*bits),
            ValueDef::Symbol(name) => {
                if let Some(address) = frame.symbols.get(&value) {
                    return Ok(*address);
                }
                let address = self.resolver.resolve_address(name)?;
                frame.symbols.insert(value, address);
                Ok(address)
            }
        }
    }
}
