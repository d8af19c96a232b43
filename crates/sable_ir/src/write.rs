//! Converting IR to text.

use std::fmt::{self, Write};

use crate::entities::{Inst, Value};
use crate::function::{Function, ValueDef};
use crate::instructions::InstKind;

/// Writes `func` in the textual form used for dumps and test output.
pub fn write_function(w: &mut dyn Write, func: &Function) -> fmt::Result {
    let params = func
        .params
        .iter()
        .zip(&func.param_attrs)
        .map(|(param, attrs)| {
            let ty = func.value_type(*param);
            if attrs.nonnull {
                format!("{ty} nonnull {param}")
            } else {
                format!("{ty} {param}")
            }
        })
        .collect::<Vec<_>>();
    let variadic = if func.sig.variadic { ", ..." } else { "" };
    write!(
        w,
        "function @{}({}{}) -> {}",
        func.name,
        params.join(", "),
        variadic,
        func.sig.ret
    )?;

    if func.is_declaration() {
        return writeln!(w);
    }
    writeln!(w, " {{")?;
    for block in &func.layout {
        writeln!(w, "{block}:")?;
        for inst in func.block_insts(*block) {
            write!(w, "    ")?;
            write_inst(w, func, *inst)?;
            writeln!(w)?;
        }
    }
    writeln!(w, "}}")
}

fn operand(func: &Function, value: Value) -> String {
    match func.value_def(value) {
        ValueDef::Const(bits) => {
            let ty = func.value_type(value);
            if ty.is_int() {
                format!("{ty} {}", ty.sign_extend(*bits))
            } else {
                format!("{ty} {bits:#x}")
            }
        }
        ValueDef::Symbol(name) => format!("@{name}"),
        ValueDef::Inst(_) | ValueDef::Param(_) => value.to_string(),
    }
}

pub fn write_inst(w: &mut dyn Write, func: &Function, inst: Inst) -> fmt::Result {
    if let Some(result) = func.inst_result(inst) {
        write!(w, "{result} = ")?;
    }
    let ty = func
        .inst_result(inst)
        .map(|value| func.value_type(value).to_string())
        .unwrap_or_default();
    let v = |value: Value| operand(func, value);

    match func.kind(inst) {
        InstKind::Binary { op, lhs, rhs } => write!(w, "{op}.{ty} {}, {}", v(*lhs), v(*rhs)),
        InstKind::Icmp { cc, lhs, rhs } => write!(w, "icmp {cc} {}, {}", v(*lhs), v(*rhs)),
        InstKind::Cast { op, arg } => write!(w, "{op}.{ty} {}", v(*arg)),
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => write!(
            w,
            "select.{ty} {}, {}, {}",
            v(*cond),
            v(*if_true),
            v(*if_false)
        ),
        InstKind::Gep { base, offset } => write!(w, "gep {}, {offset}", v(*base)),
        InstKind::GepIndexed { base, index, scale } => {
            write!(w, "gep {}, {} * {scale}", v(*base), v(*index))
        }
        InstKind::Load { ptr, volatile } => {
            let kw = if *volatile { "load volatile" } else { "load" };
            write!(w, "{kw}.{ty} {}", v(*ptr))
        }
        InstKind::Store {
            ptr,
            value,
            volatile,
        } => {
            let kw = if *volatile { "store volatile" } else { "store" };
            write!(w, "{kw} {}, {}", v(*ptr), v(*value))
        }
        InstKind::Phi { incoming } => {
            let arms = incoming
                .iter()
                .map(|(block, value)| format!("[{block}: {}]", v(*value)))
                .collect::<Vec<_>>();
            write!(w, "phi.{ty} {}", arms.join(", "))
        }
        InstKind::Call {
            callee,
            args,
            sig,
            noalias,
        } => {
            let args = args.iter().map(|arg| v(*arg)).collect::<Vec<_>>();
            let attr = if *noalias { " noalias" } else { "" };
            write!(w, "call{attr} {}({}) {sig}", v(*callee), args.join(", "))
        }
        InstKind::Assume { cond } => write!(w, "assume {}", v(*cond)),
        InstKind::Jump { dest } => write!(w, "jump {dest}"),
        InstKind::Branch {
            cond,
            then_dest,
            else_dest,
            weights,
        } => {
            write!(w, "br {}, {then_dest}, {else_dest}", v(*cond))?;
            if let Some([taken, not_taken]) = weights {
                write!(w, " !weights({taken}, {not_taken})")?;
            }
            Ok(())
        }
        InstKind::Switch {
            value,
            cases,
            default,
            weights,
        } => {
            write!(w, "switch {}, {default}", v(*value))?;
            for (case, block) in cases {
                write!(w, ", {case} => {block}")?;
            }
            if let Some(weights) = weights {
                let weights = weights.iter().map(ToString::to_string).collect::<Vec<_>>();
                write!(w, " !weights({})", weights.join(", "))?;
            }
            Ok(())
        }
        InstKind::Return { value: Some(value) } => write!(w, "ret {}", v(*value)),
        InstKind::Return { value: None } => write!(w, "ret"),
        InstKind::Unreachable => write!(w, "unreachable"),
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_function(f, self)
    }
}
