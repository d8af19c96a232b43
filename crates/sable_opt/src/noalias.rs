//! Marks calls to allocation functions as returning fresh memory.

use sable_ir::{Function, InstKind};
use tracing::info;

use crate::context::OptContext;

pub fn annotate_noalias(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    let mut marked = 0;
    for inst in func.layout_insts() {
        let InstKind::Call {
            callee,
            noalias: false,
            ..
        } = func.kind(inst)
        else {
            continue;
        };
        let Some(name) = ctx.callee_name(func, *callee) else {
            continue;
        };
        if !ctx.config.malloc_like.iter().any(|known| *known == name) {
            continue;
        }
        if let InstKind::Call { noalias, .. } = func.kind_mut(inst) {
            *noalias = true;
            marked += 1;
        }
        if ctx.verbosity.ir() {
            info!(function = %func.name, inst = %inst, callee = %name, "marked call noalias");
        }
    }
    marked
}
