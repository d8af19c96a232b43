//! Replaces loads from constant memory with the bytes currently there.

use sable_ir::{Function, InstKind};
use tracing::info;

use crate::context::OptContext;

/// Folds to a fixpoint: a folded pointer can make the next load constant.
pub fn fold_const_loads(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    let mut folded = 0;
    loop {
        let mut changed = false;
        for inst in func.layout_insts() {
            let InstKind::Load {
                ptr,
                volatile: false,
            } = func.kind(inst)
            else {
                continue;
            };
            let Some(result) = func.inst_result(inst) else {
                continue;
            };
            let Some(address) = ctx.const_address(func, *ptr) else {
                continue;
            };
            let ty = func.value_type(result);
            let size = u64::from(ty.bytes());
            if !ctx.regions.is_const(address, size) {
                continue;
            }
            let Some(bits) = ctx.eval.peek(address, ty.bytes()) else {
                continue;
            };

            let constant = func.iconst(ty, bits);
            func.replace_all_uses(result, constant);
            func.remove_inst(inst);
            folded += 1;
            changed = true;
            if ctx.verbosity.ir() {
                info!(function = %func.name, inst = %inst, address = address, bits = bits, "folded constant load");
            }
        }
        if !changed {
            return folded;
        }
    }
}
