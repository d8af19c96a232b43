//! Exception-check elimination.
//!
//! A block can throw when it makes a call that may leave an exception
//! pending, or stores a reference (which may release the old one and run
//! arbitrary finalizers). Everything reachable from such a block may observe
//! the exception. Exception queries anywhere else are known to return zero.

use ahash::AHashSet;
use sable_ir::{Block, Function, Inst, InstKind};
use tracing::info;

use crate::context::OptContext;

pub fn remove_exception_checks(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    if ctx.config.exception_queries.is_empty() {
        return 0;
    }

    let mut queries: Vec<(Block, Inst)> = Vec::new();
    let mut throwing: Vec<Block> = Vec::new();
    for block in &func.layout {
        let mut can_throw = false;
        for inst in func.block_insts(*block) {
            match func.kind(*inst) {
                InstKind::Call { callee, .. } => {
                    let name = ctx.callee_name(func, *callee);
                    let is_query = name
                        .as_ref()
                        .is_some_and(|name| ctx.config.exception_queries.contains(name));
                    if is_query {
                        queries.push((*block, *inst));
                    } else if !name
                        .as_ref()
                        .is_some_and(|name| ctx.config.non_raising_calls.contains(name))
                    {
                        can_throw = true;
                    }
                }
                InstKind::Store { value, .. } if func.value_type(*value).is_ptr() => {
                    can_throw = true;
                }
                _ => {}
            }
        }
        if can_throw {
            throwing.push(*block);
        }
    }

    let mut tainted: AHashSet<Block> = AHashSet::new();
    let mut stack = throwing;
    while let Some(block) = stack.pop() {
        if !tainted.insert(block) {
            continue;
        }
        stack.extend(func.successors(block));
    }

    let mut removed = 0;
    for (block, query) in queries {
        if tainted.contains(&block) {
            continue;
        }
        if let Some(result) = func.inst_result(query) {
            let zero = func.iconst(func.value_type(result), 0);
            func.replace_all_uses(result, zero);
        }
        func.remove_inst(query);
        removed += 1;
        if ctx.verbosity.ir() {
            info!(function = %func.name, block = %block, "removed exception check");
        }
    }
    removed
}
