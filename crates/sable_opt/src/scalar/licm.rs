//! Loop-invariant code motion.

use ahash::AHashSet;
use sable_ir::{BinaryOp, Block, DominatorTree, Function, Inst, InstKind, Type, Value};

use crate::scalar::loops::{LoopAnalysis, LoopData};

/// Hoists pure, non-trapping instructions whose operands are defined outside
/// their loop into the loop's pre-header.
pub fn hoist_loop_invariants(func: &mut Function) -> u64 {
    let mut hoisted = 0;
    let mut visited: AHashSet<Block> = AHashSet::new();
    loop {
        // Pre-header creation changes the CFG, so the analysis is redone per loop.
        let domtree = DominatorTree::with_function(func);
        let analysis = LoopAnalysis::compute(func, &domtree);
        let Some(lp) = analysis
            .loops()
            .iter()
            .find(|lp| !visited.contains(&lp.header))
        else {
            return hoisted;
        };
        visited.insert(lp.header);
        hoisted += hoist_from_loop(func, &domtree, lp);
    }
}

fn hoist_from_loop(func: &mut Function, domtree: &DominatorTree, lp: &LoopData) -> u64 {
    let invariant = loop_invariant_instructions(func, lp);
    if invariant.is_empty() {
        return 0;
    }
    let Some(pre_header) = pre_header(func, domtree, lp) else {
        return 0;
    };
    let Some(jump) = func.terminator(pre_header) else {
        return 0;
    };
    let mut moved = 0;
    for inst in invariant {
        if func.move_before(inst, jump) {
            moved += 1;
        }
    }
    moved
}

fn is_hoistable(func: &Function, inst: Inst) -> bool {
    match func.kind(inst) {
        InstKind::Binary { op, rhs, .. } => match op {
            BinaryOp::UDiv | BinaryOp::URem => func.const_bits(*rhs).is_some_and(|bits| bits != 0),
            _ => !op.can_trap(),
        },
        InstKind::Icmp { .. }
        | InstKind::Cast { .. }
        | InstKind::Select { .. }
        | InstKind::Gep { .. }
        | InstKind::GepIndexed { .. } => true,
        _ => false,
    }
}

fn loop_invariant_instructions(func: &Function, lp: &LoopData) -> Vec<Inst> {
    let mut loop_values: AHashSet<Value> = AHashSet::new();
    let mut invariant = Vec::new();
    for block in &lp.blocks {
        for inst in func.block_insts(*block) {
            let operands = func.kind(*inst).operands();
            if is_hoistable(func, *inst) && !operands.iter().any(|v| loop_values.contains(v)) {
                invariant.push(*inst);
            } else if let Some(result) = func.inst_result(*inst) {
                loop_values.insert(result);
            }
        }
    }
    invariant
}

/// The block that jumps to the header from outside the loop, created if the
/// loop has none.
fn pre_header(func: &mut Function, domtree: &DominatorTree, lp: &LoopData) -> Option<Block> {
    let outside: Vec<Block> = func
        .predecessors(lp.header)
        .into_iter()
        .filter(|pred| !lp.contains(*pred) && domtree.is_reachable(*pred))
        .collect();

    match outside.as_slice() {
        [] => None,
        [single] if func.successors(*single).len() == 1 => Some(*single),
        _ => Some(create_pre_header(func, lp.header, &outside)),
    }
}

fn create_pre_header(func: &mut Function, header: Block, outside: &[Block]) -> Block {
    let after = outside.last().copied().unwrap_or(header);
    let pre_header = func.create_block_after(after);

    for phi in func.phis(header) {
        let Some(result) = func.inst_result(phi) else {
            continue;
        };
        let ty: Type = func.value_type(result);
        let InstKind::Phi { incoming } = func.kind(phi).clone() else {
            continue;
        };
        let (entering, staying): (Vec<_>, Vec<_>) = incoming
            .into_iter()
            .partition(|(pred, _)| outside.contains(pred));
        let merged = match entering.as_slice() {
            [(_, value)] => *value,
            _ => {
                let inner = func.append_inst(pre_header, InstKind::Phi { incoming: entering }, ty);
                match func.inst_result(inner) {
                    Some(value) => value,
                    None => continue,
                }
            }
        };
        let mut rebuilt = staying;
        rebuilt.push((pre_header, merged));
        func.replace_kind(phi, InstKind::Phi { incoming: rebuilt });
    }
    func.append_inst(pre_header, InstKind::Jump { dest: header }, Type::Void);

    for pred in outside {
        if let Some(term) = func.terminator(*pred) {
            func.kind_mut(term)
                .map_blocks(|dest| if dest == header { pre_header } else { dest });
        }
    }
    pre_header
}
