//! Structural checks on functions.

use ahash::AHashSet;

use crate::dominator_tree::DominatorTree;
use crate::entities::{Block, Inst, Value};
use crate::error::IrError;
use crate::function::{Function, ValueDef};
use crate::instructions::InstKind;

/// Checks that the function is well formed:
///
/// - every block ends in exactly one terminator and phis lead their block
/// - phi predecessors are real predecessors
/// - operands are defined by placed instructions that dominate the use
///
/// Unreachable blocks are only checked for shape.
pub fn verify_function(func: &Function) -> Result<(), IrError> {
    if func.is_declaration() {
        return Ok(());
    }
    let fail = |message: String| IrError::Verify {
        function: func.name.clone(),
        message,
    };

    let layout: AHashSet<_> = func.layout.iter().copied().collect();
    let domtree = DominatorTree::with_function(func);

    for block in &func.layout {
        let insts = func.block_insts(*block);
        let Some(last) = insts.last() else {
            return Err(fail(format!("{block} is empty")));
        };
        if !func.kind(*last).is_terminator() {
            return Err(fail(format!("{block} does not end in a terminator")));
        }

        let mut seen_non_phi = false;
        for (index, inst) in insts.iter().enumerate() {
            let kind = func.kind(*inst);
            if func.inst_block(*inst) != Some(*block) {
                return Err(fail(format!("{inst} is not linked to {block}")));
            }
            if kind.is_terminator() && index + 1 != insts.len() {
                return Err(fail(format!("{inst} terminates {block} early")));
            }
            if kind.is_phi() {
                if seen_non_phi {
                    return Err(fail(format!("phi {inst} follows a non-phi in {block}")));
                }
            } else {
                seen_non_phi = true;
            }
            for succ in kind.successors() {
                if !layout.contains(&succ) {
                    return Err(fail(format!("{inst} branches to removed {succ}")));
                }
            }
        }

        if !domtree.is_reachable(*block) {
            continue;
        }

        let preds = func.predecessors(*block);
        for inst in insts {
            let kind = func.kind(*inst);
            if let InstKind::Phi { incoming } = kind {
                for (pred, value) in incoming {
                    if !preds.contains(pred) {
                        return Err(fail(format!("{inst} names {pred} which is not a predecessor")));
                    }
                    check_def(func, &domtree, *value, None, Some(*pred)).map_err(&fail)?;
                }
                continue;
            }
            for value in kind.operands() {
                check_def(func, &domtree, value, Some(*inst), None).map_err(&fail)?;
            }
        }
    }
    Ok(())
}

/// A use either at an instruction or at the end of a predecessor block.
fn check_def(
    func: &Function,
    domtree: &DominatorTree,
    value: Value,
    user: Option<Inst>,
    pred_end: Option<Block>,
) -> Result<(), String> {
    let Some(data) = func.values.get(value) else {
        return Err(format!("{value} does not exist"));
    };
    let def = match &data.def {
        ValueDef::Inst(def) => *def,
        ValueDef::Param(_) | ValueDef::Const(_) | ValueDef::Symbol(_) => return Ok(()),
    };
    let Some(def_block) = func.inst_block(def) else {
        return Err(format!("{value} is defined by removed {def}"));
    };

    let dominated = match (user, pred_end) {
        (Some(user), _) => user != def && domtree.dominates(func, def, user),
        (None, Some(pred)) => {
            !domtree.is_reachable(pred) || domtree.block_dominates(def_block, pred)
        }
        (None, None) => true,
    };
    if dominated {
        Ok(())
    } else {
        Err(format!("{value} does not dominate its use"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::instructions::BinaryOp;
    use crate::types::{Signature, Type};

    #[test]
    fn test_valid_loop_verifies() {
        let mut func = Function::new("count", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let header = b.create_block();
        let exit = b.create_block();
        b.switch_to_block(entry);
        let zero = b.iconst(Type::I64, 0);
        b.jump(header);
        b.switch_to_block(header);
        let n = b.param(0);
        let one = b.iconst(Type::I64, 1);
        let i = b.phi(Type::I64, vec![(entry, zero)]);
        let next = b.binary(BinaryOp::Add, i, one);
        let done = b.icmp(crate::instructions::IntCC::Eq, next, n);
        b.branch(done, exit, header);
        b.switch_to_block(exit);
        b.ret(Some(next));

        let phi = func.value_inst(i).unwrap();
        if let InstKind::Phi { incoming } = func.kind_mut(phi) {
            incoming.push((header, next));
        }
        verify_function(&func).unwrap();
    }

    #[test]
    fn test_use_before_def_is_rejected() {
        let mut func = Function::new("bad", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let first = b.binary(BinaryOp::Add, x, x);
        let second = b.binary(BinaryOp::Mul, first, x);
        b.ret(Some(second));
        verify_function(&func).unwrap();

        func.blocks[entry].insts.swap(0, 1);
        let err = verify_function(&func).unwrap_err();
        assert!(err.to_string().contains("does not dominate"));
    }

    #[test]
    fn test_missing_terminator_is_rejected() {
        let mut func = Function::new("open", Signature::new(vec![], Type::Void));
        let entry = func.create_block();
        let one = func.iconst(Type::I64, 1);
        func.append_inst(
            entry,
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: one,
                rhs: one,
            },
            Type::I64,
        );
        let err = verify_function(&func).unwrap_err();
        assert!(err.to_string().contains("terminator"));
    }
}
