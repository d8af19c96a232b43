//! Teaches the fact engine about memory that is never zero.

use sable_ir::{Function, Inst, InstKind, IntCC, Type, Value};
use tracing::info;

use crate::context::OptContext;

/// Where the `assume` for a not-zero value goes.
enum Anchor {
    /// After a load from a not-zero region.
    After(Inst),
    /// Before a store into a not-zero region.
    Before(Inst),
}

/// Follows each load from a not-zero region with `assume(load != 0)` and
/// precedes each store into one with `assume(value != 0)`.
pub fn insert_notzero_assumes(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    let mut inserted = 0;
    for inst in func.layout_insts() {
        let Some((value, anchor)) = notzero_access(func, ctx, inst) else {
            continue;
        };
        if has_notzero_assume(func, value) {
            continue;
        }

        let zero = func.iconst(func.value_type(value), 0);
        let test = InstKind::Icmp {
            cc: IntCC::Ne,
            lhs: value,
            rhs: zero,
        };
        let cmp = match anchor {
            Anchor::After(at) => func.insert_after(at, test, Type::I1),
            Anchor::Before(at) => func.insert_before(at, test, Type::I1),
        };
        let Some(cmp) = cmp else {
            continue;
        };
        let Some(cond) = func.inst_result(cmp) else {
            continue;
        };
        func.insert_after(cmp, InstKind::Assume { cond }, Type::Void);
        inserted += 1;
        if ctx.verbosity.ir() {
            info!(function = %func.name, inst = %inst, "assumed value is not zero");
        }
    }
    inserted
}

/// The value moved by `inst` when it reads or writes not-zero memory.
fn notzero_access(func: &Function, ctx: &OptContext<'_>, inst: Inst) -> Option<(Value, Anchor)> {
    let (ptr, value, anchor) = match func.kind(inst) {
        InstKind::Load {
            ptr,
            volatile: false,
        } => (*ptr, func.inst_result(inst)?, Anchor::After(inst)),
        InstKind::Store {
            ptr,
            value,
            volatile: false,
        } => {
            // constants need no assume
            if func.const_bits(*value).is_some() {
                return None;
            }
            (*ptr, *value, Anchor::Before(inst))
        }
        _ => return None,
    };
    let address = ctx.const_address(func, ptr)?;
    let size = u64::from(func.value_type(value).bytes());
    ctx.regions
        .is_not_zero(address, size)
        .then_some((value, anchor))
}

fn has_notzero_assume(func: &Function, value: Value) -> bool {
    func.users(value).into_iter().any(|user| {
        is_notzero_test(func, user, value)
            && func
                .inst_result(user)
                .is_some_and(|cond| assumed(func, cond))
    })
}

fn is_notzero_test(func: &Function, inst: Inst, value: Value) -> bool {
    match func.kind(inst) {
        InstKind::Icmp {
            cc: IntCC::Ne,
            lhs,
            rhs,
        } => {
            (*lhs == value && func.const_bits(*rhs) == Some(0))
                || (*rhs == value && func.const_bits(*lhs) == Some(0))
        }
        _ => false,
    }
}

fn assumed(func: &Function, cond: Value) -> bool {
    func.users(cond)
        .into_iter()
        .any(|user| matches!(func.kind(user), InstKind::Assume { .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use sable_config::OptimizerConfig;
    use sable_facts::{IS_CONST, NOT_ZERO};
    use sable_ir::{FunctionBuilder, Signature};

    const SLOT: u64 = 0x4000;

    fn fixture() -> Fixture {
        let mut fixture = Fixture::new(OptimizerConfig::default());
        fixture
            .regions
            .add(SLOT, 8, IS_CONST | NOT_ZERO)
            .unwrap();
        fixture
    }

    /// Returns the `icmp ne` instructions that feed an `assume`, with the
    /// index of each in the entry block.
    fn assumed_tests(func: &Function) -> Vec<(usize, Value)> {
        let entry = func.entry_block().unwrap();
        func.block_insts(entry)
            .iter()
            .enumerate()
            .filter_map(|(index, inst)| match func.kind(*inst) {
                InstKind::Icmp {
                    cc: IntCC::Ne, lhs, ..
                } if func.inst_result(*inst).is_some_and(|cond| assumed(func, cond)) => {
                    Some((index, *lhs))
                }
                _ => None,
            })
            .collect()
    }

    fn position(func: &Function, inst: Inst) -> usize {
        func.inst_position(inst).unwrap().1
    }

    #[test]
    fn test_load_from_notzero_slot_is_assumed() {
        let fixture = fixture();
        let mut func = Function::new("read", Signature::new(vec![], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let slot = b.iconst(Type::Ptr, SLOT);
        let loaded = b.load(Type::I64, slot);
        b.ret(Some(loaded));

        let inserted = fixture.with(None, |ctx| insert_notzero_assumes(&mut func, ctx));
        assert_eq!(inserted, 1);
        let tests = assumed_tests(&func);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].1, loaded);
    }

    #[test]
    fn test_value_stored_into_notzero_slot_is_assumed() {
        let fixture = fixture();
        let mut func = Function::new("write", Signature::new(vec![Type::I64], Type::Void));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let slot = b.iconst(Type::Ptr, SLOT);
        let store = b.store(slot, x);
        b.ret(None);

        let inserted = fixture.with(None, |ctx| insert_notzero_assumes(&mut func, ctx));
        assert_eq!(inserted, 1);
        let tests = assumed_tests(&func);
        assert_eq!(tests.len(), 1);
        let (index, tested) = tests[0];
        assert_eq!(tested, x);
        assert!(index < position(&func, store));

        let again = fixture.with(None, |ctx| insert_notzero_assumes(&mut func, ctx));
        assert_eq!(again, 0);
    }

    #[test]
    fn test_stores_elsewhere_are_left_alone() {
        let fixture = fixture();
        let mut func = Function::new("spill", Signature::new(vec![Type::I64], Type::Void));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let other = b.iconst(Type::Ptr, SLOT + 0x100);
        b.store(other, x);
        let slot = b.iconst(Type::Ptr, SLOT);
        let seven = b.iconst(Type::I64, 7);
        b.store(slot, seven);
        b.ret(None);

        let inserted = fixture.with(None, |ctx| insert_notzero_assumes(&mut func, ctx));
        assert_eq!(inserted, 0);
        assert!(assumed_tests(&func).is_empty());
    }
}
