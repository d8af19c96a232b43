//! Drops reference-count updates on immortal objects.

use sable_ir::{BinaryOp, Function, Inst, InstKind, Value};
use tracing::info;

use crate::context::OptContext;

pub fn remove_immortal_refcounts(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    if ctx.immortals.is_empty() {
        return 0;
    }
    let mut removed = 0;
    for inst in func.layout_insts() {
        let InstKind::Store {
            ptr,
            value,
            volatile: false,
        } = func.kind(inst)
        else {
            continue;
        };
        let (ptr, value) = (*ptr, *value);
        if !is_refcount_update(func, ptr, value) {
            continue;
        }
        let Some(field) = ctx.const_address(func, ptr) else {
            continue;
        };
        let object = field.wrapping_sub(ctx.config.refcount_offset as u64);
        if !ctx.immortals.contains(object) {
            continue;
        }
        func.remove_inst(inst);
        removed += 1;
        if ctx.verbosity.ir() {
            info!(function = %func.name, inst = %inst, object = object, "removed refcount update on immortal object");
        }
    }
    removed
}

/// `value` is `load ptr + k` or `load ptr - k` for a constant `k`.
fn is_refcount_update(func: &Function, ptr: Value, value: Value) -> bool {
    let Some(inst) = func.value_inst(value) else {
        return false;
    };
    let (lhs, rhs) = match func.kind(inst) {
        InstKind::Binary {
            op: BinaryOp::Add | BinaryOp::Sub,
            lhs,
            rhs,
        } => (*lhs, *rhs),
        _ => return false,
    };
    func.const_bits(rhs).is_some() && loads_from(func, lhs, ptr)
}

pub(crate) fn loads_from(func: &Function, value: Value, ptr: Value) -> bool {
    func.value_inst(value)
        .map(|inst: Inst| func.kind(inst))
        .is_some_and(|kind| matches!(kind, InstKind::Load { ptr: p, .. } if *p == ptr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use sable_config::OptimizerConfig;
    use sable_ir::{FunctionBuilder, Signature, Type};

    #[test]
    fn test_only_immortal_objects_lose_refcount_stores() {
        let config = OptimizerConfig {
            refcount_offset: 8,
            ..OptimizerConfig::default()
        };
        let mut fixture = Fixture::new(config);
        fixture.immortals.register(0x5000);

        let mut func = Function::new("f", Signature::new(vec![], Type::Void));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let one = b.iconst(Type::I64, 1);
        let mut stores = Vec::new();
        for field in [0x5008, 0x6008] {
            let ptr = b.iconst(Type::Ptr, field);
            let count = b.load(Type::I64, ptr);
            let bumped = b.binary(BinaryOp::Add, count, one);
            stores.push(b.store(ptr, bumped));
        }
        b.ret(None);

        let removed = fixture.with(None, |ctx| remove_immortal_refcounts(&mut func, ctx));
        assert_eq!(removed, 1);
        assert!(!func.is_placed(stores[0]));
        assert!(func.is_placed(stores[1]));
    }
}
