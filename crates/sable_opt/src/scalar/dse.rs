//! Redundant store elimination within a block.

use ahash::AHashMap;
use sable_ir::{Function, Inst, InstKind, Value};

/// Removes stores that are overwritten before anything can observe them, and
/// stores that write back the value just loaded from the same address.
pub fn eliminate_redundant_stores(func: &mut Function) -> u64 {
    let mut doomed = Vec::new();
    for block in func.layout.clone() {
        // (ptr, width) -> store not yet observed by a read.
        let mut unread: AHashMap<(Value, u32), Inst> = AHashMap::new();
        // loaded value -> (ptr, width) whose memory still holds it.
        let mut loaded: AHashMap<Value, (Value, u32)> = AHashMap::new();

        for inst in func.block_insts(block) {
            match func.kind(*inst) {
                InstKind::Store {
                    ptr,
                    value,
                    volatile: false,
                } => {
                    let width = func.value_type(*value).bytes();
                    if loaded.get(value) == Some(&(*ptr, width)) {
                        doomed.push(*inst);
                        continue;
                    }
                    if let Some(earlier) = unread.insert((*ptr, width), *inst) {
                        doomed.push(earlier);
                    }
                    loaded.clear();
                }
                InstKind::Load {
                    ptr,
                    volatile: false,
                } => {
                    unread.clear();
                    if let Some(result) = func.inst_result(*inst) {
                        loaded.insert(result, (*ptr, func.value_type(result).bytes()));
                    }
                }
                InstKind::Store { .. } | InstKind::Load { .. } | InstKind::Call { .. } => {
                    unread.clear();
                    loaded.clear();
                }
                _ => {}
            }
        }
    }

    for inst in &doomed {
        func.remove_inst(*inst);
    }
    doomed.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ir::{BinaryOp, FunctionBuilder, Signature, Type};

    #[test]
    fn test_overwritten_store_is_removed() {
        let sig = Signature::new(vec![Type::Ptr, Type::I64], Type::I64);
        let mut func = Function::new("f", sig);
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let (ptr, x) = (b.param(0), b.param(1));
        let first = b.store(ptr, x);
        let one = b.iconst(Type::I64, 1);
        let next = b.binary(BinaryOp::Add, x, one);
        let second = b.store(ptr, next);
        let read = b.load(Type::I64, ptr);
        let third = b.store(ptr, read);
        b.ret(Some(read));

        assert_eq!(eliminate_redundant_stores(&mut func), 2);
        assert!(!func.is_placed(first));
        assert!(func.is_placed(second));
        assert!(!func.is_placed(third));
    }

    #[test]
    fn test_intervening_load_keeps_store() {
        let sig = Signature::new(vec![Type::Ptr, Type::Ptr, Type::I64], Type::I64);
        let mut func = Function::new("f", sig);
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let (ptr, other, x) = (b.param(0), b.param(1), b.param(2));
        b.store(ptr, x);
        let seen = b.load(Type::I64, other);
        b.store(ptr, seen);
        b.ret(Some(seen));

        assert_eq!(eliminate_redundant_stores(&mut func), 0);
    }
}
