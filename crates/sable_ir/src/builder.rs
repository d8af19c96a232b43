//! Cursor-style construction of function bodies.

use crate::entities::{Block, Inst, Value};
use crate::function::Function;
use crate::instructions::{BinaryOp, CastOp, InstKind, IntCC};
use crate::types::{Signature, Type};

pub struct FunctionBuilder<'f> {
    pub func: &'f mut Function,
    current: Option<Block>,
}

impl<'f> FunctionBuilder<'f> {
    pub fn new(func: &'f mut Function) -> Self {
        Self {
            func,
            current: None,
        }
    }

    pub fn create_block(&mut self) -> Block {
        self.func.create_block()
    }

    pub fn switch_to_block(&mut self, block: Block) {
        self.current = Some(block);
    }

    pub fn current_block(&self) -> Option<Block> {
        self.current
    }

    pub fn param(&self, index: usize) -> Value {
        self.func.params[index]
    }

    pub fn iconst(&mut self, ty: Type, bits: u64) -> Value {
        self.func.iconst(ty, bits)
    }

    pub fn symbol(&mut self, name: &str) -> Value {
        self.func.symbol(name)
    }

    fn push(&mut self, kind: InstKind, ty: Type) -> Inst {
        let block = match self.current {
            Some(block) => block,
            None => {
                let block = self.func.create_block();
                self.current = Some(block);
                block
            }
        };
        self.func.append_inst(block, kind, ty)
    }

    fn push_value(&mut self, kind: InstKind, ty: Type) -> Value {
        let inst = self.push(kind, ty);
        self.func.insts[inst]
            .result
            .unwrap_or_else(|| unreachable!("non-void instruction without result"))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.func.value_type(lhs);
        self.push_value(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn icmp(&mut self, cc: IntCC, lhs: Value, rhs: Value) -> Value {
        self.push_value(InstKind::Icmp { cc, lhs, rhs }, Type::I1)
    }

    pub fn cast(&mut self, op: CastOp, arg: Value, ty: Type) -> Value {
        self.push_value(InstKind::Cast { op, arg }, ty)
    }

    pub fn select(&mut self, cond: Value, if_true: Value, if_false: Value) -> Value {
        let ty = self.func.value_type(if_true);
        self.push_value(
            InstKind::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        )
    }

    pub fn gep(&mut self, base: Value, offset: i64) -> Value {
        self.push_value(InstKind::Gep { base, offset }, Type::Ptr)
    }

    pub fn gep_indexed(&mut self, base: Value, index: Value, scale: i64) -> Value {
        self.push_value(InstKind::GepIndexed { base, index, scale }, Type::Ptr)
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> Value {
        self.push_value(
            InstKind::Load {
                ptr,
                volatile: false,
            },
            ty,
        )
    }

    pub fn volatile_load(&mut self, ty: Type, ptr: Value) -> Value {
        self.push_value(
            InstKind::Load {
                ptr,
                volatile: true,
            },
            ty,
        )
    }

    pub fn store(&mut self, ptr: Value, value: Value) -> Inst {
        self.push(
            InstKind::Store {
                ptr,
                value,
                volatile: false,
            },
            Type::Void,
        )
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(Block, Value)>) -> Value {
        self.push_value(InstKind::Phi { incoming }, ty)
    }

    /// Emits a call; the result, if any, is `inst_result` of the returned instruction.
    pub fn call(&mut self, callee: Value, args: Vec<Value>, sig: Signature) -> Inst {
        let ret = sig.ret;
        self.push(
            InstKind::Call {
                callee,
                args,
                sig,
                noalias: false,
            },
            ret,
        )
    }

    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.func.inst_result(inst)
    }

    pub fn assume(&mut self, cond: Value) -> Inst {
        self.push(InstKind::Assume { cond }, Type::Void)
    }

    pub fn jump(&mut self, dest: Block) -> Inst {
        self.push(InstKind::Jump { dest }, Type::Void)
    }

    pub fn branch(&mut self, cond: Value, then_dest: Block, else_dest: Block) -> Inst {
        self.push(
            InstKind::Branch {
                cond,
                then_dest,
                else_dest,
                weights: None,
            },
            Type::Void,
        )
    }

    pub fn switch(&mut self, value: Value, cases: Vec<(u64, Block)>, default: Block) -> Inst {
        self.push(
            InstKind::Switch {
                value,
                cases,
                default,
                weights: None,
            },
            Type::Void,
        )
    }

    pub fn ret(&mut self, value: Option<Value>) -> Inst {
        self.push(InstKind::Return { value }, Type::Void)
    }

    pub fn unreachable(&mut self) -> Inst {
        self.push(InstKind::Unreachable, Type::Void)
    }
}
