//! Functions: arenas of blocks, instructions and values plus the block layout.

use ahash::AHashMap;
use cranelift_entity::PrimaryMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::entities::{Block, Inst, Value};
use crate::instructions::InstKind;
use crate::types::{Signature, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueDef {
    Inst(Inst),
    Param(u32),
    Const(u64),
    /// Address of a named symbol in the process image.
    Symbol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamAttrs {
    pub nonnull: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockData {
    pub insts: Vec<Inst>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstData {
    pub kind: InstKind,
    pub result: Option<Value>,
    /// `None` once the instruction has been removed.
    pub block: Option<Block>,
}

/// A routine in SSA form. A function without blocks is a declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub sig: Signature,
    pub params: Vec<Value>,
    pub param_attrs: Vec<ParamAttrs>,
    pub blocks: PrimaryMap<Block, BlockData>,
    pub layout: Vec<Block>,
    pub insts: PrimaryMap<Inst, InstData>,
    pub values: PrimaryMap<Value, ValueData>,
    #[serde(skip)]
    consts: AHashMap<(Type, u64), Value>,
    #[serde(skip)]
    symbols: AHashMap<String, Value>,
}

impl Function {
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        let mut values = PrimaryMap::new();
        let params = sig
            .params
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                values.push(ValueData {
                    ty: *ty,
                    def: ValueDef::Param(index as u32),
                })
            })
            .collect::<Vec<_>>();
        let param_attrs = vec![ParamAttrs::default(); params.len()];

        Self {
            name: name.into(),
            sig,
            params,
            param_attrs,
            blocks: PrimaryMap::new(),
            layout: Vec::new(),
            insts: PrimaryMap::new(),
            values,
            consts: AHashMap::new(),
            symbols: AHashMap::new(),
        }
    }

    /// Rebuilds the constant pools after deserialization.
    pub fn reindex(&mut self) {
        self.consts.clear();
        self.symbols.clear();
        for (value, data) in self.values.iter() {
            match &data.def {
                ValueDef::Const(bits) => {
                    self.consts.entry((data.ty, *bits)).or_insert(value);
                }
                ValueDef::Symbol(name) => {
                    self.symbols.entry(name.clone()).or_insert(value);
                }
                ValueDef::Inst(_) | ValueDef::Param(_) => {}
            }
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.layout.first().copied()
    }

    // ---- values ----

    pub fn value_type(&self, value: Value) -> Type {
        self.values[value].ty
    }

    pub fn value_def(&self, value: Value) -> &ValueDef {
        &self.values[value].def
    }

    /// Interned integer, pointer or float-bits constant.
    pub fn iconst(&mut self, ty: Type, bits: u64) -> Value {
        let bits = if ty == Type::F64 {
            bits
        } else {
            ty.normalize(bits)
        };
        if let Some(value) = self.consts.get(&(ty, bits)) {
            return *value;
        }
        let value = self.values.push(ValueData {
            ty,
            def: ValueDef::Const(bits),
        });
        self.consts.insert((ty, bits), value);
        value
    }

    /// Interned pointer to a named symbol.
    pub fn symbol(&mut self, name: &str) -> Value {
        if let Some(value) = self.symbols.get(name) {
            return *value;
        }
        let value = self.values.push(ValueData {
            ty: Type::Ptr,
            def: ValueDef::Symbol(name.to_string()),
        });
        self.symbols.insert(name.to_string(), value);
        value
    }

    pub fn const_bits(&self, value: Value) -> Option<u64> {
        match self.values[value].def {
            ValueDef::Const(bits) => Some(bits),
            _ => None,
        }
    }

    pub fn symbol_name(&self, value: Value) -> Option<&str> {
        match &self.values[value].def {
            ValueDef::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_constant(&self, value: Value) -> bool {
        matches!(
            self.values[value].def,
            ValueDef::Const(_) | ValueDef::Symbol(_)
        )
    }

    pub fn value_inst(&self, value: Value) -> Option<Inst> {
        match self.values[value].def {
            ValueDef::Inst(inst) => Some(inst),
            _ => None,
        }
    }

    pub fn param_index(&self, value: Value) -> Option<usize> {
        match self.values[value].def {
            ValueDef::Param(index) => Some(index as usize),
            _ => None,
        }
    }

    // ---- instructions ----

    /// Creates an unplaced instruction with a result of type `ty` unless it is void.
    pub fn make_inst(&mut self, kind: InstKind, ty: Type) -> Inst {
        let inst = self.insts.push(InstData {
            kind,
            result: None,
            block: None,
        });
        if ty != Type::Void {
            let value = self.values.push(ValueData {
                ty,
                def: ValueDef::Inst(inst),
            });
            self.insts[inst].result = Some(value);
        }
        inst
    }

    pub fn kind(&self, inst: Inst) -> &InstKind {
        &self.insts[inst].kind
    }

    pub fn kind_mut(&mut self, inst: Inst) -> &mut InstKind {
        &mut self.insts[inst].kind
    }

    pub fn inst_result(&self, inst: Inst) -> Option<Value> {
        self.insts[inst].result
    }

    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block
    }

    pub fn is_placed(&self, inst: Inst) -> bool {
        self.insts[inst].block.is_some()
    }

    pub fn append_inst(&mut self, block: Block, kind: InstKind, ty: Type) -> Inst {
        let inst = self.make_inst(kind, ty);
        self.blocks[block].insts.push(inst);
        self.insts[inst].block = Some(block);
        inst
    }

    pub fn insert_inst(&mut self, block: Block, index: usize, kind: InstKind, ty: Type) -> Inst {
        let inst = self.make_inst(kind, ty);
        self.blocks[block].insts.insert(index, inst);
        self.insts[inst].block = Some(block);
        inst
    }

    pub fn insert_before(&mut self, before: Inst, kind: InstKind, ty: Type) -> Option<Inst> {
        let (block, index) = self.inst_position(before)?;
        Some(self.insert_inst(block, index, kind, ty))
    }

    pub fn insert_after(&mut self, after: Inst, kind: InstKind, ty: Type) -> Option<Inst> {
        let (block, index) = self.inst_position(after)?;
        Some(self.insert_inst(block, index + 1, kind, ty))
    }

    pub fn inst_position(&self, inst: Inst) -> Option<(Block, usize)> {
        let block = self.insts[inst].block?;
        let index = self.blocks[block]
            .insts
            .iter()
            .position(|candidate| *candidate == inst)?;
        Some((block, index))
    }

    /// Unlinks `inst` from its block. Its result must no longer be used.
    pub fn remove_inst(&mut self, inst: Inst) {
        if let Some((block, index)) = self.inst_position(inst) {
            self.blocks[block].insts.remove(index);
        }
        self.insts[inst].block = None;
    }

    /// Replaces the operation of `inst` in place, keeping its position and result.
    pub fn replace_kind(&mut self, inst: Inst, kind: InstKind) {
        self.insts[inst].kind = kind;
    }

    /// Moves a placed instruction right before `before`.
    pub fn move_before(&mut self, inst: Inst, before: Inst) -> bool {
        if inst == before || self.inst_position(before).is_none() {
            return false;
        }
        self.remove_inst(inst);
        let Some((block, index)) = self.inst_position(before) else {
            return false;
        };
        self.blocks[block].insts.insert(index, inst);
        self.insts[inst].block = Some(block);
        true
    }

    // ---- blocks ----

    /// Creates a block and appends it to the layout.
    pub fn create_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        self.layout.push(block);
        block
    }

    /// Creates a block placed right after `after` in the layout.
    pub fn create_block_after(&mut self, after: Block) -> Block {
        let block = self.blocks.push(BlockData::default());
        let index = self
            .layout
            .iter()
            .position(|candidate| *candidate == after)
            .map_or(self.layout.len(), |index| index + 1);
        self.layout.insert(index, block);
        block
    }

    pub fn block_insts(&self, block: Block) -> &[Inst] {
        &self.blocks[block].insts
    }

    pub fn is_in_layout(&self, block: Block) -> bool {
        self.layout.contains(&block)
    }

    pub fn terminator(&self, block: Block) -> Option<Inst> {
        let last = *self.blocks[block].insts.last()?;
        self.insts[last].kind.is_terminator().then_some(last)
    }

    pub fn first_non_phi(&self, block: Block) -> Option<Inst> {
        self.blocks[block]
            .insts
            .iter()
            .copied()
            .find(|inst| !self.insts[*inst].kind.is_phi())
    }

    pub fn phis(&self, block: Block) -> Vec<Inst> {
        self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|inst| self.insts[*inst].kind.is_phi())
            .collect()
    }

    pub fn successors(&self, block: Block) -> SmallVec<[Block; 2]> {
        self.terminator(block)
            .map(|term| self.insts[term].kind.successors())
            .unwrap_or_default()
    }

    /// Predecessor edges of `block`, one entry per edge.
    pub fn predecessor_edges(&self, block: Block) -> Vec<Block> {
        let mut preds = Vec::new();
        for candidate in &self.layout {
            for succ in self.successors(*candidate) {
                if succ == block {
                    preds.push(*candidate);
                }
            }
        }
        preds
    }

    pub fn predecessors(&self, block: Block) -> Vec<Block> {
        let mut preds = self.predecessor_edges(block);
        preds.dedup();
        preds
    }

    /// The only block with an edge into `block`, when there is exactly one edge.
    pub fn single_predecessor(&self, block: Block) -> Option<Block> {
        match self.predecessor_edges(block).as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Placed instructions in layout order.
    pub fn layout_insts(&self) -> Vec<Inst> {
        self.layout
            .iter()
            .flat_map(|block| self.blocks[*block].insts.iter().copied())
            .collect()
    }

    pub fn inst_count(&self) -> usize {
        self.layout
            .iter()
            .map(|block| self.blocks[*block].insts.len())
            .sum()
    }

    /// Placed instructions that read `value`.
    pub fn users(&self, value: Value) -> Vec<Inst> {
        self.layout_insts()
            .into_iter()
            .filter(|inst| self.insts[*inst].kind.operands().contains(&value))
            .collect()
    }

    pub fn has_uses(&self, value: Value) -> bool {
        self.layout.iter().any(|block| {
            self.blocks[*block]
                .insts
                .iter()
                .any(|inst| self.insts[*inst].kind.operands().contains(&value))
        })
    }

    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        if old == new {
            return;
        }
        for inst in self.layout_insts() {
            self.insts[inst]
                .kind
                .map_operands(|value| if value == old { new } else { value });
        }
    }

    /// Moves `insts[index..]` of `block` into a new block placed after it.
    ///
    /// Phis in the successors of the moved terminator are updated to name the
    /// new block as their predecessor. `block` is left without a terminator.
    pub fn split_block(&mut self, block: Block, index: usize) -> Block {
        let tail = self.blocks[block].insts.split_off(index);
        let new_block = self.create_block_after(block);
        for inst in &tail {
            self.insts[*inst].block = Some(new_block);
        }
        self.blocks[new_block].insts = tail;

        for succ in self.successors(new_block) {
            self.retarget_phis(succ, block, new_block);
        }
        new_block
    }

    /// Renames predecessor `from` to `to` in the phis of `block`.
    pub fn retarget_phis(&mut self, block: Block, from: Block, to: Block) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming } = &mut self.insts[phi].kind {
                for (pred, _) in incoming.iter_mut() {
                    if *pred == from {
                        *pred = to;
                    }
                }
            }
        }
    }

    /// Drops the phi entries of `block` that come from `pred`.
    pub fn remove_phi_incoming(&mut self, block: Block, pred: Block) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming } = &mut self.insts[phi].kind {
                incoming.retain(|(from, _)| *from != pred);
            }
        }
    }

    /// Removes `block` from the layout, unlinking its instructions and its
    /// entries in successor phis.
    pub fn remove_block(&mut self, block: Block) {
        for succ in self.successors(block) {
            self.remove_phi_incoming(succ, block);
        }
        for inst in std::mem::take(&mut self.blocks[block].insts) {
            self.insts[inst].block = None;
        }
        self.layout.retain(|candidate| *candidate != block);
    }
}
