//! A dominator tree represented as a mapping of blocks to their immediate dominator.

use cranelift_entity::SecondaryMap;
use cranelift_entity::packed_option::PackedOption;

use crate::entities::{Block, Inst};
use crate::function::Function;

#[derive(Clone, Default)]
struct DomNode {
    /// Immediate dominator, `None` for the entry and unreachable blocks.
    idom: PackedOption<Block>,
    /// Reverse postorder number, zero for unreachable blocks.
    rpo_number: u32,
}

/// Computed with the iterative algorithm of Cooper, Harvey and Kennedy.
pub struct DominatorTree {
    nodes: SecondaryMap<Block, DomNode>,
    postorder: Vec<Block>,
    children: SecondaryMap<Block, Vec<Block>>,
}

impl DominatorTree {
    pub fn with_function(func: &Function) -> Self {
        let mut tree = Self {
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            children: SecondaryMap::new(),
        };
        tree.compute(func);
        tree
    }

    fn compute(&mut self, func: &Function) {
        let Some(entry) = func.entry_block() else {
            return;
        };
        self.compute_postorder(func, entry);

        let count = self.postorder.len() as u32;
        for (index, block) in self.postorder.iter().enumerate() {
            // entry gets 1, unreachable blocks keep 0
            self.nodes[*block].rpo_number = count - index as u32;
        }

        let rpo: Vec<Block> = self.postorder.iter().rev().copied().collect();
        let preds: SecondaryMap<Block, Vec<Block>> = {
            let mut preds = SecondaryMap::new();
            for block in &rpo {
                for succ in func.successors(*block) {
                    let list: &mut Vec<Block> = &mut preds[succ];
                    if !list.contains(block) {
                        list.push(*block);
                    }
                }
            }
            preds
        };

        let mut changed = true;
        while changed {
            changed = false;
            for block in rpo.iter().skip(1) {
                let mut new_idom: Option<Block> = None;
                for pred in &preds[*block] {
                    if *pred != entry && self.nodes[*pred].idom.is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => *pred,
                        Some(current) => self.intersect(current, *pred, entry),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if self.nodes[*block].idom.expand() != Some(new_idom) {
                        self.nodes[*block].idom = new_idom.into();
                        changed = true;
                    }
                }
            }
        }

        for block in rpo.iter().skip(1) {
            if let Some(idom) = self.nodes[*block].idom.expand() {
                self.children[idom].push(*block);
            }
        }
    }

    fn compute_postorder(&mut self, func: &Function, entry: Block) {
        let mut visited: SecondaryMap<Block, bool> = SecondaryMap::new();
        let mut stack = vec![(entry, 0usize)];
        visited[entry] = true;
        while let Some((block, next)) = stack.pop() {
            let succs = func.successors(block);
            if let Some(succ) = succs.get(next) {
                stack.push((block, next + 1));
                if !visited[*succ] {
                    visited[*succ] = true;
                    stack.push((*succ, 0));
                }
            } else {
                self.postorder.push(block);
            }
        }
    }

    fn intersect(&self, mut a: Block, mut b: Block, entry: Block) -> Block {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                a = match self.nodes[a].idom.expand() {
                    Some(idom) => idom,
                    None => return entry,
                };
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                b = match self.nodes[b].idom.expand() {
                    Some(idom) => idom,
                    None => return entry,
                };
            }
        }
        a
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> Vec<Block> {
        self.postorder.iter().rev().copied().collect()
    }

    pub fn children(&self, block: Block) -> &[Block] {
        &self.children[block]
    }

    /// Reachable blocks in dominator tree preorder.
    pub fn preorder(&self) -> Vec<Block> {
        let mut out = Vec::with_capacity(self.postorder.len());
        let Some(root) = self.postorder.last().copied() else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(block) = stack.pop() {
            out.push(block);
            stack.extend(self.children[block].iter().rev().copied());
        }
        out
    }

    /// Whether block `a` dominates block `b`. Every block dominates itself;
    /// an unreachable `b` is dominated by nothing.
    pub fn block_dominates(&self, a: Block, mut b: Block) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let target = self.nodes[a].rpo_number;
        while self.nodes[b].rpo_number > target {
            b = match self.nodes[b].idom.expand() {
                Some(idom) => idom,
                None => return false,
            };
        }
        a == b
    }

    /// Whether instruction `a` dominates instruction `b`, inclusive within a block.
    pub fn dominates(&self, func: &Function, a: Inst, b: Inst) -> bool {
        let (Some((block_a, index_a)), Some((block_b, index_b))) =
            (func.inst_position(a), func.inst_position(b))
        else {
            return false;
        };
        if block_a == block_b {
            return self.is_reachable(block_a) && index_a <= index_b;
        }
        self.block_dominates(block_a, block_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::instructions::IntCC;
    use crate::types::{Signature, Type};

    #[test]
    fn test_diamond_with_unreachable_block() {
        let mut func = Function::new("f", Signature::new(vec![Type::I64], Type::Void));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let left = b.create_block();
        let right = b.create_block();
        let merge = b.create_block();
        let dead = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let zero = b.iconst(Type::I64, 0);
        let cond = b.icmp(IntCC::Eq, x, zero);
        b.branch(cond, left, right);
        b.switch_to_block(left);
        b.jump(merge);
        b.switch_to_block(right);
        b.jump(merge);
        b.switch_to_block(merge);
        let ret = b.ret(None);
        b.switch_to_block(dead);
        b.jump(merge);

        let tree = DominatorTree::with_function(&func);
        assert_eq!(tree.idom(merge), Some(entry));
        assert_eq!(tree.idom(left), Some(entry));
        assert!(tree.block_dominates(entry, merge));
        assert!(!tree.block_dominates(left, merge));
        assert!(tree.block_dominates(merge, merge));
        assert!(!tree.is_reachable(dead));
        assert!(!tree.block_dominates(entry, dead));
        assert_eq!(tree.preorder()[0], entry);
        assert_eq!(tree.rpo().len(), 4);

        let first = func.block_insts(entry)[0];
        assert!(tree.dominates(&func, first, ret));
        assert!(tree.dominates(&func, first, first));
        assert!(!tree.dominates(&func, ret, first));
    }

    #[test]
    fn test_loop_header_dominates_body() {
        let mut func = Function::new("loop", Signature::new(vec![Type::I1], Type::Void));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let header = b.create_block();
        let body = b.create_block();
        let exit = b.create_block();
        b.switch_to_block(entry);
        b.jump(header);
        b.switch_to_block(header);
        let c = b.param(0);
        b.branch(c, body, exit);
        b.switch_to_block(body);
        b.jump(header);
        b.switch_to_block(exit);
        b.ret(None);

        let tree = DominatorTree::with_function(&func);
        assert_eq!(tree.idom(body), Some(header));
        assert_eq!(tree.idom(exit), Some(header));
        assert!(!tree.block_dominates(body, header));
        assert_eq!(tree.children(header).len(), 2);
        assert!(tree.children(header).contains(&body));
    }
}
