//! Natural loops found from back edges.

use ahash::AHashSet;
use sable_ir::{Block, DominatorTree, Function};

pub struct LoopData {
    pub header: Block,
    /// Every block of the loop, header first, in reverse post-order.
    pub blocks: Vec<Block>,
    members: AHashSet<Block>,
}

impl LoopData {
    pub fn contains(&self, block: Block) -> bool {
        self.members.contains(&block)
    }
}

pub struct LoopAnalysis {
    loops: Vec<LoopData>,
}

impl LoopAnalysis {
    /// Loops sorted innermost first. Back edges sharing a header form one loop.
    pub fn compute(func: &Function, domtree: &DominatorTree) -> Self {
        let rpo = domtree.rpo();
        let mut loops: Vec<LoopData> = Vec::new();

        for header in &rpo {
            let latches: Vec<Block> = func
                .predecessors(*header)
                .into_iter()
                .filter(|pred| domtree.block_dominates(*header, *pred))
                .collect();
            if latches.is_empty() {
                continue;
            }

            let mut members = AHashSet::new();
            members.insert(*header);
            let mut stack = latches;
            while let Some(block) = stack.pop() {
                if !members.insert(block) {
                    continue;
                }
                stack.extend(
                    func.predecessors(block)
                        .into_iter()
                        .filter(|pred| domtree.is_reachable(*pred)),
                );
            }
            let blocks = rpo
                .iter()
                .copied()
                .filter(|block| members.contains(block))
                .collect();
            loops.push(LoopData {
                header: *header,
                blocks,
                members,
            });
        }

        loops.sort_by_key(|lp| lp.blocks.len());
        Self { loops }
    }

    pub fn loops(&self) -> &[LoopData] {
        &self.loops
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}
