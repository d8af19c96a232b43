//! The classical cleanup battery.

pub mod constprop;
pub mod cse;
pub mod dce;
pub mod dse;
pub mod licm;
pub mod loops;

use sable_ir::Function;

use crate::counters::PassCounters;

pub use constprop::{ConstPropStats, propagate_constants, remove_unreachable_blocks};
pub use cse::eliminate_common_subexpressions;
pub use dce::{eliminate_dead_code, is_removable};
pub use dse::eliminate_redundant_stores;
pub use licm::hoist_loop_invariants;
pub use loops::{LoopAnalysis, LoopData};

/// Runs every cleanup pass until a round changes nothing or `max_rounds` is hit.
pub fn run_scalar(func: &mut Function, max_rounds: usize) -> PassCounters {
    let mut counters = PassCounters::default();
    for _ in 0..max_rounds.max(1) {
        let constprop = propagate_constants(func);
        let round = PassCounters {
            insts_simplified: constprop.simplified,
            branches_folded: constprop.branches_folded,
            blocks_removed: constprop.blocks_removed,
            dead_insts_removed: eliminate_dead_code(func),
            redundant_insts_removed: eliminate_common_subexpressions(func),
            insts_hoisted: hoist_loop_invariants(func),
            stores_removed: eliminate_redundant_stores(func),
            ..PassCounters::default()
        };
        counters += round;
        if round.total() == 0 {
            break;
        }
    }
    counters
}
