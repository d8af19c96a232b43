use std::ops::AddAssign;

/// Changes made by one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCounters {
    pub calls_marked_noalias: u64,
    pub const_loads_folded: u64,
    pub notzero_assumes: u64,
    pub compares_folded: u64,
    pub loads_forwarded: u64,
    pub insts_simplified: u64,
    pub branches_folded: u64,
    pub blocks_removed: u64,
    pub dead_insts_removed: u64,
    pub redundant_insts_removed: u64,
    pub insts_hoisted: u64,
    pub stores_removed: u64,
    pub exception_checks_removed: u64,
    pub recursion_pairs_removed: u64,
    pub refcount_stores_removed: u64,
}

impl PassCounters {
    pub fn total(&self) -> u64 {
        self.to_pairs().iter().map(|(_, value)| value).sum()
    }

    /// Non-zero counters by name, in pass order.
    pub fn to_pairs(&self) -> Vec<(String, u64)> {
        [
            ("calls_marked_noalias", self.calls_marked_noalias),
            ("const_loads_folded", self.const_loads_folded),
            ("notzero_assumes", self.notzero_assumes),
            ("compares_folded", self.compares_folded),
            ("loads_forwarded", self.loads_forwarded),
            ("insts_simplified", self.insts_simplified),
            ("branches_folded", self.branches_folded),
            ("blocks_removed", self.blocks_removed),
            ("dead_insts_removed", self.dead_insts_removed),
            ("redundant_insts_removed", self.redundant_insts_removed),
            ("insts_hoisted", self.insts_hoisted),
            ("stores_removed", self.stores_removed),
            ("exception_checks_removed", self.exception_checks_removed),
            ("recursion_pairs_removed", self.recursion_pairs_removed),
            ("refcount_stores_removed", self.refcount_stores_removed),
        ]
        .into_iter()
        .filter(|(_, value)| *value > 0)
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }
}

impl AddAssign for PassCounters {
    fn add_assign(&mut self, other: Self) {
        self.calls_marked_noalias += other.calls_marked_noalias;
        self.const_loads_folded += other.const_loads_folded;
        self.notzero_assumes += other.notzero_assumes;
        self.compares_folded += other.compares_folded;
        self.loads_forwarded += other.loads_forwarded;
        self.insts_simplified += other.insts_simplified;
        self.branches_folded += other.branches_folded;
        self.blocks_removed += other.blocks_removed;
        self.dead_insts_removed += other.dead_insts_removed;
        self.redundant_insts_removed += other.redundant_insts_removed;
        self.insts_hoisted += other.insts_hoisted;
        self.stores_removed += other.stores_removed;
        self.exception_checks_removed += other.exception_checks_removed;
        self.recursion_pairs_removed += other.recursion_pairs_removed;
        self.refcount_stores_removed += other.refcount_stores_removed;
    }
}
