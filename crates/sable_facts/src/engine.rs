//! Derive, propagate, collect and apply.
//!
//! Derive walks the routine once and records facts implied by control flow,
//! assumes, stores and producers. Each recorded fact is pushed backward
//! through the instructions that computed the value (propagate). Queries
//! (collect) gather every fact visible at an instruction, pulling facts
//! forward through phis, address arithmetic, casts and loads. Apply uses the
//! queries to fold equality comparisons and forward loads.

use sable_config::Verbosity;
use sable_ir::{
    CastOp, DominatorTree, Evaluator, Function, Inst, InstKind, IntCC, Type, Value, ValueDef,
};
use tracing::{info, trace};

use crate::consts::ConstRegions;
use crate::error::FactError;
use crate::factset::{Domain, FactSet, FactTable};
use crate::knowledge::{Knowledge, KnownValue};
use crate::location::Location;
use crate::producers::FactProducers;

/// Recursion cap for propagate and collect.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub compares_folded: usize,
    pub loads_replaced: usize,
    /// Derive/apply rounds run.
    pub rounds: usize,
}

impl ApplyStats {
    pub fn changes(&self) -> usize {
        self.compares_folded + self.loads_replaced
    }

    fn merge(&mut self, other: ApplyStats) {
        self.compares_folded += other.compares_folded;
        self.loads_replaced += other.loads_replaced;
        self.rounds += other.rounds;
    }
}

pub struct FactEngine<'a> {
    eval: &'a Evaluator<'a>,
    producers: &'a FactProducers,
    regions: &'a ConstRegions,
    verbosity: Verbosity,
}

/// Everything a query needs about the routine being inspected.
struct Query<'q> {
    func: &'q Function,
    table: &'q FactTable,
    domtree: &'q DominatorTree,
}

impl<'a> FactEngine<'a> {
    pub fn new(
        eval: &'a Evaluator<'a>,
        producers: &'a FactProducers,
        regions: &'a ConstRegions,
    ) -> Self {
        Self {
            eval,
            producers,
            regions,
            verbosity: Verbosity::Silent,
        }
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Derives and applies until a sweep changes nothing or `max_rounds`
    /// sweeps have run.
    pub fn run(&self, func: &mut Function, max_rounds: usize) -> Result<ApplyStats, FactError> {
        let mut total = ApplyStats::default();
        if func.is_declaration() {
            return Ok(total);
        }
        for _ in 0..max_rounds.max(1) {
            let table = self.derive(func)?;
            let mut stats = self.apply(func, &table)?;
            stats.rounds = 1;
            total.merge(stats);
            if stats.changes() == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// One forward pass over the routine.
    pub fn derive(&self, func: &Function) -> Result<FactTable, FactError> {
        let mut table = FactTable::new();
        for inst in func.layout_insts() {
            match func.kind(inst) {
                InstKind::Branch {
                    cond,
                    then_dest,
                    else_dest,
                    ..
                } => {
                    for (succ, taken) in [(*then_dest, 1), (*else_dest, 0)] {
                        let Some(domain) = edge_domain(func, succ) else {
                            continue;
                        };
                        let knowledge = Knowledge::with_value(KnownValue::Const(taken));
                        self.attach(func, &mut table, *cond, domain, Location::root(), knowledge, 0)?;
                    }
                }
                InstKind::Switch { value, cases, .. } => {
                    for (case, succ) in cases {
                        let Some(domain) = edge_domain(func, *succ) else {
                            continue;
                        };
                        let knowledge = Knowledge::with_value(KnownValue::Const(*case));
                        self.attach(func, &mut table, *value, domain, Location::root(), knowledge, 0)?;
                    }
                }
                InstKind::Assume { cond } => {
                    let knowledge = Knowledge::with_value(KnownValue::Const(1));
                    self.attach(
                        func,
                        &mut table,
                        *cond,
                        Domain::From(inst),
                        Location::root(),
                        knowledge,
                        0,
                    )?;
                }
                InstKind::Store {
                    ptr,
                    value,
                    volatile: false,
                } => {
                    let loc = Location::at(0, func.value_type(*value).bytes());
                    let settled = table
                        .get(*ptr, Domain::Routine)
                        .and_then(|set| set.get(&loc))
                        .is_some_and(Knowledge::has_unconditional_value);
                    if !settled {
                        let knowledge = Knowledge {
                            known_value: Some(self.known_value(func, *value)?),
                            known_at: Some(inst),
                            ..Knowledge::default()
                        };
                        self.attach(func, &mut table, *ptr, Domain::Routine, loc, knowledge, 0)?;
                    }
                }
                _ => {}
            }

            if let Some(result) = func.inst_result(inst) {
                let set = table.entry(result, Domain::Routine);
                if self.producers.derive(func, result, set, self.eval) {
                    self.propagate(func, &mut table, result, Domain::Routine, 0)?;
                }
            }
        }
        Ok(table)
    }

    #[allow(clippy::too_many_arguments)]
    fn attach(
        &self,
        func: &Function,
        table: &mut FactTable,
        value: Value,
        domain: Domain,
        loc: Location,
        knowledge: Knowledge,
        depth: usize,
    ) -> Result<(), FactError> {
        if self.verbosity.interpreting() {
            trace!(
                function = %func.name,
                value = %value,
                domain = %domain,
                location = %loc,
                knowledge = %knowledge,
                "attach fact"
            );
        }
        if table.entry(value, domain).add(loc, &knowledge) {
            self.propagate(func, table, value, domain, depth)?;
        }
        Ok(())
    }

    /// Pushes the facts of `value` in `domain` into the values it was computed from.
    fn propagate(
        &self,
        func: &Function,
        table: &mut FactTable,
        value: Value,
        domain: Domain,
        depth: usize,
    ) -> Result<(), FactError> {
        if depth > MAX_DEPTH {
            return Ok(());
        }
        let set = table.entry(value, domain);
        self.producers.derive(func, value, set, self.eval);
        let facts = set.clone();
        let root = facts.root();

        let Some(inst) = func.value_inst(value) else {
            return Ok(());
        };
        match func.kind(inst) {
            InstKind::Icmp { cc, lhs, rhs } if cc.is_equality() => {
                let Some(KnownValue::Const(result)) = root.unconditional_value() else {
                    return Ok(());
                };
                let equal = (result != 0) == cc.is_true_when_equal();
                let (other, constant) = match (self.eval(func, *lhs)?, self.eval(func, *rhs)?) {
                    (None, Some(constant)) => (*lhs, constant),
                    (Some(constant), None) => (*rhs, constant),
                    _ => return Ok(()),
                };
                let ty = func.value_type(other);
                let knowledge = if equal {
                    Knowledge::with_value(KnownValue::Const(ty.normalize(constant)))
                } else if ty.normalize(constant) == 0 {
                    Knowledge::nonzero()
                } else {
                    return Ok(());
                };
                self.attach(func, table, other, domain, Location::root(), knowledge, depth + 1)?;
            }
            InstKind::Cast { op, arg } if is_same_width_reinterpret(func, *op, *arg, value) => {
                if table.entry(*arg, domain).union(&facts) {
                    self.propagate(func, table, *arg, domain, depth + 1)?;
                }
            }
            InstKind::Gep { base, offset } => {
                let moved = if *offset == 0 {
                    facts
                } else {
                    let mut moved = FactSet::new();
                    for (loc, knowledge) in facts.iter().filter(|(loc, _)| !loc.is_root()) {
                        moved.add(loc.translate(*offset), knowledge);
                    }
                    moved
                };
                if table.entry(*base, domain).union(&moved) {
                    self.propagate(func, table, *base, domain, depth + 1)?;
                }
            }
            InstKind::Load {
                ptr,
                volatile: false,
            } => {
                let Some(known) = root.known_value else {
                    return Ok(());
                };
                let knowledge = Knowledge {
                    known_value: Some(known),
                    known_at: Some(inst),
                    ..Knowledge::default()
                };
                let loc = Location::at(0, func.value_type(value).bytes());
                self.attach(func, table, *ptr, domain, loc, knowledge, depth + 1)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Every fact about `value` that holds at `at`.
    pub fn facts(
        &self,
        func: &Function,
        table: &FactTable,
        domtree: &DominatorTree,
        value: Value,
        at: Inst,
    ) -> Result<FactSet, FactError> {
        let query = Query {
            func,
            table,
            domtree,
        };
        let mut active = Vec::new();
        self.collect(&query, value, at, 0, &mut active)
    }

    fn collect(
        &self,
        query: &Query<'_>,
        value: Value,
        at: Inst,
        depth: usize,
        active: &mut Vec<Value>,
    ) -> Result<FactSet, FactError> {
        let mut result = FactSet::new();
        // A value reached again through its own definition knows nothing new.
        if depth > MAX_DEPTH || active.contains(&value) {
            return Ok(result);
        }
        active.push(value);
        let collected = self.collect_inner(query, value, at, depth, active, &mut result);
        active.pop();
        collected?;

        self.producers
            .derive(query.func, value, &mut result, self.eval);
        if self.verbosity.interpreting() && !result.is_empty() {
            trace!(value = %value, at = %at, facts = %result, "collected facts");
        }
        Ok(result)
    }

    fn collect_inner(
        &self,
        query: &Query<'_>,
        value: Value,
        at: Inst,
        depth: usize,
        active: &mut Vec<Value>,
        result: &mut FactSet,
    ) -> Result<(), FactError> {
        let func = query.func;
        for (domain, set) in query.table.domains(value) {
            let visible = match domain {
                Domain::Routine => true,
                Domain::From(entry) => query.domtree.dominates(func, *entry, at),
            };
            if visible {
                result.union(set);
            }
        }

        let inst = match func.value_def(value) {
            ValueDef::Const(_) | ValueDef::Symbol(_) => {
                if let Some(bits) = self.eval(func, value)? {
                    let mut knowledge = Knowledge::with_value(KnownValue::Const(bits));
                    knowledge.nonzero = bits != 0;
                    result.add(Location::root(), &knowledge);
                }
                return Ok(());
            }
            ValueDef::Param(_) => return Ok(()),
            ValueDef::Inst(inst) => *inst,
        };

        match func.kind(inst) {
            InstKind::Phi { incoming } => {
                let mut merged: Option<FactSet> = None;
                for (_, incoming_value) in incoming {
                    let from_phi = func
                        .value_inst(*incoming_value)
                        .is_some_and(|def| func.kind(def).is_phi());
                    if from_phi {
                        merged = Some(FactSet::new());
                        break;
                    }
                    let facts = self.collect(query, *incoming_value, at, depth + 1, active)?;
                    match merged.as_mut() {
                        Some(merged) => merged.intersect(&facts),
                        None => merged = Some(facts),
                    }
                }
                if let Some(merged) = merged {
                    result.union(&merged);
                }
            }
            InstKind::Gep { base, offset } => {
                let base_facts = self.collect(query, *base, at, depth + 1, active)?;
                for (loc, knowledge) in base_facts.iter() {
                    if loc.is_root() {
                        if knowledge.heap_alloc {
                            result.root_mut().heap_alloc = true;
                        }
                    } else {
                        result.add(loc.translate(offset.wrapping_neg()), knowledge);
                    }
                }
            }
            InstKind::Cast { op, arg } if is_same_width_reinterpret(func, *op, *arg, value) => {
                let source = self.collect(query, *arg, at, depth + 1, active)?;
                for (loc, knowledge) in source.iter() {
                    if loc.is_root() {
                        let carried = Knowledge {
                            nonzero: knowledge.nonzero,
                            heap_alloc: knowledge.heap_alloc,
                            known_value: knowledge
                                .known_value
                                .filter(|known| known.as_const().is_some()),
                            known_at: knowledge.known_at,
                        };
                        result.add(Location::root(), &carried);
                    } else {
                        result.add(loc.clone(), knowledge);
                    }
                }
            }
            InstKind::Load {
                ptr,
                volatile: false,
            } => {
                let width = func.value_type(value).bytes();
                let pointed = self.collect(query, *ptr, at, depth + 1, active)?;
                for (loc, knowledge) in pointed.iter() {
                    if let Some(rest) = loc.strip_first(0, width) {
                        result.add(rest, knowledge);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// One sweep of comparison folding and load forwarding.
    pub fn apply(&self, func: &mut Function, table: &FactTable) -> Result<ApplyStats, FactError> {
        let domtree = DominatorTree::with_function(func);
        let mut stats = ApplyStats::default();

        for inst in func.layout_insts() {
            if !func.is_placed(inst) {
                continue;
            }
            match func.kind(inst).clone() {
                InstKind::Icmp { cc, lhs, rhs } if cc.is_equality() => {
                    let Some(equal) = self.decide_equality(func, table, &domtree, inst, lhs, rhs)?
                    else {
                        continue;
                    };
                    let Some(result) = func.inst_result(inst) else {
                        continue;
                    };
                    let folded = equal == (cc == IntCC::Eq);
                    let constant = func.iconst(Type::I1, u64::from(folded));
                    func.replace_all_uses(result, constant);
                    func.remove_inst(inst);
                    stats.compares_folded += 1;
                    if self.verbosity.ir() {
                        info!(function = %func.name, inst = %inst, result = folded, "folded comparison");
                    }
                }
                InstKind::Load {
                    ptr,
                    volatile: false,
                } => {
                    if self.forward_load(func, table, &domtree, inst, ptr)? {
                        stats.loads_replaced += 1;
                        if self.verbosity.ir() {
                            info!(function = %func.name, inst = %inst, "replaced load with known value");
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Whether `lhs == rhs` is decided by the facts visible at `at`.
    fn decide_equality(
        &self,
        func: &Function,
        table: &FactTable,
        domtree: &DominatorTree,
        at: Inst,
        lhs: Value,
        rhs: Value,
    ) -> Result<Option<bool>, FactError> {
        let ty = func.value_type(lhs);
        let (lhs, rhs) = (strip_casts(func, lhs), strip_casts(func, rhs));
        let (x, constant) = match (self.eval(func, lhs)?, self.eval(func, rhs)?) {
            (None, Some(constant)) => (lhs, constant),
            (Some(constant), None) => (rhs, constant),
            _ => return Ok(None),
        };
        let constant = ty.normalize(constant);
        let facts = self.facts(func, table, domtree, x, at)?;
        let root = facts.root();

        if constant == 0 && root.nonzero {
            return Ok(Some(false));
        }
        if constant != 0 && root.heap_alloc {
            return Ok(Some(false));
        }
        if let Some(KnownValue::Const(bits)) = root.unconditional_value() {
            return Ok(Some(ty.normalize(bits) == constant));
        }
        if self.differs_from_const_memory(&facts, constant) {
            return Ok(Some(false));
        }
        Ok(None)
    }

    /// A pointer-sized field of `x` is known, and the same field of the
    /// constant lives in constant memory with different contents.
    fn differs_from_const_memory(&self, facts: &FactSet, constant: u64) -> bool {
        facts.iter().any(|(loc, knowledge)| {
            let [field] = loc.indirections() else {
                return false;
            };
            if field.width != 8 {
                return false;
            }
            let Some(KnownValue::Const(expected)) = knowledge.unconditional_value() else {
                return false;
            };
            let address = constant.wrapping_add(field.offset as u64);
            self.regions.is_const(address, 8)
                && self
                    .eval
                    .peek(address, 8)
                    .is_some_and(|actual| actual != expected)
        })
    }

    fn forward_load(
        &self,
        func: &mut Function,
        table: &FactTable,
        domtree: &DominatorTree,
        load: Inst,
        ptr: Value,
    ) -> Result<bool, FactError> {
        let Some(result) = func.inst_result(load) else {
            return Ok(false);
        };
        let ty = func.value_type(result);
        let facts = self.facts(func, table, domtree, ptr, load)?;
        let Some(known) = facts
            .get(&Location::at(0, ty.bytes()))
            .and_then(Knowledge::unconditional_value)
        else {
            return Ok(false);
        };

        let replacement = match known {
            KnownValue::Const(bits) => func.iconst(ty, bits),
            KnownValue::Value(value) => {
                if value == result {
                    return Ok(false);
                }
                if let Some(def) = func.value_inst(value) {
                    if def == load || !domtree.dominates(func, def, load) {
                        return Ok(false);
                    }
                }
                let value_ty = func.value_type(value);
                if value_ty == ty {
                    value
                } else if value_ty.bytes() == ty.bytes() {
                    let op = reinterpret_op(value_ty, ty);
                    let Some(cast) = func.insert_before(load, InstKind::Cast { op, arg: value }, ty)
                    else {
                        return Ok(false);
                    };
                    let Some(cast_result) = func.inst_result(cast) else {
                        return Ok(false);
                    };
                    cast_result
                } else {
                    return Ok(false);
                }
            }
        };
        func.replace_all_uses(result, replacement);
        func.remove_inst(load);
        Ok(true)
    }

    fn known_value(&self, func: &Function, value: Value) -> Result<KnownValue, FactError> {
        Ok(match self.eval(func, value)? {
            Some(bits) => KnownValue::Const(bits),
            None => KnownValue::Value(value),
        })
    }

    fn eval(&self, func: &Function, value: Value) -> Result<Option<u64>, FactError> {
        self.eval
            .eval_const(func, value)
            .map_err(|source| FactError::Symbol {
                function: func.name.clone(),
                source,
            })
    }
}

/// The domain of a CFG edge into `succ`, when `succ` has no other way in.
fn edge_domain(func: &Function, succ: sable_ir::Block) -> Option<Domain> {
    func.single_predecessor(succ)?;
    func.first_non_phi(succ).map(Domain::From)
}

fn is_same_width_reinterpret(func: &Function, op: CastOp, arg: Value, result: Value) -> bool {
    op.is_reinterpret() && func.value_type(arg).bytes() == func.value_type(result).bytes()
}

fn strip_casts(func: &Function, mut value: Value) -> Value {
    while let Some(inst) = func.value_inst(value) {
        match func.kind(inst) {
            InstKind::Cast { op, arg } if is_same_width_reinterpret(func, *op, *arg, value) => {
                value = *arg;
            }
            _ => break,
        }
    }
    value
}

/// The cast that moves bits from `from` to `to` unchanged.
pub fn reinterpret_op(from: Type, to: Type) -> CastOp {
    match (from.is_ptr(), to.is_ptr()) {
        (true, false) => CastOp::PtrToInt,
        (false, true) => CastOp::IntToPtr,
        _ => CastOp::Bitcast,
    }
}
