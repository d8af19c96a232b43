//! Splicing callee IR into a trace while it is being interpreted.
//!
//! Calls to a constant symbol with a registered definition are inlined
//! directly. Calls through a runtime pointer are inlined behind an identity
//! guard: the inlined body runs when the pointer still equals the address
//! seen while tracing, and the original call runs otherwise.

use std::fmt;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use sable_config::{TraceConfig, Verbosity};
use sable_facts::reinterpret_op;
use sable_ir::{
    Block, CallAction, CallHook, ExecError, Function, Inst, InstKind, IntCC, Signature, Type,
    Value, ValueDef,
};
use sable_symbol::SymbolResolver;
use tracing::{info, trace};

use crate::registry::ModuleRegistry;

/// Branch weight of an edge taken while tracing.
pub const HOT_WEIGHT: u32 = 1000;
/// Branch weight of an edge never taken while tracing.
pub const COLD_WEIGHT: u32 = 1;

/// Leaves that are never worth inlining: allocation, release and process exit.
pub const BUILTIN_DENY: &[&str] = &[
    "malloc",
    "calloc",
    "realloc",
    "aligned_alloc",
    "free",
    "abort",
    "exit",
    "_exit",
    "__assert_fail",
];

const INTRINSIC_PREFIXES: &[&str] = &["llvm.", "sable."];

#[derive(Debug, Clone, Default)]
pub struct InlinePolicy {
    deny: AHashSet<String>,
    allow: AHashSet<String>,
}

impl InlinePolicy {
    pub fn from_config(config: &TraceConfig) -> Self {
        Self {
            deny: config.do_not_trace.iter().cloned().collect(),
            allow: config.always_trace.iter().cloned().collect(),
        }
    }

    /// `do_not_trace` wins over `always_trace`, which wins over the built-in list.
    pub fn allows(&self, name: &str) -> bool {
        if self.deny.contains(name) {
            return false;
        }
        self.allow.contains(name) || !BUILTIN_DENY.contains(&name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    UnknownAddress,
    NoDefinition,
    Intrinsic,
    Variadic,
    Policy,
    Trampoline,
    DepthLimit,
    /// Argument or return widths differ from the definition.
    Incompatible,
    /// The definition branches back to its own entry block.
    LoopingEntry,
}

impl fmt::Display for DeclineReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DeclineReason::UnknownAddress => "no name for the callee address",
            DeclineReason::NoDefinition => "no IR definition",
            DeclineReason::Intrinsic => "intrinsic",
            DeclineReason::Variadic => "variadic",
            DeclineReason::Policy => "denied by policy",
            DeclineReason::Trampoline => "driver trampoline",
            DeclineReason::DepthLimit => "inline depth limit",
            DeclineReason::Incompatible => "incompatible signature",
            DeclineReason::LoopingEntry => "entry block has predecessors",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineOutcome {
    Inlined,
    /// Inlined behind an identity check on the callee pointer.
    Guarded,
    Declined(DeclineReason),
}

impl InlineOutcome {
    pub fn is_inlined(self) -> bool {
        !matches!(self, InlineOutcome::Declined(_))
    }
}

/// One call site the inliner looked at.
#[derive(Debug, Clone)]
pub struct InlineDecision {
    pub caller: String,
    pub call: Inst,
    pub callee: Option<String>,
    pub address: u64,
    pub depth: usize,
    pub outcome: InlineOutcome,
}

impl fmt::Display for InlineDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callee = self.callee.as_deref().unwrap_or("?");
        match self.outcome {
            InlineOutcome::Inlined => write!(f, "inlined {callee} into {}", self.caller),
            InlineOutcome::Guarded => {
                write!(f, "inlined {callee} into {} behind a guard", self.caller)
            }
            InlineOutcome::Declined(reason) => {
                write!(f, "kept call to {callee} in {}: {reason}", self.caller)
            }
        }
    }
}

/// What the inliner remembers about one traced routine between runs.
#[derive(Debug, Clone, Default)]
pub struct InlineState {
    /// Nesting depth of call sites copied in by earlier inlining.
    depth: AHashMap<Inst, usize>,
    /// Call sites that are left as calls from now on.
    settled: AHashSet<Inst>,
    /// Guard branches keep their configured weights.
    guards: AHashSet<Inst>,
}

impl InlineState {
    pub fn is_settled(&self, call: Inst) -> bool {
        self.settled.contains(&call)
    }

    pub fn is_guard(&self, branch: Inst) -> bool {
        self.guards.contains(&branch)
    }
}

/// The interpreter hook that inlines calls as they are reached.
pub struct CallInliner<'c> {
    resolver: &'c SymbolResolver,
    registry: &'c ModuleRegistry,
    policy: &'c InlinePolicy,
    config: &'c TraceConfig,
    trampolines: AHashSet<u64>,
    verbosity: Verbosity,
    state: InlineState,
    decisions: Vec<InlineDecision>,
}

impl<'c> CallInliner<'c> {
    pub fn new(
        resolver: &'c SymbolResolver,
        registry: &'c ModuleRegistry,
        policy: &'c InlinePolicy,
        config: &'c TraceConfig,
    ) -> Self {
        Self {
            resolver,
            registry,
            policy,
            config,
            trampolines: AHashSet::new(),
            verbosity: Verbosity::Silent,
            state: InlineState::default(),
            decisions: Vec::new(),
        }
    }

    pub fn with_trampolines(mut self, trampolines: impl IntoIterator<Item = u64>) -> Self {
        self.trampolines.extend(trampolines);
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Continues from what an earlier run of the same routine left behind.
    pub fn with_state(mut self, state: InlineState) -> Self {
        self.state = state;
        self
    }

    pub fn into_parts(self) -> (InlineState, Vec<InlineDecision>) {
        (self.state, self.decisions)
    }

    pub fn decisions(&self) -> &[InlineDecision] {
        &self.decisions
    }

    /// Inlines `call`, whose callee evaluated to `address`, if policy and
    /// signatures allow it.
    pub fn consider_call(
        &mut self,
        func: &mut Function,
        call: Inst,
        address: u64,
    ) -> Result<CallAction, ExecError> {
        if self.state.settled.contains(&call) {
            return Ok(CallAction::Execute);
        }
        let InstKind::Call {
            callee, args, sig, ..
        } = func.kind(call).clone()
        else {
            return Ok(CallAction::Execute);
        };
        let depth = self.state.depth.get(&call).copied().unwrap_or(0);
        let direct = func.is_constant(callee);
        let name = match func.value_def(callee) {
            ValueDef::Symbol(name) => Some(name.clone()),
            _ => self.resolver.resolve_name(address),
        };

        let outcome = match self.select(name.as_deref(), address, &sig, depth) {
            Err(reason) => InlineOutcome::Declined(reason),
            Ok(definition) => {
                let copied = if direct {
                    inline_direct(func, call, &args, &definition)?
                } else {
                    let guard_weights = self.config.guard_weights;
                    let (copied, guard) =
                        inline_guarded(func, call, callee, address, &args, &definition, guard_weights)?;
                    self.state.settled.insert(call);
                    self.state.guards.insert(guard);
                    copied
                };
                for inner in copied {
                    self.state.depth.insert(inner, depth + 1);
                }
                if direct {
                    InlineOutcome::Inlined
                } else {
                    InlineOutcome::Guarded
                }
            }
        };

        if !outcome.is_inlined() {
            self.state.settled.insert(call);
        }
        let decision = InlineDecision {
            caller: func.name.clone(),
            call,
            callee: name,
            address,
            depth,
            outcome,
        };
        if self.verbosity.ir() {
            info!(depth, address, "{decision}");
        }
        self.decisions.push(decision);

        Ok(if outcome.is_inlined() {
            CallAction::Rewritten
        } else {
            CallAction::Execute
        })
    }

    fn select(
        &self,
        name: Option<&str>,
        address: u64,
        sig: &Signature,
        depth: usize,
    ) -> Result<Arc<Function>, DeclineReason> {
        if self.trampolines.contains(&address) {
            return Err(DeclineReason::Trampoline);
        }
        let name = name.ok_or(DeclineReason::UnknownAddress)?;
        if INTRINSIC_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
        {
            return Err(DeclineReason::Intrinsic);
        }
        if !self.policy.allows(name) {
            return Err(DeclineReason::Policy);
        }
        let definition = self
            .registry
            .definition(name)
            .ok_or(DeclineReason::NoDefinition)?;
        if sig.variadic || definition.sig.variadic {
            return Err(DeclineReason::Variadic);
        }
        if depth >= self.config.max_inline_depth {
            return Err(DeclineReason::DepthLimit);
        }
        if !signatures_compatible(sig, &definition.sig) {
            return Err(DeclineReason::Incompatible);
        }
        let entry_has_preds = definition
            .entry_block()
            .is_some_and(|entry| !definition.predecessors(entry).is_empty());
        if entry_has_preds {
            return Err(DeclineReason::LoopingEntry);
        }
        Ok(definition)
    }

    /// Marks the taken successor of `inst` hot and the others cold. The
    /// first recorded run decides; later runs leave the weights alone.
    pub fn record_branch(&self, func: &mut Function, inst: Inst, succ: usize) {
        if !self.config.profile_branches || self.state.guards.contains(&inst) {
            return;
        }
        match func.kind_mut(inst) {
            InstKind::Branch { weights, .. } if weights.is_none() => {
                let mut profile = [COLD_WEIGHT; 2];
                if let Some(slot) = profile.get_mut(succ) {
                    *slot = HOT_WEIGHT;
                }
                *weights = Some(profile);
            }
            InstKind::Switch { cases, weights, .. } if weights.is_none() => {
                let mut profile = vec![COLD_WEIGHT; cases.len() + 1];
                if let Some(slot) = profile.get_mut(succ) {
                    *slot = HOT_WEIGHT;
                }
                *weights = Some(profile);
            }
            _ => {}
        }
    }
}

impl CallHook for CallInliner<'_> {
    fn before_call(
        &mut self,
        func: &mut Function,
        call: Inst,
        callee: u64,
    ) -> Result<CallAction, ExecError> {
        self.consider_call(func, call, callee)
    }

    fn branch_taken(&mut self, func: &mut Function, inst: Inst, succ: usize) {
        if self.verbosity.interpreting() {
            trace!(inst = %inst, succ, "branch taken");
        }
        self.record_branch(func, inst, succ);
    }
}

/// Same arity, and every argument and the return value keep their width.
pub fn signatures_compatible(site: &Signature, definition: &Signature) -> bool {
    site.params.len() == definition.params.len()
        && site
            .params
            .iter()
            .zip(&definition.params)
            .all(|(a, b)| same_width(*a, *b))
        && same_width(site.ret, definition.ret)
}

fn same_width(a: Type, b: Type) -> bool {
    a == b || (a != Type::Void && b != Type::Void && a.bytes() == b.bytes())
}

/// The callee body as copied into the caller.
struct CopiedBody {
    entry: Block,
    /// Blocks that returned, with the returned value.
    exits: Vec<(Block, Option<Value>)>,
    calls: Vec<Inst>,
}

/// Reinterprets `value` as `ty` with an instruction appended to `block`.
fn coerce_at_end(func: &mut Function, block: Block, value: Value, ty: Type) -> Value {
    let from = func.value_type(value);
    if from == ty {
        return value;
    }
    let cast = func.append_inst(
        block,
        InstKind::Cast {
            op: reinterpret_op(from, ty),
            arg: value,
        },
        ty,
    );
    func.inst_result(cast).unwrap_or(value)
}

/// Reinterprets `value` as `ty` right before `before`.
fn coerce_before(func: &mut Function, before: Inst, value: Value, ty: Type) -> Value {
    let from = func.value_type(value);
    if from == ty {
        return value;
    }
    func.insert_before(
        before,
        InstKind::Cast {
            op: reinterpret_op(from, ty),
            arg: value,
        },
        ty,
    )
    .and_then(|cast| func.inst_result(cast))
    .unwrap_or(value)
}

/// Copies `callee` into `func` after `after`. Returns become jumps to `cont`.
fn copy_body(
    func: &mut Function,
    callee: &Function,
    args: &[Value],
    after: Block,
    cont: Block,
) -> Result<CopiedBody, ExecError> {
    let unsupported = |what: String| ExecError::Unsupported(format!("inlining `{}`: {what}", callee.name));
    let entry = callee
        .entry_block()
        .ok_or_else(|| unsupported("no body".to_string()))?;

    let mut blocks: AHashMap<Block, Block> = AHashMap::new();
    let mut prev = after;
    for block in &callee.layout {
        prev = func.create_block_after(prev);
        blocks.insert(*block, prev);
    }

    let mut values: AHashMap<Value, Value> = AHashMap::new();
    let mut copied: Vec<(Inst, Block)> = Vec::new();
    let mut calls = Vec::new();
    for block in &callee.layout {
        let new_block = blocks[block];
        for inst in callee.block_insts(*block) {
            let result = callee.inst_result(*inst);
            let ty = result.map_or(Type::Void, |value| callee.value_type(value));
            let new_inst = func.append_inst(new_block, callee.kind(*inst).clone(), ty);
            if let (Some(old), Some(new)) = (result, func.inst_result(new_inst)) {
                values.insert(old, new);
            }
            if matches!(callee.kind(*inst), InstKind::Call { .. }) {
                calls.push(new_inst);
            }
            copied.push((new_inst, new_block));
        }
    }

    for (value, data) in callee.values.iter() {
        let mapped = match &data.def {
            ValueDef::Inst(_) => continue,
            ValueDef::Param(index) => *args
                .get(*index as usize)
                .ok_or_else(|| unsupported(format!("missing argument {index}")))?,
            ValueDef::Const(bits) => func.iconst(data.ty, *bits),
            ValueDef::Symbol(name) => func.symbol(name),
        };
        values.insert(value, mapped);
    }

    let mut exits = Vec::new();
    for (inst, block) in copied {
        let mut kind = func.kind(inst).clone();
        let mut missing = None;
        kind.map_operands(|value| match values.get(&value) {
            Some(mapped) => *mapped,
            None => {
                missing = Some(value);
                value
            }
        });
        if let Some(value) = missing {
            return Err(unsupported(format!("{value} is used but never defined")));
        }
        kind.map_blocks(|target| blocks.get(&target).copied().unwrap_or(target));
        if let InstKind::Return { value } = kind {
            exits.push((block, value));
            kind = InstKind::Jump { dest: cont };
        }
        func.replace_kind(inst, kind);
    }

    Ok(CopiedBody {
        entry: blocks[&entry],
        exits,
        calls,
    })
}

/// Joins the returned values at the head of `cont` and makes the call's users
/// read the join. `extra` adds incoming edges that do not come from the body.
fn join_results(
    func: &mut Function,
    call: Inst,
    cont: Block,
    exits: &[(Block, Option<Value>)],
    extra: Option<(Block, Value)>,
) {
    let Some(result) = func.inst_result(call) else {
        return;
    };
    let ty = func.value_type(result);
    let mut incoming = Vec::with_capacity(exits.len() + 1);
    for (block, value) in exits {
        let Some(value) = value else {
            continue;
        };
        let value = match func.terminator(*block) {
            Some(term) => coerce_before(func, term, *value, ty),
            None => *value,
        };
        incoming.push((*block, value));
    }
    let phi = func.insert_inst(cont, 0, InstKind::Phi { incoming: Vec::new() }, ty);
    let Some(joined) = func.inst_result(phi) else {
        return;
    };
    func.replace_all_uses(result, joined);
    incoming.extend(extra);
    func.replace_kind(phi, InstKind::Phi { incoming });
}

/// Replaces `call` with a copy of `callee`. Returns the calls in the copy.
fn inline_direct(
    func: &mut Function,
    call: Inst,
    args: &[Value],
    callee: &Function,
) -> Result<Vec<Inst>, ExecError> {
    let (block, index) = func
        .inst_position(call)
        .ok_or_else(|| ExecError::Unsupported(format!("{call} is not placed")))?;
    let cont = func.split_block(block, index);

    let args: Vec<Value> = args
        .iter()
        .zip(&callee.sig.params)
        .map(|(arg, ty)| coerce_at_end(func, block, *arg, *ty))
        .collect();
    let body = copy_body(func, callee, &args, block, cont)?;
    func.append_inst(block, InstKind::Jump { dest: body.entry }, Type::Void);

    join_results(func, call, cont, &body.exits, None);
    func.remove_inst(call);
    Ok(body.calls)
}

/// Splits at `call` into a guard on the callee pointer, the copied body on
/// the matching arm and the original call on the other. Returns the calls in
/// the copy and the guard branch.
#[allow(clippy::too_many_arguments)]
fn inline_guarded(
    func: &mut Function,
    call: Inst,
    callee_value: Value,
    address: u64,
    args: &[Value],
    callee: &Function,
    weights: [u32; 2],
) -> Result<(Vec<Inst>, Inst), ExecError> {
    let (block, index) = func
        .inst_position(call)
        .ok_or_else(|| ExecError::Unsupported(format!("{call} is not placed")))?;
    let cont = func.split_block(block, index);

    let fallback = func.create_block_after(block);
    let rejoin = func.append_inst(fallback, InstKind::Jump { dest: cont }, Type::Void);
    func.move_before(call, rejoin);

    let expected = func.iconst(func.value_type(callee_value), address);
    let same = func.append_inst(
        block,
        InstKind::Icmp {
            cc: IntCC::Eq,
            lhs: callee_value,
            rhs: expected,
        },
        Type::I1,
    );
    let same = func
        .inst_result(same)
        .ok_or_else(|| ExecError::Unsupported("guard has no result".to_string()))?;
    let args: Vec<Value> = args
        .iter()
        .zip(&callee.sig.params)
        .map(|(arg, ty)| coerce_at_end(func, block, *arg, *ty))
        .collect();

    let body = copy_body(func, callee, &args, block, cont)?;
    let guard = func.append_inst(
        block,
        InstKind::Branch {
            cond: same,
            then_dest: body.entry,
            else_dest: fallback,
            weights: Some(weights),
        },
        Type::Void,
    );

    let fallback_result = func.inst_result(call).map(|result| (fallback, result));
    join_results(func, call, cont, &body.exits, fallback_result);
    Ok((body.calls, guard))
}
