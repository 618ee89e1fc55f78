//! Pluggable taint-propagation rule engine.
//!
//! Each rule sees every kind of control-flow edge through four callbacks and
//! returns a [`RuleOutput`]: contributed facts plus two kill flags. The
//! [`RuleManager`] runs the rules in a fixed order, unions their
//! contributions, adds the unmodified incoming fact unless a rule killed it,
//! and drops everything when a rule killed the whole edge. Rule order is
//! significant; later rules may rely on earlier kills.
//!
//! The manager and solver are direction-agnostic: a backward analysis plugs
//! in an inverted rule list without touching either.

mod array;
mod core_flow;
mod exception;
mod implicit;
mod sink;
mod skip_system;
mod source;
mod static_field;
mod stop_after;
mod strong_update;
mod typing;
mod wrapper_rule;

pub use array::ArrayRule;
pub use core_flow::CoreFlowRule;
pub use exception::ExceptionRule;
pub use implicit::ImplicitFlowRule;
pub use sink::SinkRule;
pub use skip_system::SkipSystemClassRule;
pub use source::SourceRule;
pub use static_field::StaticFieldRule;
pub use stop_after::StopAfterKFlowsRule;
pub use strong_update::StrongUpdateRule;
pub use typing::TypingRule;

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{FieldId, LValue, NodeId, ProcId, Value};
use crate::taint::{AccessPath, ArrayTaintType, FactId};

/// Result of one rule callback.
#[derive(Debug, Default)]
pub struct RuleOutput {
    pub facts: Vec<FactId>,
    /// Suppress propagating the unmodified incoming fact.
    pub kill_source: bool,
    /// Suppress everything for this edge.
    pub kill_all: bool,
}

impl RuleOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_facts(facts: Vec<FactId>) -> Self {
        Self {
            facts,
            ..Self::default()
        }
    }

    pub fn kill_source() -> Self {
        Self {
            kill_source: true,
            ..Self::default()
        }
    }

    pub fn kill_all() -> Self {
        Self {
            kill_all: true,
            ..Self::default()
        }
    }
}

/// One taint-propagation rule. All callbacks default to "no contribution".
///
/// `d1` is the fact at the entry of the procedure containing the statement
/// (the context fact), `d2` the fact arriving at the statement.
pub trait PropagationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn normal_flow(&self, d1: FactId, d2: FactId, stmt: NodeId, dest: NodeId) -> RuleOutput {
        let _ = (d1, d2, stmt, dest);
        RuleOutput::none()
    }

    fn call_flow(&self, d1: FactId, d2: FactId, call: NodeId, callee: ProcId) -> RuleOutput {
        let _ = (d1, d2, call, callee);
        RuleOutput::none()
    }

    fn call_to_return_flow(
        &self,
        d1: FactId,
        d2: FactId,
        call: NodeId,
        ret_site: NodeId,
    ) -> RuleOutput {
        let _ = (d1, d2, call, ret_site);
        RuleOutput::none()
    }

    /// `ret_site`/`call_site` are `None` for the null-caller evaluation of an
    /// unbalanced return.
    fn return_flow(
        &self,
        caller_d1s: &[FactId],
        d2: FactId,
        exit: NodeId,
        ret_site: Option<NodeId>,
        call_site: Option<NodeId>,
    ) -> RuleOutput {
        let _ = (caller_d1s, d2, exit, ret_site, call_site);
        RuleOutput::none()
    }
}

/// Access path for a write into `lhs`, carrying over a remaining field chain
/// and flags from the flowing taint. `None` when the lvalue cannot be
/// expressed as an access path (array element writes are the array rule's
/// business).
pub(crate) fn write_access_path(
    lhs: LValue,
    suffix: &[FieldId],
    sub_fields: bool,
    array_taint: ArrayTaintType,
    max_len: usize,
) -> Option<AccessPath> {
    let ap = match lhs {
        LValue::Local(l) => AccessPath::with_fields(Value::Local(l), suffix.to_vec(), max_len),
        LValue::LocalField { base, field } => {
            let mut chain = vec![field];
            chain.extend_from_slice(suffix);
            AccessPath::with_fields(Value::Local(base), chain, max_len)
        }
        LValue::StaticField(f) => {
            AccessPath::with_fields(Value::StaticField(f), suffix.to_vec(), max_len)
        }
        LValue::ArrayElem { .. } => return None,
    };
    let truncated = ap.taint_sub_fields();
    Some(
        ap.with_taint_sub_fields(truncated || sub_fields)
            .with_array_taint(array_taint),
    )
}

/// Composes the ordered rule list and reduces their outputs per edge kind.
pub struct RuleManager {
    ctx: Arc<AnalysisContext>,
    rules: Vec<Box<dyn PropagationRule>>,
}

impl RuleManager {
    /// Builds the default forward rule list, gated by configuration the same
    /// way the individual features are.
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        let config = &ctx.config;
        let mut rules: Vec<Box<dyn PropagationRule>> = Vec::new();

        rules.push(Box::new(CoreFlowRule::new(Arc::clone(&ctx))));
        rules.push(Box::new(SourceRule::new(Arc::clone(&ctx))));
        rules.push(Box::new(SinkRule::new(Arc::clone(&ctx))));
        rules.push(Box::new(StaticFieldRule::new(Arc::clone(&ctx))));
        if config.enable_array_tracking {
            rules.push(Box::new(ArrayRule::new(Arc::clone(&ctx))));
        }
        if config.enable_exception_tracking {
            rules.push(Box::new(ExceptionRule::new(Arc::clone(&ctx))));
        }
        if ctx.wrapper.is_some() {
            rules.push(Box::new(wrapper_rule::WrapperRule::new(Arc::clone(&ctx))));
        }
        if config.implicit_flow_mode.tracks_control_flow() {
            rules.push(Box::new(ImplicitFlowRule::new(Arc::clone(&ctx))));
        }
        rules.push(Box::new(StrongUpdateRule::new(Arc::clone(&ctx))));
        if config.enable_type_checking {
            rules.push(Box::new(TypingRule::new(Arc::clone(&ctx))));
        }
        rules.push(Box::new(SkipSystemClassRule::new(Arc::clone(&ctx))));
        if config.stop_after_first_k_flows > 0 {
            rules.push(Box::new(StopAfterKFlowsRule::new(Arc::clone(&ctx))));
        }

        Self { ctx, rules }
    }

    /// Builds a manager with an explicit rule list; used by backward
    /// configurations and rule-level tests.
    pub fn with_rules(ctx: Arc<AnalysisContext>, rules: Vec<Box<dyn PropagationRule>>) -> Self {
        Self { ctx, rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// The zero fact survives every edge on its own; rules can neither kill
    /// nor consume it. This is what lets sources fire anywhere in the
    /// program.
    fn finish(
        &self,
        mut facts: Vec<FactId>,
        d2: FactId,
        add_source: bool,
        auto_zero: bool,
        killed_all: bool,
    ) -> Option<Vec<FactId>> {
        let is_zero = self.ctx.arena.is_zero(d2);
        if killed_all {
            if auto_zero && is_zero {
                return Some(vec![d2]);
            }
            return None;
        }
        if (add_source && !is_zero) || (auto_zero && is_zero) {
            if !facts.contains(&d2) {
                facts.push(d2);
            }
        }
        Some(facts)
    }

    /// Applies all rules between `stmt` and its successor `dest`.
    /// `None` means the edge was killed entirely.
    pub fn apply_normal_flow(
        &self,
        d1: FactId,
        d2: FactId,
        stmt: NodeId,
        dest: NodeId,
    ) -> Option<Vec<FactId>> {
        let mut facts = Vec::new();
        let mut kill_source = false;
        for rule in &self.rules {
            let out = rule.normal_flow(d1, d2, stmt, dest);
            kill_source |= out.kill_source;
            if out.kill_all {
                return self.finish(facts, d2, false, true, true);
            }
            facts.extend(out.facts);
        }
        self.finish(facts, d2, !kill_source, true, false)
    }

    /// Applies all rules across a call edge into `callee`. The incoming fact
    /// is never implicitly mapped into the callee; only contributed facts
    /// enter.
    pub fn apply_call_flow(
        &self,
        d1: FactId,
        d2: FactId,
        call: NodeId,
        callee: ProcId,
    ) -> Option<Vec<FactId>> {
        let mut facts = Vec::new();
        for rule in &self.rules {
            let out = rule.call_flow(d1, d2, call, callee);
            if out.kill_all {
                return self.finish(facts, d2, false, true, true);
            }
            facts.extend(out.facts);
        }
        self.finish(facts, d2, false, true, false)
    }

    /// Applies all rules along the edge bypassing the callee.
    pub fn apply_call_to_return_flow(
        &self,
        d1: FactId,
        d2: FactId,
        call: NodeId,
        ret_site: NodeId,
    ) -> Option<Vec<FactId>> {
        let mut facts = Vec::new();
        let mut kill_source = false;
        for rule in &self.rules {
            let out = rule.call_to_return_flow(d1, d2, call, ret_site);
            kill_source |= out.kill_source;
            if out.kill_all {
                return self.finish(facts, d2, false, true, true);
            }
            facts.extend(out.facts);
        }
        self.finish(facts, d2, !kill_source, true, false)
    }

    /// Applies all rules at a procedure exit back into a caller context.
    /// Only contributed facts leave the callee.
    pub fn apply_return_flow(
        &self,
        caller_d1s: &[FactId],
        d2: FactId,
        exit: NodeId,
        ret_site: Option<NodeId>,
        call_site: Option<NodeId>,
    ) -> Option<Vec<FactId>> {
        let mut facts = Vec::new();
        for rule in &self.rules {
            let out = rule.return_flow(caller_d1s, d2, exit, ret_site, call_site);
            if out.kill_all {
                return None;
            }
            facts.extend(out.facts);
        }
        Some(facts)
    }
}
