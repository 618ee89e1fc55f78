//! Core data-flow transfer: assignments, casts, binary operations, and the
//! caller/callee mapping of taints at call and return edges. Always first in
//! the rule list; every other rule refines or kills what this one produces.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{
    InterproceduralCfg, LValue, NodeId, ProcId, Rvalue, Stmt, Value,
};
use crate::rules::{write_access_path, PropagationRule, RuleOutput};
use crate::taint::{AccessPath, FactId};

pub struct CoreFlowRule {
    ctx: Arc<AnalysisContext>,
}

impl CoreFlowRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    /// If `rhs` reads through the taint, the remaining field chain on top of
    /// the read. `None` when the taint is unrelated to `rhs`.
    fn rhs_carries_taint(&self, ap: &AccessPath, rhs: &Rvalue) -> Option<TaintCarry> {
        match rhs {
            Rvalue::Use(v) | Rvalue::Cast { value: v, .. } => {
                if ap.starts_with(*v) {
                    Some(TaintCarry {
                        suffix: ap.fields().to_vec(),
                        sub_fields: ap.taint_sub_fields(),
                        keep_array_taint: true,
                    })
                } else {
                    None
                }
            }
            Rvalue::FieldRead { base, field } => {
                if !ap.covers_field(Value::Local(*base), *field) {
                    return None;
                }
                // Strip the matched field from the chain; a truncated path
                // keeps tainting all sub-fields.
                let suffix = if ap.fields().is_empty() {
                    Vec::new()
                } else {
                    ap.fields()[1..].to_vec()
                };
                Some(TaintCarry {
                    suffix,
                    sub_fields: ap.taint_sub_fields(),
                    keep_array_taint: false,
                })
            }
            Rvalue::Binary { left, right } => {
                if ap.starts_with(*left) || ap.starts_with(*right) {
                    // Combining drops structure; taint the whole result.
                    Some(TaintCarry {
                        suffix: Vec::new(),
                        sub_fields: false,
                        keep_array_taint: false,
                    })
                } else {
                    None
                }
            }
            // Array semantics live in the array rule.
            Rvalue::ArrayRead { .. } | Rvalue::ArrayNew { .. } | Rvalue::ArrayLength { .. } => None,
        }
    }

    fn statics_allowed(&self, lhs: &LValue) -> bool {
        !matches!(lhs, LValue::StaticField(_)) || self.ctx.config.enable_static_field_tracking
    }
}

struct TaintCarry {
    suffix: Vec<crate::program::FieldId>,
    sub_fields: bool,
    keep_array_taint: bool,
}

impl PropagationRule for CoreFlowRule {
    fn name(&self) -> &'static str {
        "core-flow"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, _dest: NodeId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        if fact.access_path.is_empty() || fact.exception_thrown {
            return RuleOutput::none();
        }
        let (lhs, rhs) = match self.ctx.icfg.stmt(stmt) {
            Stmt::Assign { lhs, rhs } => (*lhs, *rhs),
            _ => return RuleOutput::none(),
        };
        if !self.statics_allowed(&lhs) {
            return RuleOutput::none();
        }
        let carry = match self.rhs_carries_taint(&fact.access_path, &rhs) {
            Some(c) => c,
            None => return RuleOutput::none(),
        };
        let array_taint = if carry.keep_array_taint {
            fact.access_path.array_taint()
        } else {
            Default::default()
        };
        let max_len = self.ctx.config.max_access_path_length;
        let new_path = match write_access_path(
            lhs,
            &carry.suffix,
            carry.sub_fields,
            array_taint,
            max_len,
        ) {
            Some(p) => p,
            None => return RuleOutput::none(),
        };
        let new_fact = self.ctx.arena.derive(d2, |f| {
            f.access_path = new_path;
        });
        RuleOutput::with_facts(vec![new_fact])
    }

    fn call_flow(&self, _d1: FactId, d2: FactId, call: NodeId, callee: ProcId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        let ap = &fact.access_path;
        // Control taints, exception carriers, and statics have their own
        // rules.
        if ap.is_empty() || ap.is_static_field() || fact.exception_thrown {
            return RuleOutput::none();
        }
        let call_expr = match self.ctx.icfg.stmt(call).as_call() {
            Some(c) => c,
            None => return RuleOutput::none(),
        };

        let mut facts = Vec::new();
        let params = self.ctx.icfg.params_of(callee);
        for (i, arg) in call_expr.args.iter().enumerate() {
            if ap.starts_with(*arg) {
                if let Some(param) = params.get(i) {
                    let mapped = ap.rebase(Value::Local(*param));
                    facts.push(self.ctx.arena.derive(d2, |f| {
                        f.access_path = mapped;
                    }));
                }
            }
        }
        if let (Some(caller_recv), Some(callee_recv)) =
            (call_expr.receiver, self.ctx.icfg.receiver_of(callee))
        {
            if ap.starts_with(Value::Local(caller_recv)) {
                let mapped = ap.rebase(Value::Local(callee_recv));
                facts.push(self.ctx.arena.derive(d2, |f| {
                    f.access_path = mapped;
                }));
            }
        }
        RuleOutput::with_facts(facts)
    }

    fn call_to_return_flow(
        &self,
        _d1: FactId,
        d2: FactId,
        call: NodeId,
        _ret_site: NodeId,
    ) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        if let Some(call_expr) = self.ctx.icfg.stmt(call).as_call() {
            // The call overwrites its result; the callee's summary supplies
            // any new taint on it.
            if let Some(result) = call_expr.result {
                if fact.access_path.starts_with(Value::Local(result)) {
                    return RuleOutput::kill_source();
                }
            }
        }
        RuleOutput::none()
    }

    fn return_flow(
        &self,
        _caller_d1s: &[FactId],
        d2: FactId,
        exit: NodeId,
        _ret_site: Option<NodeId>,
        call_site: Option<NodeId>,
    ) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        let ap = &fact.access_path;
        if ap.is_empty() || ap.is_static_field() || fact.exception_thrown {
            return RuleOutput::none();
        }
        let call_site = match call_site {
            Some(c) => c,
            None => return RuleOutput::none(),
        };
        let call_expr = match self.ctx.icfg.stmt(call_site).as_call() {
            Some(c) => c,
            None => return RuleOutput::none(),
        };
        let callee = self.ctx.icfg.proc_of(exit);

        let mut facts = Vec::new();
        // Return value into the caller's result local.
        if let Stmt::Return(Some(ret_val)) = self.ctx.icfg.stmt(exit) {
            if ap.starts_with(*ret_val) {
                if let Some(result) = call_expr.result {
                    let mapped = ap.rebase(Value::Local(result));
                    facts.push(self.ctx.arena.derive(d2, |f| {
                        f.access_path = mapped;
                    }));
                }
            }
        }
        // Heap effects on parameters and the receiver flow back to the
        // caller-side values. Plain parameter taints stay in the callee; the
        // caller's copy was passed by value.
        let params = self.ctx.icfg.params_of(callee);
        for (i, param) in params.iter().enumerate() {
            if ap.starts_with(Value::Local(*param))
                && (!ap.fields().is_empty() || ap.taint_sub_fields())
            {
                if let Some(arg) = call_expr.args.get(i) {
                    if arg.is_taintable() {
                        let mapped = ap.rebase(*arg);
                        facts.push(self.ctx.arena.derive(d2, |f| {
                            f.access_path = mapped;
                        }));
                    }
                }
            }
        }
        if let (Some(callee_recv), Some(caller_recv)) =
            (self.ctx.icfg.receiver_of(callee), call_expr.receiver)
        {
            if ap.starts_with(Value::Local(callee_recv))
                && (!ap.fields().is_empty() || ap.taint_sub_fields())
            {
                let mapped = ap.rebase(Value::Local(caller_recv));
                facts.push(self.ctx.arena.derive(d2, |f| {
                    f.access_path = mapped;
                }));
            }
        }
        RuleOutput::with_facts(facts)
    }
}
