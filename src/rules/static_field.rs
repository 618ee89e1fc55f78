//! Static-field rule: gates cross-procedure propagation of static-field
//! taints behind configuration and a "does the callee read this field" check.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, ProcId, Value};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct StaticFieldRule {
    ctx: Arc<AnalysisContext>,
}

impl StaticFieldRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    fn static_base(&self, d2: FactId) -> Option<crate::program::FieldId> {
        if self.ctx.arena.is_zero(d2) {
            return None;
        }
        match self.ctx.arena.get(d2).access_path.base() {
            Some(Value::StaticField(f)) => Some(f),
            _ => None,
        }
    }
}

impl PropagationRule for StaticFieldRule {
    fn name(&self) -> &'static str {
        "static-field"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, _stmt: NodeId, _dest: NodeId) -> RuleOutput {
        if self.static_base(d2).is_some() && !self.ctx.config.enable_static_field_tracking {
            return RuleOutput::kill_all();
        }
        RuleOutput::none()
    }

    fn call_flow(&self, _d1: FactId, d2: FactId, _call: NodeId, callee: ProcId) -> RuleOutput {
        let field = match self.static_base(d2) {
            Some(f) => f,
            None => return RuleOutput::none(),
        };
        if !self.ctx.config.enable_static_field_tracking {
            return RuleOutput::none();
        }
        // Entering the callee is only worthwhile when it (or something it
        // calls) actually reads the field.
        if self.ctx.icfg.reads_static_field(callee, field) {
            RuleOutput::with_facts(vec![d2])
        } else {
            RuleOutput::none()
        }
    }

    fn return_flow(
        &self,
        _caller_d1s: &[FactId],
        d2: FactId,
        _exit: NodeId,
        _ret_site: Option<NodeId>,
        _call_site: Option<NodeId>,
    ) -> RuleOutput {
        if self.static_base(d2).is_some() && self.ctx.config.enable_static_field_tracking {
            // Statics are scope-free; the same fact is valid in the caller.
            RuleOutput::with_facts(vec![d2])
        } else {
            RuleOutput::none()
        }
    }
}
