//! Applies a configured taint wrapper at call sites.
//!
//! Wrapper taints are produced on the call-to-return edge; when the wrapper
//! is exclusive for a call, the callee bodies are not entered.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{NodeId, ProcId};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::{FactId, TaintWrapper};

pub struct WrapperRule {
    ctx: Arc<AnalysisContext>,
}

impl WrapperRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    fn wrapper(&self) -> Option<&Arc<dyn TaintWrapper>> {
        self.ctx.wrapper.as_ref()
    }
}

impl PropagationRule for WrapperRule {
    fn name(&self) -> &'static str {
        "taint-wrapper"
    }

    fn call_to_return_flow(
        &self,
        _d1: FactId,
        d2: FactId,
        call: NodeId,
        _ret_site: NodeId,
    ) -> RuleOutput {
        let Some(wrapper) = self.wrapper() else {
            return RuleOutput::none();
        };
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        match wrapper.taints_for_call(&self.ctx, call, d2) {
            Some(facts) => RuleOutput::with_facts(facts),
            None => RuleOutput::none(),
        }
    }

    fn call_flow(&self, _d1: FactId, d2: FactId, call: NodeId, _callee: ProcId) -> RuleOutput {
        let Some(wrapper) = self.wrapper() else {
            return RuleOutput::none();
        };
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        if wrapper.is_exclusive(&self.ctx, call, d2) {
            RuleOutput::kill_all()
        } else {
            RuleOutput::none()
        }
    }
}
