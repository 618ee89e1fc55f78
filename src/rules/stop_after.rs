//! Stop-after-k-flows rule: once the result budget is spent, every further
//! edge is killed, bounding analysis effort.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{NodeId, ProcId};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct StopAfterKFlowsRule {
    ctx: Arc<AnalysisContext>,
}

impl StopAfterKFlowsRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    fn check(&self) -> RuleOutput {
        if self.ctx.results.saturated() {
            RuleOutput::kill_all()
        } else {
            RuleOutput::none()
        }
    }
}

impl PropagationRule for StopAfterKFlowsRule {
    fn name(&self) -> &'static str {
        "stop-after-k-flows"
    }

    fn normal_flow(&self, _d1: FactId, _d2: FactId, _stmt: NodeId, _dest: NodeId) -> RuleOutput {
        self.check()
    }

    fn call_flow(&self, _d1: FactId, _d2: FactId, _call: NodeId, _callee: ProcId) -> RuleOutput {
        self.check()
    }

    fn call_to_return_flow(
        &self,
        _d1: FactId,
        _d2: FactId,
        _call: NodeId,
        _ret_site: NodeId,
    ) -> RuleOutput {
        self.check()
    }

    fn return_flow(
        &self,
        _caller_d1s: &[FactId],
        _d2: FactId,
        _exit: NodeId,
        _ret_site: Option<NodeId>,
        _call_site: Option<NodeId>,
    ) -> RuleOutput {
        self.check()
    }
}
