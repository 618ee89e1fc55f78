//! Skip rule: well-known side-effect-free bootstrap procedures are never
//! entered; their calls degenerate to the call-to-return edge.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, ProcId};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct SkipSystemClassRule {
    ctx: Arc<AnalysisContext>,
}

impl SkipSystemClassRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }
}

impl PropagationRule for SkipSystemClassRule {
    fn name(&self) -> &'static str {
        "skip-system-class"
    }

    fn call_flow(&self, _d1: FactId, _d2: FactId, _call: NodeId, callee: ProcId) -> RuleOutput {
        if self.ctx.icfg.is_system_proc(callee) {
            RuleOutput::kill_all()
        } else {
            RuleOutput::none()
        }
    }
}
