//! Typing rule: kills a fact when its access path's declared type cannot
//! survive a cast it flows through.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, Rvalue, Stmt};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct TypingRule {
    ctx: Arc<AnalysisContext>,
}

impl TypingRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }
}

impl PropagationRule for TypingRule {
    fn name(&self) -> &'static str {
        "typing"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, _dest: NodeId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let (value, target) = match self.ctx.icfg.stmt(stmt) {
            Stmt::Assign {
                rhs: Rvalue::Cast { value, target },
                ..
            } => (*value, *target),
            _ => return RuleOutput::none(),
        };
        let fact = self.ctx.arena.get(d2);
        if !fact.access_path.starts_with(value) {
            return RuleOutput::none();
        }
        let declared = match self.ctx.icfg.value_type(value) {
            Some(t) => t,
            None => return RuleOutput::none(),
        };
        // An impossible cast throws; execution cannot continue with this
        // fact past the cast.
        if !self.ctx.icfg.types().cast_may_succeed(declared, target) {
            return RuleOutput::kill_all();
        }
        RuleOutput::none()
    }
}
