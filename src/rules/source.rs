//! Source rule: converts the zero fact into seed taints at declared sources.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, ProcId};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct SourceRule {
    ctx: Arc<AnalysisContext>,
}

impl SourceRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    fn seed(&self, d2: FactId, stmt: NodeId) -> RuleOutput {
        if !self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        // The zero fact itself is never propagated onwards by a rule; the
        // manager keeps it alive.
        let mut out = RuleOutput::kill_source();
        match self.ctx.oracle.source_info(stmt, self.ctx.icfg.as_ref()) {
            Some(info) if !info.access_paths.is_empty() => {
                for ap in info.access_paths {
                    out.facts.push(self.ctx.arena.derive(d2, |f| {
                        f.access_path = ap;
                        f.active = true;
                        f.source_stmt = Some(stmt);
                    }));
                }
            }
            _ => out.kill_all = true,
        }
        out
    }
}

impl PropagationRule for SourceRule {
    fn name(&self) -> &'static str {
        "source"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, _dest: NodeId) -> RuleOutput {
        self.seed(d2, stmt)
    }

    fn call_to_return_flow(
        &self,
        _d1: FactId,
        d2: FactId,
        call: NodeId,
        _ret_site: NodeId,
    ) -> RuleOutput {
        self.seed(d2, call)
    }

    fn call_flow(&self, _d1: FactId, d2: FactId, call: NodeId, _callee: ProcId) -> RuleOutput {
        // Source and sink procedures are modeled by the oracle, not analyzed.
        if self
            .ctx
            .oracle
            .source_info(call, self.ctx.icfg.as_ref())
            .is_some()
        {
            return RuleOutput::kill_all();
        }
        if !self.ctx.arena.is_zero(d2) {
            let fact = self.ctx.arena.get(d2);
            if fact.active
                && self
                    .ctx
                    .oracle
                    .sink_info(call, &fact.access_path, self.ctx.icfg.as_ref())
                    .is_some()
            {
                return RuleOutput::kill_all();
            }
        }
        RuleOutput::none()
    }
}
