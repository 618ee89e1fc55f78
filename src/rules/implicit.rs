//! Implicit-flow rule: tainted branch conditions spawn a control taint with
//! an empty access path, scoped to the branch's immediate post-dominator.

use std::sync::Arc;

use crate::config::ImplicitFlowMode;
use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, Stmt};
use crate::rules::{write_access_path, PropagationRule, RuleOutput};
use crate::taint::{AccessPath, ArrayTaintType, FactId};

pub struct ImplicitFlowRule {
    ctx: Arc<AnalysisContext>,
}

impl ImplicitFlowRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }
}

impl PropagationRule for ImplicitFlowRule {
    fn name(&self) -> &'static str {
        "implicit-flow"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, dest: NodeId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);

        // Leaving the scope: the control taint dies at the post-dominator of
        // the branch that spawned it.
        if fact.is_control() {
            let mut out = RuleOutput::none();
            if fact.dominator == Some(dest) {
                out.kill_source = true;
            }
            if self.ctx.config.implicit_flow_mode == ImplicitFlowMode::All {
                // Anything written under a tainted condition becomes tainted
                // data in its own right, unbounded by the scope.
                if let Stmt::Assign { lhs, .. } = self.ctx.icfg.stmt(stmt) {
                    if let Some(path) = write_access_path(
                        *lhs,
                        &[],
                        false,
                        ArrayTaintType::None,
                        self.ctx.config.max_access_path_length,
                    ) {
                        out.facts.push(self.ctx.arena.derive(d2, |f| {
                            f.access_path = path;
                            f.dominator = None;
                        }));
                    }
                }
            }
            return out;
        }

        // A tainted condition opens a control scope up to its immediate
        // post-dominator. A branch that post-dominates itself has no scope.
        if fact.active && !fact.exception_thrown {
            if let Stmt::If { left, right } = self.ctx.icfg.stmt(stmt) {
                if fact.access_path.starts_with(*left) || fact.access_path.starts_with(*right) {
                    if let Some(dom) = self.ctx.icfg.immediate_postdominator(stmt) {
                        if dom != dest {
                            return RuleOutput::with_facts(vec![self.ctx.arena.derive(
                                d2,
                                |f| {
                                    f.access_path = AccessPath::empty();
                                    f.dominator = Some(dom);
                                },
                            )]);
                        }
                    }
                }
            }
        }
        RuleOutput::none()
    }

    // The scope boundary can also be reached by returning past a call.
    fn call_to_return_flow(
        &self,
        _d1: FactId,
        d2: FactId,
        _call: NodeId,
        ret_site: NodeId,
    ) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        if fact.is_control() && fact.dominator == Some(ret_site) {
            RuleOutput::kill_source()
        } else {
            RuleOutput::none()
        }
    }
}
