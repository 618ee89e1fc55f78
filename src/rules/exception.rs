//! Exception rule: throw/catch as data flow from the thrown value to the
//! caught local, including unwinding across call returns.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, Stmt, Value};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::{AccessPath, FactId};

pub struct ExceptionRule {
    ctx: Arc<AnalysisContext>,
}

impl ExceptionRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    fn catch_target(&self, node: NodeId) -> Option<crate::program::LocalId> {
        match self.ctx.icfg.stmt(node) {
            Stmt::Catch(local) => Some(*local),
            _ => None,
        }
    }
}

impl PropagationRule for ExceptionRule {
    fn name(&self) -> &'static str {
        "exception"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, dest: NodeId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        let exceptional_edge = self.ctx.icfg.is_exceptional_edge(stmt, dest);

        // An in-flight exception taint travels exceptional edges only.
        if fact.exception_thrown {
            let mut out = RuleOutput::kill_source();
            if exceptional_edge {
                if let Some(caught) = self.catch_target(dest) {
                    out.facts.push(self.ctx.arena.derive(d2, |f| {
                        f.access_path = AccessPath::for_value(Value::Local(caught));
                        f.exception_thrown = false;
                    }));
                } else {
                    out.facts.push(d2);
                }
            }
            return out;
        }

        // A tainted value being thrown turns into an exception taint on the
        // exceptional edge; the plain taint dies with the abrupt completion.
        if let Stmt::Throw(v) = self.ctx.icfg.stmt(stmt) {
            if fact.active && fact.access_path.starts_with(*v) {
                let mut out = RuleOutput::kill_source();
                if exceptional_edge {
                    if let Some(caught) = self.catch_target(dest) {
                        out.facts.push(self.ctx.arena.derive(d2, |f| {
                            f.access_path = AccessPath::for_value(Value::Local(caught));
                        }));
                    } else {
                        out.facts.push(self.ctx.arena.derive(d2, |f| {
                            f.exception_thrown = true;
                        }));
                    }
                }
                return out;
            }
        }
        RuleOutput::none()
    }

    fn return_flow(
        &self,
        _caller_d1s: &[FactId],
        d2: FactId,
        exit: NodeId,
        ret_site: Option<NodeId>,
        call_site: Option<NodeId>,
    ) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);

        // Unwinding: an exception leaving the callee continues at the
        // caller's exceptional return site, binding at a catch if one is
        // there.
        let thrown = if fact.exception_thrown {
            Some(d2)
        } else if let Stmt::Throw(v) = self.ctx.icfg.stmt(exit) {
            if fact.active && fact.access_path.starts_with(*v) {
                Some(self.ctx.arena.derive(d2, |f| {
                    f.exception_thrown = true;
                }))
            } else {
                None
            }
        } else {
            None
        };
        let thrown = match thrown {
            Some(t) => t,
            None => return RuleOutput::none(),
        };
        let (call_site, ret_site) = match (call_site, ret_site) {
            (Some(c), Some(r)) => (c, r),
            _ => return RuleOutput::none(),
        };
        if !self.ctx.icfg.is_exceptional_edge(call_site, ret_site) {
            return RuleOutput::none();
        }
        if let Some(caught) = self.catch_target(ret_site) {
            RuleOutput::with_facts(vec![self.ctx.arena.derive(thrown, |f| {
                f.access_path = AccessPath::for_value(Value::Local(caught));
                f.exception_thrown = false;
            })])
        } else {
            RuleOutput::with_facts(vec![thrown])
        }
    }
}
