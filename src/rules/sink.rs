//! Sink rule: records taints that reach declared sinks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, ProcId, Stmt, Value};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::{FactId, TaintFlow};

pub struct SinkRule {
    ctx: Arc<AnalysisContext>,
    /// Set once the result sink refuses a flow (budget exhausted); from then
    /// on call processing is cut off.
    kill_state: AtomicBool,
}

impl SinkRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self {
            ctx,
            kill_state: AtomicBool::new(false),
        }
    }

    /// Whether the taint is referenced by a use of `value` plainly enough to
    /// match a sink: either the taint is exactly on the value, or it covers
    /// all of the value's sub-fields.
    fn references(&self, fact: &crate::taint::Fact, value: Value) -> bool {
        fact.access_path.plain_value() == Some(value)
            || (fact.access_path.starts_with(value) && fact.access_path.taint_sub_fields())
    }

    fn record(&self, d2: FactId, sink_stmt: NodeId) {
        let fact = self.ctx.arena.get(d2);
        let sink_info = match self
            .ctx
            .oracle
            .sink_info(sink_stmt, &fact.access_path, self.ctx.icfg.as_ref())
        {
            Some(info) => info,
            None => return,
        };
        let source = fact.source_stmt.and_then(|s| {
            self.ctx
                .oracle
                .source_info(s, self.ctx.icfg.as_ref())
                .map(|info| info.descriptor)
        });
        let flow = TaintFlow {
            source,
            source_stmt: fact.source_stmt,
            sink: sink_info.descriptor,
            sink_stmt,
            witness: d2,
        };
        if !self.ctx.results.add_result(flow, fact.key()) {
            self.kill_state.store(true, Ordering::Relaxed);
        }
    }

    fn check_stmt(&self, d2: FactId, stmt: NodeId) {
        if self.ctx.arena.is_zero(d2) {
            return;
        }
        let fact = self.ctx.arena.get(d2);
        if !fact.active || fact.exception_thrown {
            return;
        }
        // A control taint alive at a sink means the sink executes under a
        // tainted condition; report it without a data match.
        if fact.is_control() {
            if self
                .ctx
                .oracle
                .sink_info(stmt, &fact.access_path, self.ctx.icfg.as_ref())
                .is_some()
            {
                self.record(d2, stmt);
            }
            return;
        }
        for value in self.ctx.icfg.stmt(stmt).used_values() {
            if self.references(&fact, value) {
                self.record(d2, stmt);
                return;
            }
        }
    }
}

impl PropagationRule for SinkRule {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, _dest: NodeId) -> RuleOutput {
        match self.ctx.icfg.stmt(stmt) {
            Stmt::Return(_) | Stmt::If { .. } | Stmt::Assign { .. } | Stmt::Throw(_) => {
                self.check_stmt(d2, stmt)
            }
            _ => {}
        }
        RuleOutput::none()
    }

    fn call_to_return_flow(
        &self,
        _d1: FactId,
        d2: FactId,
        call: NodeId,
        _ret_site: NodeId,
    ) -> RuleOutput {
        self.check_stmt(d2, call);
        RuleOutput::none()
    }

    // Exit statements have no outgoing normal edges, so sinks on them are
    // only visible here.
    fn return_flow(
        &self,
        _caller_d1s: &[FactId],
        d2: FactId,
        exit: NodeId,
        _ret_site: Option<NodeId>,
        _call_site: Option<NodeId>,
    ) -> RuleOutput {
        self.check_stmt(d2, exit);
        RuleOutput::none()
    }

    fn call_flow(&self, _d1: FactId, _d2: FactId, _call: NodeId, _callee: ProcId) -> RuleOutput {
        if self.kill_state.load(Ordering::Relaxed) {
            RuleOutput::kill_all()
        } else {
            RuleOutput::none()
        }
    }
}
