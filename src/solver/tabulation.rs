//! The tabulation solver: seeds, schedules, and drains path-edge processing.
//!
//! `propagate` is the single entry point through which work enters the
//! system. It performs an atomic insert-if-absent into the jump-function
//! store; only a genuinely new edge schedules a task, so re-propagating an
//! already-known triple is free and the fixpoint terminates. Concurrent
//! arrivals of an equal edge converge on one canonical fact whose neighbor
//! set absorbs the others.
//!
//! Per-task work splits by statement kind: calls evaluate the call-flow and
//! call-to-return functions and either reuse a stored end summary or seed a
//! self-loop at the callee entry; exits register end summaries and push
//! return flow back into every recorded caller context; everything else is
//! plain normal flow along CFG successors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::PredecessorShorteningMode;
use crate::context::AnalysisContext;
use crate::errors::{Result, TaintError};
use crate::program::{InterproceduralCfg, NodeId};
use crate::rules::RuleManager;
use crate::solver::executor::Executor;
use crate::solver::gc::{EagerReferenceProvider, GarbageCollector, RefCountGc, ReferenceProvider};
use crate::solver::memo::{EndSummaries, IncomingTable, JumpFunctions, SummaryEntry, SummaryRegistration};
use crate::solver::path_edge::PathEdge;
use crate::taint::FactId;

/// Why a run was stopped from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    Timeout,
    MemoryPressure,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Created,
    Running,
    Completed,
    Killed,
}

struct SolverCore {
    ctx: Arc<AnalysisContext>,
    rules: RuleManager,
    jump_functions: Arc<JumpFunctions>,
    end_summaries: EndSummaries,
    incoming: IncomingTable,
    gc: Arc<RefCountGc>,
    executor: Executor,
    state: Mutex<SolverState>,
    kill_reason: Mutex<Option<TerminationReason>>,
    propagation_count: AtomicUsize,
}

pub struct TabulationSolver {
    core: Arc<SolverCore>,
}

impl TabulationSolver {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        let provider = Box::new(EagerReferenceProvider::new(&ctx.icfg));
        Self::with_reference_provider(ctx, provider)
    }

    /// As [`Self::new`] with an explicit GC reference provider (e.g.
    /// [`crate::solver::LazyReferenceProvider`] for very large call graphs).
    pub fn with_reference_provider(
        ctx: Arc<AnalysisContext>,
        provider: Box<dyn ReferenceProvider>,
    ) -> Self {
        let jump_functions = Arc::new(JumpFunctions::new());
        let gc = RefCountGc::new(
            Arc::clone(&jump_functions),
            provider,
            ctx.config.gc_trigger,
            ctx.config.gc_method_threshold,
            ctx.config.gc_edge_threshold,
        );
        let executor = Executor::new(ctx.config.effective_num_threads());
        let rules = RuleManager::new(Arc::clone(&ctx));
        Self {
            core: Arc::new(SolverCore {
                ctx,
                rules,
                jump_functions,
                end_summaries: EndSummaries::new(),
                incoming: IncomingTable::new(),
                gc,
                executor,
                state: Mutex::new(SolverState::Created),
                kill_reason: Mutex::new(None),
                propagation_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Seeds the tautology fact at every entry point and runs worker tasks to
    /// a fixpoint. Results accumulate in the context's result sink.
    pub fn solve(&self) -> Result<()> {
        {
            let mut state = self.core.state.lock();
            if *state != SolverState::Created {
                return Err(TaintError::Lifecycle(format!(
                    "solve() requires a fresh or reset solver, state is {:?}",
                    *state
                )));
            }
            *state = SolverState::Running;
        }

        let sweeper = self
            .core
            .ctx
            .config
            .gc_sweep_interval_ms
            .map(|ms| self.core.gc.start_sweeper(Duration::from_millis(ms)));

        let zero = self.core.ctx.zero();
        let mut seeds = 0usize;
        for &proc in self.core.ctx.icfg.entry_procs() {
            for &entry in self.core.ctx.icfg.entry_points_of(proc) {
                self.core.propagate(zero, entry, zero, None, false);
                seeds += 1;
            }
        }
        log::info!("seeded {seeds} entry nodes, running to fixpoint");

        self.core.executor.await_completion();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }

        if let Some(message) = self.core.executor.take_panic() {
            self.core.ctx.results.mark_incomplete();
            *self.core.state.lock() = SolverState::Killed;
            return Err(TaintError::TaskPanic(message));
        }

        let killed = self.core.kill_reason.lock().is_some();
        *self.core.state.lock() = if killed {
            SolverState::Killed
        } else {
            SolverState::Completed
        };
        log::info!(
            "solve {}: {} propagations, {} flows, gc swept {} procedures / {} edges",
            if killed { "killed" } else { "completed" },
            self.core.propagation_count.load(Ordering::Relaxed),
            self.core.ctx.results.len(),
            self.core.gc.gced_method_count(),
            self.core.gc.gced_edge_count(),
        );
        Ok(())
    }

    /// Stops the run early. Already-recorded results stay valid (the
    /// algorithm is monotone) but are flagged as possibly incomplete.
    pub fn force_terminate(&self, reason: TerminationReason) {
        log::warn!("forced termination: {reason:?}");
        *self.core.kill_reason.lock() = Some(reason);
        *self.core.state.lock() = SolverState::Killed;
        self.core.executor.kill();
        self.core.ctx.results.mark_incomplete();
    }

    pub fn state(&self) -> SolverState {
        *self.core.state.lock()
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state(), SolverState::Completed | SolverState::Killed)
    }

    pub fn is_killed(&self) -> bool {
        self.state() == SolverState::Killed
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.core.kill_reason.lock().clone()
    }

    /// Clears a kill flag so the instance can solve again; memo tables and
    /// results are kept (the algorithm is monotone, re-solving only adds).
    pub fn reset(&self) {
        *self.core.kill_reason.lock() = None;
        self.core.executor.clear_kill();
        *self.core.state.lock() = SolverState::Created;
    }

    /// Number of distinct path edges ever scheduled.
    pub fn propagation_count(&self) -> usize {
        self.core.propagation_count.load(Ordering::Relaxed)
    }

    /// The collector, for joining into a [`crate::solver::GcPeerGroup`].
    pub fn collector(&self) -> &Arc<RefCountGc> {
        &self.core.gc
    }

    pub fn context(&self) -> &Arc<AnalysisContext> {
        &self.core.ctx
    }

    #[cfg(test)]
    fn core(&self) -> &Arc<SolverCore> {
        &self.core
    }
}

impl SolverCore {
    /// The only path by which work enters the system.
    fn propagate(
        self: &Arc<Self>,
        d1: FactId,
        target: NodeId,
        d2: FactId,
        related_call_site: Option<NodeId>,
        unbalanced_return: bool,
    ) {
        let max_path = self.ctx.config.max_abstraction_path_length;
        if max_path >= 0 && i64::from(self.ctx.arena.get(d2).path_length) > max_path {
            return;
        }

        let proc = self.ctx.icfg.proc_of(target);
        if unbalanced_return {
            self.gc.pin(proc);
        }

        let edge = PathEdge::new(d1, target, d2);
        match self.jump_functions.insert_if_absent(proc, edge.key(&self.ctx.arena), edge) {
            Some(existing) => {
                // Same unit of work, different witness: record the arrival as
                // a neighbor so reporting can recover all paths. Joins at
                // call sites are essential and bypass the cap.
                if existing.d2 != d2 {
                    self.ctx.arena.add_neighbor(
                        existing.d2,
                        d2,
                        self.ctx.config.max_join_point_abstractions,
                        related_call_site.is_some(),
                    );
                }
            }
            None => {
                self.gc.notify_edge_scheduled(proc);
                self.propagation_count.fetch_add(1, Ordering::Relaxed);
                let core = Arc::clone(self);
                let scheduled = self.executor.execute(Box::new(move || {
                    core.process(edge);
                    core.gc.notify_task_processed(proc);
                }));
                if !scheduled {
                    // Killed pool; rebalance the counter.
                    self.gc.notify_task_processed(proc);
                }
                self.gc.gc();
            }
        }
    }

    fn process(self: &Arc<Self>, edge: PathEdge) {
        let node = edge.node;
        // A node can play two roles at once: a call with no successors is
        // its procedure's exit point, and a throw can be an exit while still
        // being an ordinary statement.
        if self.ctx.icfg.is_exit(node) {
            self.process_exit(&edge);
        }
        if self.ctx.icfg.is_call(node) {
            self.process_call(&edge);
        } else if !self.ctx.icfg.succs_of(node).is_empty() {
            self.process_normal(&edge);
        }
    }

    fn process_normal(self: &Arc<Self>, edge: &PathEdge) {
        for &succ in self.ctx.icfg.succs_of(edge.node) {
            if let Some(facts) = self.rules.apply_normal_flow(edge.d1, edge.d2, edge.node, succ) {
                for d3 in facts {
                    self.propagate(edge.d1, succ, d3, None, false);
                }
            }
        }
    }

    fn process_call(self: &Arc<Self>, edge: &PathEdge) {
        let call = edge.node;
        let (d1, d2) = (edge.d1, edge.d2);
        let ret_sites = self.ctx.icfg.return_sites_of(call);
        let callees = self.ctx.icfg.callees_of(call);

        if callees.len() <= self.ctx.config.max_callees_per_call_site {
            for &callee in callees {
                let Some(entry_facts) = self.rules.apply_call_flow(d1, d2, call, callee) else {
                    continue;
                };
                for d3 in entry_facts {
                    // Register the caller context before consulting the
                    // summaries: an exit processed concurrently either sees
                    // the record or registered a summary we see here.
                    if !self.incoming.register(&self.ctx.arena, callee, d3, call, d1, d2) {
                        continue;
                    }
                    let summaries = self
                        .end_summaries
                        .lookup(callee, &self.ctx.arena.key(d3));
                    if summaries.is_empty() {
                        for &entry in self.ctx.icfg.entry_points_of(callee) {
                            self.propagate(d3, entry, d3, None, false);
                        }
                    } else {
                        self.apply_end_summaries(call, d1, d2, &summaries, ret_sites);
                    }
                }
            }
        } else {
            log::debug!(
                "skipping call at node {} with {} callees (cap {})",
                call.0,
                callees.len(),
                self.ctx.config.max_callees_per_call_site
            );
        }

        for &ret_site in ret_sites {
            if let Some(facts) = self.rules.apply_call_to_return_flow(d1, d2, call, ret_site) {
                for d3 in facts {
                    self.propagate(d1, ret_site, d3, Some(call), false);
                }
            }
        }
    }

    /// Summary reuse: derives return flow from a memoized exit behavior
    /// without re-entering the callee.
    fn apply_end_summaries(
        self: &Arc<Self>,
        call: NodeId,
        d1: FactId,
        d2: FactId,
        summaries: &[SummaryEntry],
        ret_sites: &[NodeId],
    ) {
        for summary in summaries {
            for &ret_site in ret_sites {
                let Some(facts) = self.rules.apply_return_flow(
                    &[d1],
                    summary.exit_fact,
                    summary.exit_node,
                    Some(ret_site),
                    Some(call),
                ) else {
                    continue;
                };
                for d5 in facts {
                    let d5 = self.shorten_predecessor(d5, d2);
                    self.propagate(d1, ret_site, d5, Some(call), false);
                }
            }
        }
    }

    fn process_exit(self: &Arc<Self>, edge: &PathEdge) {
        let exit = edge.node;
        let (d1, d2) = (edge.d1, edge.d2);
        if self.ctx.arena.is_zero(d2) {
            return;
        }
        let proc = self.ctx.icfg.proc_of(exit);

        if !self.ctx.arena.is_zero(d1) {
            // A structurally equal summary already notified every caller;
            // this arrival only enriches its neighbor set.
            if self.end_summaries.register(&self.ctx.arena, proc, d1, exit, d2)
                == SummaryRegistration::Merged
            {
                return;
            }
            for (call_site, records) in self.incoming.lookup(proc, &self.ctx.arena.key(d1)) {
                let caller_d1s: Vec<FactId> = records.iter().map(|r| r.caller_d1).collect();
                for &ret_site in self.ctx.icfg.return_sites_of(call_site) {
                    let Some(facts) = self.rules.apply_return_flow(
                        &caller_d1s,
                        d2,
                        exit,
                        Some(ret_site),
                        Some(call_site),
                    ) else {
                        continue;
                    };
                    for d5 in facts {
                        for record in &records {
                            let d5 = self.shorten_predecessor(d5, record.caller_d2);
                            self.propagate(record.caller_d1, ret_site, d5, Some(call_site), false);
                        }
                    }
                }
            }
        } else if self.ctx.config.follow_returns_past_seeds {
            // Unbalanced return: a fact reached an exit under the zero
            // context (e.g. a taint seeded mid-program). Push it into every
            // known caller so side effects are not lost; the procedure is
            // pinned so its edges stay available.
            self.gc.pin(proc);
            let callers = self.ctx.icfg.callers_of(proc);
            if callers.is_empty() {
                // No caller to return into; evaluate once against a null
                // caller for the rules' side effects (sink recording).
                let _ = self.rules.apply_return_flow(&[d1], d2, exit, None, None);
            } else {
                let zero = self.ctx.zero();
                for &call_site in callers {
                    for &ret_site in self.ctx.icfg.return_sites_of(call_site) {
                        let Some(facts) = self.rules.apply_return_flow(
                            &[zero],
                            d2,
                            exit,
                            Some(ret_site),
                            Some(call_site),
                        ) else {
                            continue;
                        };
                        for d5 in facts {
                            self.propagate(zero, ret_site, d5, Some(call_site), true);
                        }
                    }
                }
            }
        }
    }

    /// Trades witness-path fidelity for memory at summary-return joins.
    fn shorten_predecessor(&self, d5: FactId, caller_d2: FactId) -> FactId {
        match self.ctx.config.predecessor_shortening_mode {
            PredecessorShorteningMode::Never => d5,
            PredecessorShorteningMode::Always => {
                if d5 == caller_d2 {
                    d5
                } else {
                    self.ctx.arena.with_predecessor(d5, caller_d2)
                }
            }
            PredecessorShorteningMode::IfEqual => {
                if self.ctx.arena.structurally_equal(d5, caller_d2) {
                    caller_d2
                } else {
                    d5
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GcTrigger, TaintConfig};
    use crate::program::{CallExpr, ProgramBuilder, Stmt, Value};
    use crate::taint::SimpleSourceSinkProvider;

    fn minimal_solver() -> TabulationSolver {
        let mut builder = ProgramBuilder::new();
        let main = builder.add_proc("main");
        builder.mark_entry_proc(main);
        let a = builder.add_stmt(main, Stmt::Nop);
        let b = builder.add_stmt(main, Stmt::Return(None));
        builder.add_edge(a, b);
        let icfg = Arc::new(builder.finalize());
        let oracle = Arc::new(SimpleSourceSinkProvider::new());
        let ctx = AnalysisContext::new(icfg, TaintConfig::default(), oracle).unwrap();
        TabulationSolver::new(ctx)
    }

    #[test]
    fn propagate_is_idempotent() {
        let solver = minimal_solver();
        let core = solver.core();
        let zero = core.ctx.zero();

        for _ in 0..5 {
            core.propagate(zero, crate::program::NodeId(0), zero, None, false);
        }
        core.executor.await_completion();

        // One seed plus its successor; re-propagation scheduled nothing new.
        assert_eq!(core.jump_functions.proc_edge_count(crate::program::ProcId(0)), 2);
    }

    #[test]
    fn unbalanced_return_pins_the_procedure_against_collection() {
        // main: r = helper(); sink(r)
        // helper: t = source(); return t
        //
        // The taint is born inside helper under the zero context, so it
        // leaves through the unbalanced-return branch. Under the eager
        // trigger every other procedure may be swept once idle; the pinned
        // one must keep its path edges.
        let mut builder = ProgramBuilder::new();
        let main = builder.add_proc("main");
        builder.mark_entry_proc(main);
        let helper = builder.add_proc("helper");

        let t = builder.add_local(helper, None);
        let src = builder.add_stmt(
            helper,
            Stmt::Call(CallExpr {
                result: Some(t),
                receiver: None,
                args: vec![],
            }),
        );
        let ret_t = builder.add_stmt(helper, Stmt::Return(Some(Value::Local(t))));
        builder.add_edge(src, ret_t);

        let r = builder.add_local(main, None);
        let call = builder.add_stmt(
            main,
            Stmt::Call(CallExpr {
                result: Some(r),
                receiver: None,
                args: vec![],
            }),
        );
        let snk = builder.add_stmt(
            main,
            Stmt::Call(CallExpr {
                result: None,
                receiver: None,
                args: vec![Value::Local(r)],
            }),
        );
        let ret = builder.add_stmt(main, Stmt::Return(None));
        builder.add_edge(call, snk);
        builder.add_edge(snk, ret);
        builder.add_call_target(call, helper);

        let mut oracle = SimpleSourceSinkProvider::new();
        oracle.mark_source(src, "config-value");
        oracle.mark_sink(snk, "log");

        let config = TaintConfig::default();
        assert_eq!(config.gc_trigger, GcTrigger::Immediate);
        let icfg = Arc::new(builder.finalize());
        let ctx = AnalysisContext::new(icfg, config, Arc::new(oracle)).unwrap();
        let solver = TabulationSolver::new(Arc::clone(&ctx));
        solver.solve().unwrap();

        let flows = ctx.results.flows();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].sink_stmt, snk);

        let core = solver.core();
        assert!(core.jump_functions.proc_edge_count(helper) > 0);
    }

    #[test]
    fn lifecycle_runs_created_to_completed() {
        let solver = minimal_solver();
        assert_eq!(solver.state(), SolverState::Created);
        assert!(!solver.is_terminated());
        solver.solve().unwrap();
        assert_eq!(solver.state(), SolverState::Completed);
        assert!(solver.is_terminated());
        assert!(!solver.is_killed());
        assert!(solver.termination_reason().is_none());
    }

    #[test]
    fn solve_twice_requires_reset() {
        let solver = minimal_solver();
        solver.solve().unwrap();
        assert!(matches!(solver.solve(), Err(TaintError::Lifecycle(_))));
        solver.reset();
        solver.solve().unwrap();
    }

    #[test]
    fn force_terminate_is_observable() {
        let solver = minimal_solver();
        solver.force_terminate(TerminationReason::Timeout);
        assert!(solver.is_killed());
        assert_eq!(solver.termination_reason(), Some(TerminationReason::Timeout));
        assert!(solver.context().results.is_incomplete());

        solver.reset();
        assert_eq!(solver.state(), SolverState::Created);
        assert!(solver.termination_reason().is_none());
    }
}
