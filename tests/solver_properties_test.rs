//! Properties the solver must hold regardless of scheduling and collection:
//! the garbage collector never changes results, the flow budget only removes
//! flows, and the lifecycle state machine rejects misuse.

mod common;

use std::sync::Arc;

use common::{call, direct_leak, id_reuse_program, sink_stmts, solve};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use taintflow::{
    AnalysisContext, GcTrigger, NodeId, ProgramBuilder, SimpleSourceSinkProvider, SolverState,
    Stmt, TabulationSolver, TaintConfig, TaintError, TerminationReason, Value,
};

fn gc_variants() -> Vec<TaintConfig> {
    vec![
        TaintConfig {
            gc_trigger: GcTrigger::Immediate,
            ..TaintConfig::default()
        },
        TaintConfig {
            gc_trigger: GcTrigger::MethodThreshold,
            gc_method_threshold: 1,
            ..TaintConfig::default()
        },
        TaintConfig {
            gc_trigger: GcTrigger::EdgeThreshold,
            gc_edge_threshold: 5,
            ..TaintConfig::default()
        },
        TaintConfig {
            gc_trigger: GcTrigger::Never,
            ..TaintConfig::default()
        },
        TaintConfig {
            gc_trigger: GcTrigger::Immediate,
            gc_sweep_interval_ms: Some(1),
            ..TaintConfig::default()
        },
    ]
}

#[test]
fn collection_strategy_does_not_change_results() {
    let baseline = {
        let program = id_reuse_program();
        let config = TaintConfig {
            gc_trigger: GcTrigger::Never,
            ..TaintConfig::default()
        };
        sink_stmts(&solve(program.builder, program.oracle, config))
    };
    assert_eq!(baseline.len(), 2);

    for config in gc_variants() {
        let program = id_reuse_program();
        let ctx = solve(program.builder, program.oracle, config.clone());
        assert_eq!(
            sink_stmts(&ctx),
            baseline,
            "gc trigger {:?} changed the outcome",
            config.gc_trigger
        );
    }
}

#[test]
fn flow_budget_yields_a_subset_of_the_full_run() {
    let full = {
        let program = id_reuse_program();
        sink_stmts(&solve(program.builder, program.oracle, TaintConfig::default()))
    };

    let program = id_reuse_program();
    let config = TaintConfig {
        stop_after_first_k_flows: 1,
        ..TaintConfig::default()
    };
    let ctx = solve(program.builder, program.oracle, config);

    assert_eq!(ctx.results.len(), 1);
    for stmt in sink_stmts(&ctx) {
        assert!(full.contains(&stmt));
    }
}

#[test]
fn completed_solver_rejects_a_second_solve() {
    let (builder, oracle, _) = direct_leak();
    let ctx = AnalysisContext::new(
        Arc::new(builder.finalize()),
        TaintConfig::default(),
        Arc::new(oracle),
    )
    .unwrap();
    let solver = TabulationSolver::new(Arc::clone(&ctx));
    solver.solve().unwrap();
    assert_eq!(solver.state(), SolverState::Completed);
    assert!(!ctx.results.is_incomplete());

    assert!(matches!(solver.solve(), Err(TaintError::Lifecycle(_))));
}

#[test]
fn forced_termination_flags_results_incomplete() {
    let (builder, oracle, snk) = direct_leak();
    let ctx = AnalysisContext::new(
        Arc::new(builder.finalize()),
        TaintConfig::default(),
        Arc::new(oracle),
    )
    .unwrap();
    let solver = TabulationSolver::new(Arc::clone(&ctx));

    solver.force_terminate(TerminationReason::Timeout);
    assert!(solver.is_killed());
    assert_eq!(solver.termination_reason(), Some(TerminationReason::Timeout));
    assert!(ctx.results.is_incomplete());
    assert!(matches!(solver.solve(), Err(TaintError::Lifecycle(_))));

    // A reset clears the kill and lets the instance run to completion.
    solver.reset();
    assert_eq!(solver.state(), SolverState::Created);
    solver.solve().unwrap();
    assert_eq!(solver.state(), SolverState::Completed);
    assert_eq!(sink_stmts(&ctx), vec![snk]);
}

#[test]
fn solving_twice_on_fresh_contexts_is_deterministic() {
    let first = {
        let program = id_reuse_program();
        sink_stmts(&solve(program.builder, program.oracle, TaintConfig::default()))
    };
    let second = {
        let program = id_reuse_program();
        sink_stmts(&solve(program.builder, program.oracle, TaintConfig::default()))
    };
    assert_eq!(first, second);
}

/// Straight-line program: x = source(); <len> pass-through copies via `id`;
/// optionally an overwrite at `clobber`; sink(x's final holder).
fn chain_program(
    len: usize,
    clobber: Option<usize>,
) -> (ProgramBuilder, SimpleSourceSinkProvider, NodeId) {
    let mut b = ProgramBuilder::new();
    let main = b.add_proc("main");
    b.mark_entry_proc(main);
    let id_proc = b.add_proc("id");
    let p = b.add_local(id_proc, None);
    b.set_params(id_proc, vec![p]);
    b.add_stmt(id_proc, Stmt::Return(Some(Value::Local(p))));

    let mut holder = b.add_local(main, None);
    let src = b.add_stmt(main, call(Some(holder), vec![]));
    let mut prev = src;
    for step in 0..len {
        let next = b.add_local(main, None);
        let node = if clobber == Some(step) {
            // Pass a clean constant instead of the tainted chain value.
            b.add_stmt(main, call(Some(next), vec![Value::Const]))
        } else {
            b.add_stmt(main, call(Some(next), vec![Value::Local(holder)]))
        };
        b.add_call_target(node, id_proc);
        b.add_edge(prev, node);
        prev = node;
        holder = next;
    }
    let snk = b.add_stmt(main, call(None, vec![Value::Local(holder)]));
    let ret = b.add_stmt(main, Stmt::Return(None));
    b.add_edge(prev, snk);
    b.add_edge(snk, ret);

    let mut oracle = SimpleSourceSinkProvider::new();
    oracle.mark_source(src, "user-input");
    oracle.mark_sink(snk, "log");
    (b, oracle, snk)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Taint survives any number of pass-through calls, and dies at the first
    /// break in the chain, independent of where the break sits.
    #[test]
    fn chain_leaks_iff_unbroken(len in 1usize..8, clobber in proptest::option::of(0usize..8)) {
        let effective_clobber = clobber.filter(|&c| c < len);
        let (builder, oracle, snk) = chain_program(len, effective_clobber);
        let ctx = solve(builder, oracle, TaintConfig::default());
        if effective_clobber.is_some() {
            prop_assert_eq!(ctx.results.len(), 0);
        } else {
            prop_assert_eq!(sink_stmts(&ctx), vec![snk]);
        }
    }

    /// With collection off the set of scheduled path edges is a pure function
    /// of the program, not of thread interleaving. (A mid-run sweep may
    /// legitimately re-derive edges, so the count is only compared without
    /// collection.)
    #[test]
    fn propagation_count_is_stable_without_collection(threads in 1usize..4) {
        let (builder, oracle, _) = chain_program(3, None);
        let config = TaintConfig {
            num_threads: threads,
            gc_trigger: GcTrigger::Never,
            ..TaintConfig::default()
        };
        let ctx = AnalysisContext::new(
            Arc::new(builder.finalize()),
            config,
            Arc::new(oracle),
        ).unwrap();
        let solver = TabulationSolver::new(Arc::clone(&ctx));
        solver.solve().unwrap();
        let count = solver.propagation_count();

        let (builder, oracle, _) = chain_program(3, None);
        let config = TaintConfig {
            num_threads: 1,
            gc_trigger: GcTrigger::Never,
            ..TaintConfig::default()
        };
        let ctx = AnalysisContext::new(
            Arc::new(builder.finalize()),
            config,
            Arc::new(oracle),
        ).unwrap();
        let single = TabulationSolver::new(Arc::clone(&ctx));
        single.solve().unwrap();
        prop_assert_eq!(count, single.propagation_count());
    }
}
