//! Shared helpers for building small programs and running the solver.
#![allow(dead_code)]

use std::sync::Arc;

use taintflow::{
    AnalysisContext, CallExpr, LocalId, NodeId, ProcId, ProgramBuilder, SimpleSourceSinkProvider,
    Stmt, TabulationSolver, TaintConfig, TaintWrapper, Value,
};

pub fn call(result: Option<LocalId>, args: Vec<Value>) -> Stmt {
    Stmt::Call(CallExpr {
        result,
        receiver: None,
        args,
    })
}

/// Builds the context, runs a full solve, and hands the context back for
/// result inspection.
pub fn solve(
    builder: ProgramBuilder,
    oracle: SimpleSourceSinkProvider,
    config: TaintConfig,
) -> Arc<AnalysisContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = AnalysisContext::new(Arc::new(builder.finalize()), config, Arc::new(oracle))
        .expect("valid config");
    let solver = TabulationSolver::new(Arc::clone(&ctx));
    solver.solve().expect("solve succeeds");
    ctx
}

pub fn solve_with_wrapper(
    builder: ProgramBuilder,
    oracle: SimpleSourceSinkProvider,
    config: TaintConfig,
    wrapper: Arc<dyn TaintWrapper>,
) -> Arc<AnalysisContext> {
    let ctx = AnalysisContext::with_wrapper(
        Arc::new(builder.finalize()),
        config,
        Arc::new(oracle),
        wrapper,
    )
    .expect("valid config");
    let solver = TabulationSolver::new(Arc::clone(&ctx));
    solver.solve().expect("solve succeeds");
    ctx
}

pub fn sink_stmts(ctx: &AnalysisContext) -> Vec<NodeId> {
    let mut stmts: Vec<NodeId> = ctx.results.flows().iter().map(|f| f.sink_stmt).collect();
    stmts.sort();
    stmts.dedup();
    stmts
}

/// `x = source(); sink(x)`. Returns (builder, oracle, sink node).
pub fn direct_leak() -> (ProgramBuilder, SimpleSourceSinkProvider, NodeId) {
    let mut b = ProgramBuilder::new();
    let main = b.add_proc("main");
    b.mark_entry_proc(main);
    let x = b.add_local(main, None);
    let src = b.add_stmt(main, call(Some(x), vec![]));
    let snk = b.add_stmt(main, call(None, vec![Value::Local(x)]));
    let ret = b.add_stmt(main, Stmt::Return(None));
    b.add_edge(src, snk);
    b.add_edge(snk, ret);

    let mut oracle = SimpleSourceSinkProvider::new();
    oracle.mark_source(src, "user-input");
    oracle.mark_sink(snk, "log");
    (b, oracle, snk)
}

/// `s = source(); a = id(s); b = id(s); sink_a(a); sink_b(b)` — the second
/// call must be answered from the memoized summary of the first.
pub struct IdProgram {
    pub builder: ProgramBuilder,
    pub oracle: SimpleSourceSinkProvider,
    pub id_proc: ProcId,
    pub sink_a: NodeId,
    pub sink_b: NodeId,
}

pub fn id_reuse_program() -> IdProgram {
    let mut b = ProgramBuilder::new();
    let main = b.add_proc("main");
    b.mark_entry_proc(main);
    let id_proc = b.add_proc("id");
    let p = b.add_local(id_proc, None);
    b.set_params(id_proc, vec![p]);
    b.add_stmt(id_proc, Stmt::Return(Some(Value::Local(p))));

    let s = b.add_local(main, None);
    let a = b.add_local(main, None);
    let bb = b.add_local(main, None);
    let src = b.add_stmt(main, call(Some(s), vec![]));
    let call_a = b.add_stmt(main, call(Some(a), vec![Value::Local(s)]));
    let call_b = b.add_stmt(main, call(Some(bb), vec![Value::Local(s)]));
    let sink_a = b.add_stmt(main, call(None, vec![Value::Local(a)]));
    let sink_b = b.add_stmt(main, call(None, vec![Value::Local(bb)]));
    let ret = b.add_stmt(main, Stmt::Return(None));
    b.add_edge(src, call_a);
    b.add_edge(call_a, call_b);
    b.add_edge(call_b, sink_a);
    b.add_edge(sink_a, sink_b);
    b.add_edge(sink_b, ret);
    b.add_call_target(call_a, id_proc);
    b.add_call_target(call_b, id_proc);

    let mut oracle = SimpleSourceSinkProvider::new();
    oracle.mark_source(src, "user-input");
    oracle.mark_sink(sink_a, "sink-a");
    oracle.mark_sink(sink_b, "sink-b");
    IdProgram {
        builder: b,
        oracle,
        id_proc,
        sink_a,
        sink_b,
    }
}
