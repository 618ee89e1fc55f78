//! Reference-counting garbage collection for the jump-function store.
//!
//! A procedure's path edges can be dropped once no future work can touch
//! them: its own in-flight counter is zero and so is the counter of every
//! procedure transitively callable from it (a live callee might still call
//! back or re-derive a summary). Sweeping is always semantically safe; at
//! worst a re-scheduled edge repopulates the entry. End summaries and
//! incoming records are never swept, so summary lookups stay valid.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, tick, Sender};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::GcTrigger;
use crate::program::{InterproceduralCfg, ProcId, ProgramGraph};
use crate::solver::memo::JumpFunctions;

/// Observes the solver's scheduling bookkeeping and reclaims memo entries.
pub trait GarbageCollector: Send + Sync {
    /// A path edge owned by `proc` was scheduled.
    fn notify_edge_scheduled(&self, proc: ProcId);

    /// A previously scheduled edge finished processing.
    fn notify_task_processed(&self, proc: ProcId);

    /// Trigger-dependent sweep opportunity; called after each scheduled edge.
    fn gc(&self);

    /// Permanently exempts a procedure from collection.
    fn pin(&self, proc: ProcId);

    fn gced_method_count(&self) -> usize;

    fn gced_edge_count(&self) -> usize;
}

/// Supplies, per procedure, the set of procedures transitively callable from
/// it (itself included).
pub trait ReferenceProvider: Send + Sync {
    fn reference_set(&self, proc: ProcId) -> Arc<HashSet<ProcId>>;
}

fn transitive_callees(icfg: &ProgramGraph, root: ProcId) -> HashSet<ProcId> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(proc) = stack.pop() {
        if seen.insert(proc) {
            for callee in icfg.callees_in(proc) {
                if !seen.contains(&callee) {
                    stack.push(callee);
                }
            }
        }
    }
    seen
}

/// Precomputes every reference set over the whole call graph before solving.
/// Cheap per query, context-insensitive.
pub struct EagerReferenceProvider {
    sets: Vec<Arc<HashSet<ProcId>>>,
}

impl EagerReferenceProvider {
    pub fn new(icfg: &ProgramGraph) -> Self {
        let sets = (0..icfg.proc_count())
            .into_par_iter()
            .map(|i| Arc::new(transitive_callees(icfg, ProcId(i as u32))))
            .collect();
        Self { sets }
    }
}

impl ReferenceProvider for EagerReferenceProvider {
    fn reference_set(&self, proc: ProcId) -> Arc<HashSet<ProcId>> {
        self.sets
            .get(proc.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::new(HashSet::new()))
    }
}

/// Computes reference sets on first demand and memoizes them.
pub struct LazyReferenceProvider {
    icfg: Arc<ProgramGraph>,
    cache: DashMap<ProcId, Arc<HashSet<ProcId>>>,
}

impl LazyReferenceProvider {
    pub fn new(icfg: Arc<ProgramGraph>) -> Self {
        Self {
            icfg,
            cache: DashMap::new(),
        }
    }
}

impl ReferenceProvider for LazyReferenceProvider {
    fn reference_set(&self, proc: ProcId) -> Arc<HashSet<ProcId>> {
        if let Some(cached) = self.cache.get(&proc) {
            return Arc::clone(&cached);
        }
        let set = Arc::new(transitive_callees(&self.icfg, proc));
        self.cache.insert(proc, Arc::clone(&set));
        set
    }
}

/// Several cooperating collectors (e.g. a forward and a backward pass). A
/// procedure is swept only when no peer has an active dependency on it.
#[derive(Default)]
pub struct GcPeerGroup {
    peers: Mutex<Vec<Weak<RefCountGc>>>,
}

impl GcPeerGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, peer: &Arc<RefCountGc>) {
        self.peers.lock().push(Arc::downgrade(peer));
        peer.join_group(Arc::clone(self));
    }

    fn any_peer_depends_on(&self, proc: ProcId, asking: &RefCountGc) -> bool {
        self.peers.lock().iter().any(|weak| {
            weak.upgrade()
                .is_some_and(|peer| !std::ptr::eq(peer.as_ref(), asking) && peer.depends_on(proc))
        })
    }
}

/// Handle to the dedicated background sweep thread.
pub struct SweeperHandle {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

pub struct RefCountGc {
    jump_functions: Arc<JumpFunctions>,
    provider: Box<dyn ReferenceProvider>,
    trigger: GcTrigger,
    method_threshold: usize,
    edge_threshold: usize,
    /// Scheduled-but-unprocessed edges per procedure.
    in_flight: DashMap<ProcId, usize>,
    /// Procedures that ever had an edge scheduled.
    candidates: DashSet<ProcId>,
    /// Never collected; unbalanced-return seeds land here.
    pinned: DashSet<ProcId>,
    edges_since_sweep: AtomicUsize,
    gced_methods: AtomicUsize,
    gced_edges: AtomicUsize,
    /// Set while a background sweeper owns collection; the per-edge trigger
    /// then stands down.
    threaded: AtomicBool,
    peers: Mutex<Option<Arc<GcPeerGroup>>>,
}

impl RefCountGc {
    pub fn new(
        jump_functions: Arc<JumpFunctions>,
        provider: Box<dyn ReferenceProvider>,
        trigger: GcTrigger,
        method_threshold: usize,
        edge_threshold: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            jump_functions,
            provider,
            trigger,
            method_threshold,
            edge_threshold,
            in_flight: DashMap::new(),
            candidates: DashSet::new(),
            pinned: DashSet::new(),
            edges_since_sweep: AtomicUsize::new(0),
            gced_methods: AtomicUsize::new(0),
            gced_edges: AtomicUsize::new(0),
            threaded: AtomicBool::new(false),
            peers: Mutex::new(None),
        })
    }

    fn join_group(&self, group: Arc<GcPeerGroup>) {
        *self.peers.lock() = Some(group);
    }

    fn counter(&self, proc: ProcId) -> usize {
        self.in_flight.get(&proc).map(|c| *c).unwrap_or(0)
    }

    /// Whether this collector still has in-flight work that could reach the
    /// given procedure.
    fn depends_on(&self, proc: ProcId) -> bool {
        if self.counter(proc) > 0 {
            return true;
        }
        self.provider
            .reference_set(proc)
            .iter()
            .any(|p| self.counter(*p) > 0)
    }

    fn sweep(&self) {
        let candidates: Vec<ProcId> = self.candidates.iter().map(|p| *p).collect();
        for proc in candidates {
            if self.pinned.contains(&proc) {
                continue;
            }
            if self.depends_on(proc) {
                continue;
            }
            if let Some(group) = self.peers.lock().as_ref() {
                if group.any_peer_depends_on(proc, self) {
                    continue;
                }
            }
            self.candidates.remove(&proc);
            let removed = self.jump_functions.remove_proc(proc);
            if removed > 0 {
                self.gced_methods.fetch_add(1, Ordering::Relaxed);
                self.gced_edges.fetch_add(removed, Ordering::Relaxed);
                log::debug!("gc: swept {removed} path edges of procedure {}", proc.0);
            }
        }
    }

    /// Starts the dedicated background sweep loop. Per-edge triggering is
    /// suspended while the handle lives.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        self.threaded.store(true, Ordering::Release);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let gc = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("taintflow-gc".to_string())
            .spawn(move || {
                loop {
                    crossbeam::channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => gc.sweep(),
                    }
                }
                gc.threaded.store(false, Ordering::Release);
            })
            .unwrap_or_else(|e| panic!("failed to spawn gc sweeper: {e}"));
        SweeperHandle {
            stop: stop_tx,
            thread: Some(thread),
        }
    }
}

impl GarbageCollector for RefCountGc {
    fn notify_edge_scheduled(&self, proc: ProcId) {
        *self.in_flight.entry(proc).or_insert(0) += 1;
        self.candidates.insert(proc);
        self.edges_since_sweep.fetch_add(1, Ordering::Relaxed);
    }

    fn notify_task_processed(&self, proc: ProcId) {
        if let Some(mut counter) = self.in_flight.get_mut(&proc) {
            *counter = counter.saturating_sub(1);
        }
    }

    fn gc(&self) {
        if self.threaded.load(Ordering::Acquire) {
            return;
        }
        match self.trigger {
            GcTrigger::Immediate => self.sweep(),
            GcTrigger::MethodThreshold => {
                if self.candidates.len() > self.method_threshold {
                    self.sweep();
                }
            }
            GcTrigger::EdgeThreshold => {
                if self.edges_since_sweep.load(Ordering::Relaxed) > self.edge_threshold {
                    self.edges_since_sweep.store(0, Ordering::Relaxed);
                    self.sweep();
                }
            }
            GcTrigger::Never => {}
        }
    }

    fn pin(&self, proc: ProcId) {
        self.pinned.insert(proc);
    }

    fn gced_method_count(&self) -> usize {
        self.gced_methods.load(Ordering::Relaxed)
    }

    fn gced_edge_count(&self) -> usize {
        self.gced_edges.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{ProgramBuilder, Stmt};
    use crate::solver::path_edge::PathEdge;
    use crate::taint::FactArena;

    fn two_proc_graph() -> Arc<ProgramGraph> {
        let mut builder = ProgramBuilder::new();
        let caller = builder.add_proc("caller");
        let callee = builder.add_proc("callee");
        let call = builder.add_stmt(
            caller,
            Stmt::Call(crate::program::CallExpr {
                result: None,
                receiver: None,
                args: vec![],
            }),
        );
        let ret = builder.add_stmt(caller, Stmt::Return(None));
        builder.add_edge(call, ret);
        builder.add_call_target(call, callee);
        builder.add_stmt(callee, Stmt::Return(None));
        Arc::new(builder.finalize())
    }

    fn gc_with(trigger: GcTrigger, icfg: &Arc<ProgramGraph>) -> (Arc<RefCountGc>, Arc<JumpFunctions>) {
        let jumps = Arc::new(JumpFunctions::new());
        let provider = Box::new(EagerReferenceProvider::new(icfg));
        let gc = RefCountGc::new(Arc::clone(&jumps), provider, trigger, 0, 0);
        (gc, jumps)
    }

    fn store_edge(arena: &FactArena, jumps: &JumpFunctions, proc: ProcId) {
        let edge = PathEdge::new(arena.zero(), crate::program::NodeId(0), arena.zero());
        jumps.insert_if_absent(proc, edge.key(arena), edge);
    }

    #[test]
    fn caller_is_not_swept_while_callee_is_in_flight() {
        let icfg = two_proc_graph();
        let (gc, jumps) = gc_with(GcTrigger::Immediate, &icfg);
        let arena = FactArena::new();
        let caller = ProcId(0);
        let callee = ProcId(1);

        store_edge(&arena, &jumps, caller);
        gc.notify_edge_scheduled(caller);
        gc.notify_task_processed(caller);
        gc.notify_edge_scheduled(callee);

        // Callee still in flight; it might call back into the caller's
        // summary machinery.
        gc.gc();
        assert_eq!(jumps.proc_edge_count(caller), 1);

        gc.notify_task_processed(callee);
        gc.gc();
        assert_eq!(jumps.proc_edge_count(caller), 0);
        assert_eq!(gc.gced_method_count(), 1);
        assert_eq!(gc.gced_edge_count(), 1);
    }

    #[test]
    fn pinned_procedures_survive_sweeps() {
        let icfg = two_proc_graph();
        let (gc, jumps) = gc_with(GcTrigger::Immediate, &icfg);
        let arena = FactArena::new();
        let caller = ProcId(0);

        store_edge(&arena, &jumps, caller);
        gc.notify_edge_scheduled(caller);
        gc.notify_task_processed(caller);
        gc.pin(caller);
        gc.gc();
        assert_eq!(jumps.proc_edge_count(caller), 1);
    }

    #[test]
    fn never_trigger_never_sweeps() {
        let icfg = two_proc_graph();
        let (gc, jumps) = gc_with(GcTrigger::Never, &icfg);
        let arena = FactArena::new();

        store_edge(&arena, &jumps, ProcId(0));
        gc.notify_edge_scheduled(ProcId(0));
        gc.notify_task_processed(ProcId(0));
        gc.gc();
        assert_eq!(jumps.proc_edge_count(ProcId(0)), 1);
        assert_eq!(gc.gced_method_count(), 0);
    }

    #[test]
    fn peer_with_active_dependency_blocks_the_sweep() {
        let icfg = two_proc_graph();
        let (gc_a, jumps_a) = gc_with(GcTrigger::Immediate, &icfg);
        let (gc_b, _) = gc_with(GcTrigger::Immediate, &icfg);
        let group = GcPeerGroup::new();
        group.register(&gc_a);
        group.register(&gc_b);
        let arena = FactArena::new();
        let caller = ProcId(0);

        store_edge(&arena, &jumps_a, caller);
        gc_a.notify_edge_scheduled(caller);
        gc_a.notify_task_processed(caller);
        // The peer is still working inside the caller.
        gc_b.notify_edge_scheduled(caller);

        gc_a.gc();
        assert_eq!(jumps_a.proc_edge_count(caller), 1);

        gc_b.notify_task_processed(caller);
        gc_a.gc();
        assert_eq!(jumps_a.proc_edge_count(caller), 0);
    }

    #[test]
    fn lazy_and_eager_providers_agree() {
        let icfg = two_proc_graph();
        let eager = EagerReferenceProvider::new(&icfg);
        let lazy = LazyReferenceProvider::new(Arc::clone(&icfg));
        for i in 0..icfg.proc_count() {
            let proc = ProcId(i as u32);
            assert_eq!(*eager.reference_set(proc), *lazy.reference_set(proc));
        }
    }
}
