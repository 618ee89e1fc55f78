//! Taint wrappers: precomputed library-method models.
//!
//! A wrapper substitutes a summary of a library procedure's data flow for the
//! analysis of its body. When a wrapper is exclusive for a call, the call's
//! callees are not entered at all.

use std::collections::HashMap;
use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, NodeId, ProcId, Value};
use crate::taint::access_path::AccessPath;
use crate::taint::fact::FactId;

pub trait TaintWrapper: Send + Sync {
    /// Taints produced by the model for `fact` flowing across `call`, or
    /// `None` when the wrapper has no model for this call.
    fn taints_for_call(
        &self,
        ctx: &AnalysisContext,
        call: NodeId,
        fact: FactId,
    ) -> Option<Vec<FactId>>;

    /// Whether the model fully covers the call, so the callee's body must not
    /// be analyzed in addition.
    fn is_exclusive(&self, ctx: &AnalysisContext, call: NodeId, fact: FactId) -> bool;
}

/// Behavior of one modeled procedure.
#[derive(Debug, Clone, Copy, Default)]
pub struct WrapperModel {
    /// Taint the call result when any argument or the receiver is tainted.
    pub taint_result_on_tainted_input: bool,
    /// Taint the receiver when any argument is tainted.
    pub taint_receiver_on_tainted_arg: bool,
    /// The model is complete; do not analyze the procedure's body.
    pub exclusive: bool,
}

/// Table-driven wrapper keyed by callee procedure.
#[derive(Debug, Default)]
pub struct MapTaintWrapper {
    models: HashMap<ProcId, WrapperModel>,
}

impl MapTaintWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(&mut self, proc: ProcId, model: WrapperModel) {
        self.models.insert(proc, model);
    }

    fn model_for_call(&self, ctx: &AnalysisContext, call: NodeId) -> Option<&WrapperModel> {
        ctx.icfg
            .callees_of(call)
            .iter()
            .find_map(|callee| self.models.get(callee))
    }
}

impl TaintWrapper for MapTaintWrapper {
    fn taints_for_call(
        &self,
        ctx: &AnalysisContext,
        call: NodeId,
        fact: FactId,
    ) -> Option<Vec<FactId>> {
        let model = self.model_for_call(ctx, call)?;
        let call_expr = ctx.icfg.stmt(call).as_call()?;
        let fact_core = ctx.arena.get(fact);

        let tainted_input = call_expr
            .args
            .iter()
            .copied()
            .chain(call_expr.receiver.map(Value::Local))
            .any(|v| fact_core.access_path.starts_with(v));
        if !tainted_input {
            return Some(Vec::new());
        }

        let mut out = Vec::new();
        if model.taint_result_on_tainted_input {
            if let Some(result) = call_expr.result {
                out.push(ctx.arena.derive(fact, |f| {
                    f.access_path = AccessPath::for_value(Value::Local(result));
                }));
            }
        }
        if model.taint_receiver_on_tainted_arg {
            if let Some(receiver) = call_expr.receiver {
                if !fact_core.access_path.starts_with(Value::Local(receiver)) {
                    out.push(ctx.arena.derive(fact, |f| {
                        f.access_path =
                            AccessPath::for_value(Value::Local(receiver)).with_taint_sub_fields(true);
                    }));
                }
            }
        }
        Some(out)
    }

    fn is_exclusive(&self, ctx: &AnalysisContext, call: NodeId, _fact: FactId) -> bool {
        self.model_for_call(ctx, call)
            .map(|m| m.exclusive)
            .unwrap_or(false)
    }
}
