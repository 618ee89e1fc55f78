//! Strong-update rule: a provable exact overwrite of a tainted location,
//! with no residual use of the old value, removes the stale fact.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, LValue, NodeId, Stmt, Value};
use crate::rules::{PropagationRule, RuleOutput};
use crate::taint::FactId;

pub struct StrongUpdateRule {
    ctx: Arc<AnalysisContext>,
}

impl StrongUpdateRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }
}

impl PropagationRule for StrongUpdateRule {
    fn name(&self) -> &'static str {
        "strong-update"
    }

    fn normal_flow(&self, _d1: FactId, d2: FactId, stmt: NodeId, _dest: NodeId) -> RuleOutput {
        if self.ctx.arena.is_zero(d2) {
            return RuleOutput::none();
        }
        let fact = self.ctx.arena.get(d2);
        let ap = &fact.access_path;
        if ap.is_empty() || fact.exception_thrown {
            return RuleOutput::none();
        }
        let (lhs, rhs) = match self.ctx.icfg.stmt(stmt) {
            Stmt::Assign { lhs, rhs } => (lhs, rhs),
            _ => return RuleOutput::none(),
        };

        // The overwrite is only strong when the old value does not feed the
        // new one.
        let residual_use = |v: Value| -> bool {
            let stmt = Stmt::Assign {
                lhs: *lhs,
                rhs: *rhs,
            };
            stmt.used_values().contains(&v)
        };

        let killed = match lhs {
            // Overwriting a local invalidates every path rooted at it.
            LValue::Local(l) => {
                ap.starts_with(Value::Local(*l)) && !residual_use(Value::Local(*l))
            }
            LValue::StaticField(f) => {
                ap.starts_with(Value::StaticField(*f))
                    && ap.fields().is_empty()
                    && !ap.taint_sub_fields()
                    && !residual_use(Value::StaticField(*f))
            }
            // Overwriting base.field invalidates paths that go through that
            // field, but not a whole-object taint on the base.
            LValue::LocalField { base, field } => {
                ap.starts_with(Value::Local(*base))
                    && ap.fields().first() == Some(field)
                    && !residual_use(Value::Local(*base))
            }
            // Element writes are always weak.
            LValue::ArrayElem { .. } => false,
        };

        if killed {
            RuleOutput::kill_source()
        } else {
            RuleOutput::none()
        }
    }
}
