//! Array rule: models reads, writes, length queries, and allocation with the
//! {None, Contents, Length, ContentsAndLength} taint lattice.

use std::sync::Arc;

use crate::context::AnalysisContext;
use crate::program::{InterproceduralCfg, LValue, NodeId, Rvalue, Stmt, Value};
use crate::rules::{write_access_path, PropagationRule, RuleOutput};
use crate::taint::{AccessPath, ArrayTaintType, FactId};

pub struct ArrayRule {
    ctx: Arc<AnalysisContext>,
}

impl ArrayRule {
    pub fn new(ctx: Arc<AnalysisContext>) -> Self {
        Self { ctx }
    }

    /// Whether the assignment's right-hand side reads the tainted location
    /// directly (element writes are weak, so field structure is dropped).
    fn rhs_reads(&self, ap: &AccessPath, rhs: &Rvalue) -> bool {
        match rhs {
            Rvalue::Use(v) | Rvalue::Cast { value: v, .. } => ap.starts_with(*v),
            Rvalue::Binary { left, right } => ap.starts_with(*left) || ap.starts_with(*right),
            Rvalue::FieldRead { base, field } => ap.covers_field(Value::Local(*base), *field),
            Rvalue::ArrayRead { array } => {
                ap.starts_with(Value::Local(*array)) && ap.array_taint().covers_contents()
            }
            Rvalue::ArrayNew { .. } | Rvalue::ArrayLength { .. } => false,
        }
    }
}

impl PropagationRule for ArrayRule {
    fn name(&self) -> &'static str {
        "array"
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
            Stmt::Assign { lhs, rhs } => (*lhs, *rhs),
            _ => return RuleOutput::none(),
        };
        let max_len = self.ctx.config.max_access_path_length;

        // Writes into an element: the whole array's contents become tainted.
        // Always weak; the old contents may still be reachable.
        if let LValue::ArrayElem { array } = lhs {
            if self.rhs_reads(ap, &rhs) {
                let new_path = AccessPath::for_value(Value::Local(array))
                    .with_array_taint(ArrayTaintType::Contents);
                return RuleOutput::with_facts(vec![self.ctx.arena.derive(d2, |f| {
                    f.access_path = new_path;
                })]);
            }
            return RuleOutput::none();
        }

        let gen_path = match rhs {
            Rvalue::ArrayRead { array } => {
                if ap.starts_with(Value::Local(array)) && ap.array_taint().covers_contents() {
                    write_access_path(lhs, &[], false, ArrayTaintType::None, max_len)
                } else {
                    None
                }
            }
            Rvalue::ArrayLength { array } => {
                if ap.starts_with(Value::Local(array)) && ap.array_taint().covers_length() {
                    write_access_path(lhs, &[], false, ArrayTaintType::None, max_len)
                } else {
                    None
                }
            }
            Rvalue::ArrayNew { size } => {
                // A tainted size leaks through the new array's length only.
                if ap.starts_with(size) {
                    write_access_path(lhs, &[], false, ArrayTaintType::Length, max_len)
                } else {
                    None
                }
            }
            _ => None,
        };

        match gen_path {
            Some(path) => RuleOutput::with_facts(vec![self.ctx.arena.derive(d2, |f| {
                f.access_path = path;
            })]),
            None => RuleOutput::none(),
        }
    }
}
