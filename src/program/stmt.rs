//! Statement-level intermediate representation.
//!
//! The analyzer does not parse source code itself; embedders lower their
//! program into this small IR (see [`crate::program::ProgramBuilder`]) and the
//! solver only ever inspects it through the [`crate::program::InterproceduralCfg`]
//! trait. One statement corresponds to one CFG node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a procedure (function/method) in the program model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcId(pub u32);

/// Identifier of a CFG node. Node ids are global across procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Identifier of a local variable, scoped to its declaring procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalId(pub u32);

/// Identifier of a named field (instance or static).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub u32);

/// Identifier of a nominal type in the program's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A simple value that can appear as an operand.
///
/// Constants are represented but can never carry taint; the access-path
/// machinery rejects them as bases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Local(LocalId),
    StaticField(FieldId),
    Const,
}

impl Value {
    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Value::Local(l) => Some(*l),
            _ => None,
        }
    }

    /// Whether this value can be the base of a taint. Constants cannot.
    pub fn is_taintable(&self) -> bool {
        !matches!(self, Value::Const)
    }
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LValue {
    Local(LocalId),
    /// Write into a field of a local base: `base.field = ...`.
    LocalField { base: LocalId, field: FieldId },
    StaticField(FieldId),
    /// Write into some element of an array held in a local: `arr[i] = ...`.
    ArrayElem { array: LocalId },
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rvalue {
    /// Plain copy: `lhs = v`.
    Use(Value),
    /// Field read: `lhs = base.field`.
    FieldRead { base: LocalId, field: FieldId },
    /// Checked cast: `lhs = (target) v`.
    Cast { value: Value, target: TypeId },
    /// Binary combination; taints from either operand reach the result.
    Binary { left: Value, right: Value },
    /// Array element read: `lhs = arr[i]`.
    ArrayRead { array: LocalId },
    /// Array allocation: `lhs = new T[size]`.
    ArrayNew { size: Value },
    /// Array length query: `lhs = arr.length`.
    ArrayLength { array: LocalId },
}

/// A call expression. Callee resolution lives in the program graph so a call
/// site can have several targets (virtual dispatch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallExpr {
    /// Local receiving the return value, if any.
    pub result: Option<LocalId>,
    /// Receiver object for instance calls.
    pub receiver: Option<LocalId>,
    pub args: Vec<Value>,
}

/// One statement of the IR, one per CFG node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stmt {
    /// No-op; used for entry/exit markers and join points.
    Nop,
    Assign { lhs: LValue, rhs: Rvalue },
    Call(CallExpr),
    Return(Option<Value>),
    /// Conditional branch on a comparison of the two operands.
    If { left: Value, right: Value },
    Throw(Value),
    /// Exception handler binding the caught value to a local.
    Catch(LocalId),
}

impl Stmt {
    pub fn is_call(&self) -> bool {
        matches!(self, Stmt::Call(_))
    }

    pub fn as_call(&self) -> Option<&CallExpr> {
        match self {
            Stmt::Call(c) => Some(c),
            _ => None,
        }
    }

    /// Values read by this statement. Used by the sink rule to decide whether
    /// a tainted access path is referenced at all.
    pub fn used_values(&self) -> Vec<Value> {
        match self {
            Stmt::Nop | Stmt::Catch(_) => Vec::new(),
            Stmt::Assign { rhs, .. } => match rhs {
                Rvalue::Use(v) => vec![*v],
                Rvalue::FieldRead { base, .. } => vec![Value::Local(*base)],
                Rvalue::Cast { value, .. } => vec![*value],
                Rvalue::Binary { left, right } => vec![*left, *right],
                Rvalue::ArrayRead { array } | Rvalue::ArrayLength { array } => {
                    vec![Value::Local(*array)]
                }
                Rvalue::ArrayNew { size } => vec![*size],
            },
            Stmt::Call(call) => {
                let mut vals: Vec<Value> = call.args.clone();
                if let Some(r) = call.receiver {
                    vals.push(Value::Local(r));
                }
                vals
            }
            Stmt::Return(v) => v.iter().copied().collect(),
            Stmt::If { left, right } => vec![*left, *right],
            Stmt::Throw(v) => vec![*v],
        }
    }
}

/// Nominal type table with declared subtype edges.
///
/// The typing rule only needs a reflexive-transitive subtype check, so the
/// table stores direct edges and answers queries by upward walk.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    names: Vec<String>,
    /// Direct supertypes, indexed by `TypeId`.
    supers: Vec<Vec<TypeId>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_type(&mut self, name: impl Into<String>) -> TypeId {
        let id = TypeId(self.names.len() as u32);
        self.names.push(name.into());
        self.supers.push(Vec::new());
        id
    }

    pub fn add_subtype(&mut self, sub: TypeId, sup: TypeId) {
        self.supers[sub.0 as usize].push(sup);
    }

    pub fn name(&self, t: TypeId) -> &str {
        &self.names[t.0 as usize]
    }

    /// Reflexive-transitive subtype check.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        let mut stack = vec![sub];
        let mut seen = vec![false; self.names.len()];
        while let Some(t) = stack.pop() {
            if t == sup {
                return true;
            }
            let idx = t.0 as usize;
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            stack.extend(self.supers[idx].iter().copied());
        }
        false
    }

    /// Whether a value of declared type `a` could legally be cast to `b`.
    /// Casts along either direction of the hierarchy may succeed at runtime;
    /// casts between unrelated types cannot.
    pub fn cast_may_succeed(&self, a: TypeId, b: TypeId) -> bool {
        self.is_subtype(a, b) || self.is_subtype(b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_is_reflexive_and_transitive() {
        let mut table = TypeTable::new();
        let object = table.add_type("Object");
        let list = table.add_type("List");
        let array_list = table.add_type("ArrayList");
        table.add_subtype(list, object);
        table.add_subtype(array_list, list);

        assert!(table.is_subtype(list, list));
        assert!(table.is_subtype(array_list, object));
        assert!(!table.is_subtype(object, array_list));
    }

    #[test]
    fn unrelated_types_cannot_cast() {
        let mut table = TypeTable::new();
        let object = table.add_type("Object");
        let string = table.add_type("String");
        let file = table.add_type("File");
        table.add_subtype(string, object);
        table.add_subtype(file, object);

        assert!(table.cast_may_succeed(string, object));
        assert!(table.cast_may_succeed(object, file));
        assert!(!table.cast_may_succeed(string, file));
    }

    #[test]
    fn used_values_covers_call_operands() {
        let stmt = Stmt::Call(CallExpr {
            result: Some(LocalId(0)),
            receiver: Some(LocalId(1)),
            args: vec![Value::Local(LocalId(2)), Value::Const],
        });
        let used = stmt.used_values();
        assert!(used.contains(&Value::Local(LocalId(1))));
        assert!(used.contains(&Value::Local(LocalId(2))));
    }
}
