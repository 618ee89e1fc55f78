//! Concurrent result sink.
//!
//! Flows are appended as they are discovered and deduplicated on
//! (sink statement, fact identity). The sink also enforces the
//! stop-after-first-k-flows budget: once saturated, `add_result` refuses new
//! flows, which the sink rule turns into a kill-state.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::errors::Result;
use crate::program::NodeId;
use crate::taint::fact::{FactId, FactKey};
use crate::taint::sources::FlowDescriptor;

/// One detected taint flow from a source to a sink.
#[derive(Debug, Clone)]
pub struct TaintFlow {
    /// Descriptor of the source that introduced the witness taint, when the
    /// source oracle could resolve it.
    pub source: Option<Arc<FlowDescriptor>>,
    pub source_stmt: Option<NodeId>,
    pub sink: Arc<FlowDescriptor>,
    pub sink_stmt: NodeId,
    /// The fact that reached the sink; its predecessor/neighbor links allow
    /// witness-path reconstruction.
    pub witness: FactId,
}

/// Serializable snapshot of the detected flows.
#[derive(Debug, Serialize)]
pub struct FlowReport {
    pub incomplete: bool,
    pub flows: Vec<FlowReportEntry>,
}

#[derive(Debug, Serialize)]
pub struct FlowReportEntry {
    pub source: Option<String>,
    pub source_stmt: Option<NodeId>,
    pub sink: String,
    pub sink_stmt: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResultKey {
    sink_stmt: NodeId,
    fact: FactKey,
}

#[derive(Debug)]
pub struct TaintResults {
    flows: DashMap<ResultKey, TaintFlow>,
    /// 0 = unlimited.
    cap: usize,
    /// Budget slots claimed so far; claiming is a CAS loop so the cap is
    /// exact under concurrent recording.
    reserved: AtomicUsize,
    incomplete: AtomicBool,
}

impl TaintResults {
    pub fn new(stop_after_first_k_flows: usize) -> Self {
        Self {
            flows: DashMap::new(),
            cap: stop_after_first_k_flows,
            reserved: AtomicUsize::new(0),
            incomplete: AtomicBool::new(false),
        }
    }

    /// Records a flow. Returns false only when the flow budget is exhausted
    /// and the flow was not recorded; re-recording a known flow is not an
    /// error.
    pub fn add_result(&self, flow: TaintFlow, fact_key: FactKey) -> bool {
        let key = ResultKey {
            sink_stmt: flow.sink_stmt,
            fact: fact_key,
        };
        if self.flows.contains_key(&key) {
            return true;
        }
        if self.cap > 0 {
            let mut claimed = self.reserved.load(Ordering::Relaxed);
            loop {
                if claimed >= self.cap {
                    return false;
                }
                match self.reserved.compare_exchange_weak(
                    claimed,
                    claimed + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => claimed = current,
                }
            }
            if self.flows.insert(key, flow).is_some() {
                // Lost a dedup race for the same flow; return the slot.
                self.reserved.fetch_sub(1, Ordering::Relaxed);
            }
        } else {
            self.flows.insert(key, flow);
        }
        true
    }

    /// Whether the configured flow budget has been reached.
    pub fn saturated(&self) -> bool {
        self.cap > 0 && self.reserved.load(Ordering::Relaxed) >= self.cap
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flows(&self) -> Vec<TaintFlow> {
        self.flows.iter().map(|e| e.value().clone()).collect()
    }

    /// Serializes all flows as a JSON report for downstream tooling.
    pub fn to_json(&self) -> Result<String> {
        let mut entries: Vec<FlowReportEntry> = self
            .flows
            .iter()
            .map(|e| {
                let flow = e.value();
                FlowReportEntry {
                    source: flow.source.as_ref().map(|s| s.name.clone()),
                    source_stmt: flow.source_stmt,
                    sink: flow.sink.name.clone(),
                    sink_stmt: flow.sink_stmt,
                }
            })
            .collect();
        entries.sort_by(|a, b| (a.sink_stmt, &a.sink).cmp(&(b.sink_stmt, &b.sink)));
        let report = FlowReport {
            incomplete: self.is_incomplete(),
            flows: entries,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    /// Marks the result set as possibly incomplete (forced termination).
    pub fn mark_incomplete(&self) {
        self.incomplete.store(true, Ordering::Relaxed);
    }

    pub fn is_incomplete(&self) -> bool {
        self.incomplete.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::access_path::AccessPath;

    fn flow(sink_stmt: NodeId, witness: FactId) -> (TaintFlow, FactKey) {
        let key = FactKey {
            access_path: AccessPath::empty(),
            active: true,
            activation_stmt: None,
            exception_thrown: false,
            dominator: None,
            zero: false,
        };
        (
            TaintFlow {
                source: None,
                source_stmt: None,
                sink: FlowDescriptor::new("sink"),
                sink_stmt,
                witness,
            },
            key,
        )
    }

    #[test]
    fn duplicate_flows_count_once() {
        let results = TaintResults::new(0);
        let (f, k) = flow(NodeId(1), FactId(1));
        assert!(results.add_result(f.clone(), k.clone()));
        assert!(results.add_result(f, k));
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn json_report_lists_flows_in_sink_order() {
        let results = TaintResults::new(0);
        let (f2, k2) = flow(NodeId(7), FactId(2));
        let (f1, k1) = flow(NodeId(3), FactId(1));
        results.add_result(f2, k2);
        results.add_result(f1, k1);

        let json = results.to_json().unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["incomplete"], false);
        assert_eq!(report["flows"][0]["sink_stmt"], 3);
        assert_eq!(report["flows"][1]["sink_stmt"], 7);
    }

    #[test]
    fn cap_refuses_new_flows_but_tolerates_known_ones() {
        let results = TaintResults::new(1);
        let (f1, k1) = flow(NodeId(1), FactId(1));
        let (f2, k2) = flow(NodeId(2), FactId(2));
        assert!(results.add_result(f1.clone(), k1.clone()));
        assert!(results.saturated());
        assert!(!results.add_result(f2, k2));
        assert!(results.add_result(f1, k1));
        assert_eq!(results.len(), 1);
    }
}
