//! Analysis configuration.
//!
//! All options recognized by the solver, the rule engine, and the garbage
//! collector, with serde defaults so partial TOML files work. Invalid
//! combinations are rejected by [`TaintConfig::validate`] before a solve
//! starts; nothing is checked lazily mid-run.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TaintError};

/// How control-flow-dependent (implicit) taints are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ImplicitFlowMode {
    /// No implicit flows.
    #[default]
    None,
    /// Track control taints and report sinks reached inside their scope, but
    /// do not convert them into data taints.
    ControlFlowOnly,
    /// Additionally taint values written under a tainted branch condition.
    All,
}

impl ImplicitFlowMode {
    pub fn tracks_control_flow(self) -> bool {
        !matches!(self, ImplicitFlowMode::None)
    }
}

/// When predecessor links are rewired to skip callees at summary joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PredecessorShorteningMode {
    /// Keep exact witness paths.
    #[default]
    Never,
    /// Always skip the callee in the predecessor chain.
    Always,
    /// Skip only when caller- and callee-side facts are structurally equal.
    IfEqual,
}

/// When the garbage collector sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GcTrigger {
    /// Attempt a sweep after every scheduled edge.
    #[default]
    Immediate,
    /// Sweep once more than `gc_method_threshold` procedures are candidates.
    MethodThreshold,
    /// Sweep once more than `gc_edge_threshold` edges have been scheduled.
    EdgeThreshold,
    /// Never sweep. Results must be identical to any other trigger.
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TaintConfig {
    /// Track array contents/length taints.
    pub enable_array_tracking: bool,

    /// Track taints across throw/catch.
    pub enable_exception_tracking: bool,

    /// Track taints stored in static fields across procedure boundaries.
    pub enable_static_field_tracking: bool,

    /// Kill facts on provably impossible casts.
    pub enable_type_checking: bool,

    pub implicit_flow_mode: ImplicitFlowMode,

    /// Stop the analysis once this many flows have been found. 0 = unlimited.
    pub stop_after_first_k_flows: usize,

    /// Calls with more callees than this are not entered at all.
    pub max_callees_per_call_site: usize,

    /// Maximum predecessor-chain length of a fact; -1 = unlimited.
    pub max_abstraction_path_length: i64,

    /// Maximum field-chain length of an access path; longer chains are
    /// truncated with sub-field tainting.
    pub max_access_path_length: usize,

    pub gc_trigger: GcTrigger,

    pub gc_method_threshold: usize,

    pub gc_edge_threshold: usize,

    /// Interval of the dedicated background sweep thread in milliseconds.
    /// `None` keeps collection on the worker threads.
    pub gc_sweep_interval_ms: Option<u64>,

    pub predecessor_shortening_mode: PredecessorShorteningMode,

    /// Maximum number of neighbor facts recorded at one join point;
    /// -1 = unbounded. Call-site joins are always recorded.
    pub max_join_point_abstractions: i64,

    /// Propagate facts that reach a procedure exit without a matching call
    /// context into all known callers.
    pub follow_returns_past_seeds: bool,

    /// Worker threads for the solver. 0 = number of logical CPUs.
    pub num_threads: usize,
}

impl Default for TaintConfig {
    fn default() -> Self {
        Self {
            enable_array_tracking: true,
            enable_exception_tracking: true,
            enable_static_field_tracking: true,
            enable_type_checking: true,
            implicit_flow_mode: ImplicitFlowMode::default(),
            stop_after_first_k_flows: 0,
            max_callees_per_call_site: 75,
            max_abstraction_path_length: 100,
            max_access_path_length: 5,
            gc_trigger: GcTrigger::default(),
            gc_method_threshold: 0,
            gc_edge_threshold: 0,
            gc_sweep_interval_ms: None,
            predecessor_shortening_mode: PredecessorShorteningMode::default(),
            max_join_point_abstractions: -1,
            follow_returns_past_seeds: true,
            num_threads: 0,
        }
    }
}

impl TaintConfig {
    /// Loads a configuration from a TOML file. Missing keys fall back to
    /// defaults; unknown keys are rejected by serde.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| TaintError::ConfigIo {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: TaintConfig =
            toml::from_str(&content).map_err(|e| TaintError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        log::debug!("loaded taint config from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    /// Checks option combinations. Called by the analysis context before any
    /// solver is constructed.
    pub fn validate(&self) -> Result<()> {
        if self.max_callees_per_call_site == 0 {
            return Err(TaintError::Config(
                "max-callees-per-call-site must be at least 1".into(),
            ));
        }
        if self.max_access_path_length == 0 {
            return Err(TaintError::Config(
                "max-access-path-length must be at least 1".into(),
            ));
        }
        if self.gc_trigger == GcTrigger::MethodThreshold && self.gc_method_threshold == 0 {
            return Err(TaintError::Config(
                "gc-trigger = method-threshold requires a nonzero gc-method-threshold".into(),
            ));
        }
        if self.gc_trigger == GcTrigger::EdgeThreshold && self.gc_edge_threshold == 0 {
            return Err(TaintError::Config(
                "gc-trigger = edge-threshold requires a nonzero gc-edge-threshold".into(),
            ));
        }
        if self.gc_sweep_interval_ms == Some(0) {
            return Err(TaintError::Config(
                "gc-sweep-interval-ms must be nonzero when set".into(),
            ));
        }
        Ok(())
    }

    /// Effective worker-thread count.
    pub fn effective_num_threads(&self) -> usize {
        if self.num_threads == 0 {
            num_cpus::get()
        } else {
            self.num_threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        assert!(TaintConfig::default().validate().is_ok());
    }

    #[test]
    fn threshold_triggers_require_thresholds() {
        let config = TaintConfig {
            gc_trigger: GcTrigger::MethodThreshold,
            ..TaintConfig::default()
        };
        assert!(config.validate().is_err());

        let config = TaintConfig {
            gc_trigger: GcTrigger::EdgeThreshold,
            gc_edge_threshold: 500,
            ..TaintConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_toml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "implicit-flow-mode = \"all\"\nstop-after-first-k-flows = 3"
        )
        .unwrap();
        let config = TaintConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.implicit_flow_mode, ImplicitFlowMode::All);
        assert_eq!(config.stop_after_first_k_flows, 3);
        assert!(config.enable_array_tracking);
    }

    #[test]
    fn rejects_unparseable_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gc-trigger = \"sometimes\"").unwrap();
        assert!(matches!(
            TaintConfig::from_toml_file(file.path()),
            Err(TaintError::ConfigParse { .. })
        ));
    }
}
