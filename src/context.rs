//! Shared analysis context.
//!
//! One explicit, read-only handle carrying everything the solver, the rules,
//! and the garbage collector share: the program graph, the configuration, the
//! fact arena, the source/sink oracle, the optional taint wrapper, and the
//! result sink. Passed into every component's constructor; there is no global
//! state, so forward and backward solver instances can coexist.

use std::sync::Arc;

use crate::config::TaintConfig;
use crate::errors::Result;
use crate::program::ProgramGraph;
use crate::taint::{FactArena, FactId, SourceSinkOracle, TaintResults, TaintWrapper};

pub struct AnalysisContext {
    pub icfg: Arc<ProgramGraph>,
    pub config: TaintConfig,
    pub arena: FactArena,
    pub oracle: Arc<dyn SourceSinkOracle>,
    pub wrapper: Option<Arc<dyn TaintWrapper>>,
    pub results: TaintResults,
}

impl AnalysisContext {
    /// Validates the configuration and builds the context. Configuration
    /// errors are fatal and reported before any solver exists.
    pub fn new(
        icfg: Arc<ProgramGraph>,
        config: TaintConfig,
        oracle: Arc<dyn SourceSinkOracle>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let results = TaintResults::new(config.stop_after_first_k_flows);
        Ok(Arc::new(Self {
            icfg,
            config,
            arena: FactArena::new(),
            oracle,
            wrapper: None,
            results,
        }))
    }

    /// As [`Self::new`], with a taint wrapper registered.
    pub fn with_wrapper(
        icfg: Arc<ProgramGraph>,
        config: TaintConfig,
        oracle: Arc<dyn SourceSinkOracle>,
        wrapper: Arc<dyn TaintWrapper>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let results = TaintResults::new(config.stop_after_first_k_flows);
        Ok(Arc::new(Self {
            icfg,
            config,
            arena: FactArena::new(),
            oracle,
            wrapper: Some(wrapper),
            results,
        }))
    }

    pub fn zero(&self) -> FactId {
        self.arena.zero()
    }
}
