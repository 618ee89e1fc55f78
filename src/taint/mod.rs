//! Taint data model: access paths, facts, sources/sinks, wrappers, results.

mod access_path;
mod fact;
mod results;
mod sources;
mod wrapper;

pub use access_path::{AccessPath, ArrayTaintType};
pub use fact::{Fact, FactArena, FactId, FactKey};
pub use results::{FlowReport, FlowReportEntry, TaintFlow, TaintResults};
pub use sources::{
    FlowDescriptor, SimpleSourceSinkProvider, SinkInfo, SourceInfo, SourceSinkOracle,
};
pub use wrapper::{MapTaintWrapper, TaintWrapper, WrapperModel};
