//! Harp Rewrite: graph rewriting for traced tensor programs
//!
//! A traced program is a [`Graph`](ir::Graph) of placeholders, attribute
//! reads, calls and one output, plus the submodules it calls
//! ([`GraphModule`](module::GraphModule)). Three passes rewrite it:
//!
//! - **normalize**: `x.sum()` becomes `torch.sum(x)`, submodule calls are
//!   inlined unless their class is opaque
//! - **inplace**: calls whose argument is never read again write into that
//!   argument, through `inplace=True` or `out=`
//! - **functionalize**: the inverse; in-place calls become pure calls and
//!   later readers of the mutated value are redirected to the new result
//!
//! Every table the passes consult lives in [`RewriteConfig`](config::RewriteConfig).
//! Diagnostics are tallied in [`Counters`](counters::Counters).
//!
//! # Example
//!
//! ```
//! use harp_rewrite::prelude::*;
//!
//! let mut graph = Graph::new();
//! let x = graph.placeholder("x");
//! let s = graph.call_method("sum", vec![x.into()], kwargs!());
//! graph.output(s.into());
//!
//! let mut module = GraphModule::new(graph);
//! normalize(&mut module, &RewriteConfig::default()).unwrap();
//! assert!(module.graph.to_string().contains("torch.sum"));
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod config;
pub mod counters;
pub mod error;
pub mod ir;
pub mod module;
pub mod opt;
pub mod resolver;
pub mod signature;
pub mod trace;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use ir::{Argument, FunctionId, Graph, Literal, Node, NodeId, NodeMeta, Op};
pub use module::{GraphModule, Module};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    // Graph IR
    pub use crate::ir::{
        Argument, FunctionId, Graph, Kwargs, Literal, Node, NodeId, NodeMeta, Op, ValueKind,
    };
    pub use crate::kwargs;

    // Modules and tracing
    pub use crate::module::{GraphModule, Module, ModuleBody};
    pub use crate::trace::{trace, InliningTracer, Tracer};

    // Passes
    pub use crate::config::RewriteConfig;
    pub use crate::counters::{Category, Counters};
    pub use crate::opt::{
        functionalize, normalize, Functionalizer, GraphPass, Inplacifier, Normalizer,
        PassPipeline,
    };
    pub use crate::signature::{SignatureDb, StaticSignatures};

    pub use crate::error::{Error, Result};
}
