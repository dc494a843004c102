//! Graph rewriting passes.
//!
//! - [`Normalizer`]: method calls to functions, submodule calls inlined
//! - [`Inplacifier`]: pure calls on dead values to in-place calls
//! - [`Functionalizer`]: in-place calls back to pure dataflow
//!
//! Passes share the [`GraphPass`] interface and can be chained with a
//! [`PassPipeline`], which validates the graph after every pass.

pub mod functionalize;
pub mod inline;
pub mod inplace;
pub mod normalize;

pub use functionalize::{functionalize, Functionalizer};
pub use inline::expand_module_call;
pub use inplace::Inplacifier;
pub use normalize::{normalize, Normalizer};

use log::info;

use crate::counters::Counters;
use crate::error::Result;
use crate::module::GraphModule;

/// A rewrite over a whole [`GraphModule`].
pub trait GraphPass {
    fn name(&self) -> &str;

    /// Rewrites `module` in place, adding any diagnostics to `counters`.
    fn run(&self, module: &mut GraphModule, counters: &mut Counters) -> Result<()>;
}

/// Runs passes in order, validating the graph after each one.
#[derive(Default)]
pub struct PassPipeline<'a> {
    passes: Vec<Box<dyn GraphPass + 'a>>,
}

impl<'a> PassPipeline<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pass(mut self, pass: impl GraphPass + 'a) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass and returns the merged diagnostics.
    ///
    /// Stops at the first pass that fails or leaves an invalid graph.
    pub fn run(&self, module: &mut GraphModule) -> Result<Counters> {
        let mut counters = Counters::new();
        for pass in &self.passes {
            info!("Running pass '{}' on {} nodes", pass.name(), module.graph.len());
            pass.run(module, &mut counters)?;
            module.graph.validate()?;
        }
        Ok(counters)
    }
}
