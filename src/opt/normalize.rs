//! Canonicalizes method calls and flattens submodule calls.

use log::{debug, info};
use rustc_hash::FxHashSet;

use super::inline::expand_module_call;
use super::GraphPass;
use crate::config::RewriteConfig;
use crate::counters::Counters;
use crate::error::Result;
use crate::ir::{Argument, FunctionId, Graph, Node, NodeId, Op};
use crate::module::GraphModule;

/// Rewrites `x.foo(...)` into `foo(x, ...)`, replaces deprecated function
/// aliases, and inlines every submodule call whose class is not opaque.
///
/// Inlined nodes are themselves normalized, so the pass is idempotent. Any
/// inlining failure aborts the pass without touching the module.
pub struct Normalizer<'a> {
    config: &'a RewriteConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a RewriteConfig) -> Self {
        Self { config }
    }

    /// On error `module` is left exactly as it was.
    pub fn normalize(&self, module: &mut GraphModule) -> Result<()> {
        info!("Normalizing graph with {} nodes", module.graph.len());
        let mut graph = module.graph.clone();
        let mut cursor = 0;
        while let Some(id) = graph.node_at(cursor) {
            let node = graph.node(id)?.clone();
            match &node.op {
                Op::CallMethod(method) => {
                    if let Some(function) = self.config.normalize_methods.get(method) {
                        let function = self.canonical(function);
                        debug!("{}: method '{method}' -> {function}", node.name);
                        self.replace_with_function(&mut graph, id, &node, function)?;
                    }
                }
                Op::CallFunction(target) => {
                    let canonical = self.canonical(target);
                    if &canonical != target {
                        debug!("{}: {target} -> {canonical}", node.name);
                        self.replace_with_function(&mut graph, id, &node, canonical)?;
                    }
                }
                Op::CallModule(target) => {
                    let submodule = module.get_submodule(target)?.clone();
                    if self
                        .config
                        .dont_expand_modules
                        .contains(submodule.class_name())
                    {
                        debug!("{}: keeping {} opaque", node.name, submodule.class_name());
                    } else {
                        debug!("{}: inlining {}", node.name, submodule.class_name());
                        let prefix = format!("{target}.");
                        let value = graph.inserting_before(id, |graph| {
                            expand_module_call(&prefix, graph, &submodule, &node.args, &node.kwargs)
                        })?;
                        swap_node(&mut graph, id, value)?;
                        // revisit the spliced nodes, which now start at `cursor`
                        continue;
                    }
                }
                Op::Placeholder | Op::GetAttr(_) | Op::Output => {}
            }
            cursor += 1;
        }
        info!("Normalization done: {} nodes", graph.len());
        module.graph = graph;
        Ok(())
    }

    /// Follows the replacement table to its end, stopping on a cycle.
    fn canonical(&self, function: &FunctionId) -> FunctionId {
        let mut current = function.clone();
        let mut seen = FxHashSet::default();
        while let Some(next) = self.config.function_replacements.get(&current) {
            if !seen.insert(current.clone()) {
                break;
            }
            current = next.clone();
        }
        current
    }

    fn replace_with_function(
        &self,
        graph: &mut Graph,
        old: NodeId,
        node: &Node,
        function: FunctionId,
    ) -> Result<()> {
        let new = graph.inserting_before(old, |graph| {
            graph.call_function(function, node.args.clone(), node.kwargs.clone())
        });
        graph.node_mut(new)?.meta = node.meta.clone();
        swap_node(graph, old, Argument::Node(new))
    }
}

/// Redirects every use of `old` to `new`, then erases `old`.
fn swap_node(graph: &mut Graph, old: NodeId, new: Argument) -> Result<()> {
    graph.replace_all_uses_with(old, &new);
    graph.erase_node(old)
}

impl GraphPass for Normalizer<'_> {
    fn name(&self) -> &str {
        "normalize"
    }

    fn run(&self, module: &mut GraphModule, _counters: &mut Counters) -> Result<()> {
        self.normalize(module)
    }
}

/// Runs the [`Normalizer`] with `config`.
pub fn normalize(module: &mut GraphModule, config: &RewriteConfig) -> Result<()> {
    Normalizer::new(config).normalize(module)
}
