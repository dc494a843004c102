//! Removes in-place mutation by re-emitting the graph as pure dataflow.
//!
//! The source graph is interpreted in order into a fresh graph. `env` maps
//! every source node to its current value in the new graph. When a mutating
//! call is replaced by its pure form, the mutated source nodes are rebound to
//! the new result, so later readers of the old reference observe the
//! post-mutation value.

use log::{debug, info, warn};
use rustc_hash::FxHashMap;

use super::GraphPass;
use crate::config::{RewriteConfig, INPLACE_KWARG, OUT_KWARG};
use crate::counters::{Category, Counters};
use crate::error::{Error, Result};
use crate::ir::{
    Argument, FunctionId, Graph, Kwargs, Literal, Node, NodeId, NodeMeta, Op, GETATTR,
};
use crate::module::GraphModule;
use crate::resolver::MetadataResolver;

const TRUEDIV: &str = "_operator.truediv";

/// Outcome of purifying one call.
struct Purified {
    op: Op,
    kwargs_dropped: Option<&'static str>,
    /// Source nodes rebound to the new result.
    patches: Vec<NodeId>,
    /// The emitted call no longer mutates anything.
    pure: bool,
}

pub struct Functionalizer<'a> {
    config: &'a RewriteConfig,
}

impl<'a> Functionalizer<'a> {
    pub fn new(config: &'a RewriteConfig) -> Self {
        Self { config }
    }

    /// Builds the functional form of `module.graph`. The source is not modified.
    pub fn functionalize(&self, module: &GraphModule) -> Result<(Graph, Counters)> {
        let resolver = MetadataResolver::new(module, self.config);
        let mut graph = Graph::new();
        let mut env: FxHashMap<NodeId, Argument> = FxHashMap::default();
        let mut counters = Counters::new();

        for (id, node) in module.graph.iter() {
            let value = match &node.op {
                Op::Placeholder | Op::GetAttr(_) | Op::Output => {
                    Argument::Node(graph.node_copy(node, |input| lookup(&env, input))?)
                }
                Op::CallFunction(_) | Op::CallMethod(_) | Op::CallModule(_) => {
                    self.run_call(&resolver, &mut graph, &mut env, &mut counters, node)?
                }
            };
            env.insert(id, value);
        }

        info!(
            "Functionalized {} nodes into {}, {} mutations left",
            module.graph.len(),
            graph.len(),
            counters.total(Category::Mutation) + counters.total(Category::InputMutation)
        );
        Ok((graph, counters))
    }

    fn run_call(
        &self,
        resolver: &MetadataResolver<'_>,
        graph: &mut Graph,
        env: &mut FxHashMap<NodeId, Argument>,
        counters: &mut Counters,
        node: &Node,
    ) -> Result<Argument> {
        let meta = node.meta_or_err("type")?;
        let is_tensor = resolver.is_tensor(node)?;

        let purified = if is_tensor && !meta.is_input_mutation {
            self.purify(resolver, counters, node, meta)?
        } else {
            if meta.is_input_mutation {
                counters.incr(Category::InputMutation, resolver.long_name(node)?);
            }
            Purified {
                op: node.op.clone(),
                kwargs_dropped: None,
                patches: Vec::new(),
                pure: false,
            }
        };

        if let Op::CallFunction(function) = &purified.op {
            if function.is(GETATTR) {
                if let Some(value) = fold_getattr(resolver.graph(), counters, node)? {
                    return Ok(value);
                }
            }
        }
        if !is_tensor {
            counters.incr(Category::Nontensor, resolver.long_name(node)?);
        }

        let bindings: &FxHashMap<NodeId, Argument> = env;
        let args = node
            .args
            .iter()
            .map(|arg| arg.try_map_nodes(&mut |input| lookup(bindings, input)))
            .collect::<Result<Vec<_>>>()?;
        let kwargs: Kwargs = node
            .kwargs
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != purified.kwargs_dropped)
            .map(|(key, arg)| {
                Ok((
                    key.clone(),
                    arg.try_map_nodes(&mut |input| lookup(bindings, input))?,
                ))
            })
            .collect::<Result<_>>()?;

        if purified.op != node.op || purified.kwargs_dropped.is_some() {
            debug!("{}: purified {} to {}", node.name, node.target_string(), purified.op.opcode());
        }
        let new = graph.create_node(purified.op, args, kwargs, None);
        let mut new_meta = meta.clone();
        if purified.pure {
            new_meta.is_mutation = false;
        }
        graph.set_meta(new, new_meta)?;

        let result = Argument::Node(new);
        for target in purified.patches {
            if let Some(binding) = env.get_mut(&target) {
                debug!("{}: rebinding {target} to {}", node.name, graph.node(new)?.name);
                *binding = result.clone();
            }
        }
        Ok(result)
    }

    fn purify(
        &self,
        resolver: &MetadataResolver<'_>,
        counters: &mut Counters,
        node: &Node,
        meta: &NodeMeta,
    ) -> Result<Purified> {
        let first_arg = node.args.first().and_then(Argument::as_node);
        let mut purified = Purified {
            op: node.op.clone(),
            kwargs_dropped: None,
            patches: Vec::new(),
            pure: true,
        };

        if let Some(flag) = node.kwargs.get(INPLACE_KWARG) {
            purified.kwargs_dropped = Some(INPLACE_KWARG);
            if flag.as_bool() == Some(true) {
                purified.patches.extend(first_arg);
            }
            return Ok(purified);
        }
        if let Some(out) = node.kwargs.get(OUT_KWARG) {
            purified.kwargs_dropped = Some(OUT_KWARG);
            purified.patches.extend(out.as_node());
            return Ok(purified);
        }

        if let Op::CallFunction(target) = &node.op {
            if let Some(pure) = resolver.pure_variant(target) {
                purified.op = Op::CallFunction(pure.clone());
                purified.patches.extend(first_arg);
                return Ok(purified);
            }
            if let Some(function) = self.config.operator_functions.get(target) {
                if self.is_scalar_division(target, node) {
                    warn!(
                        "{}: leaving {target} with a scalar operand unconverted",
                        node.name
                    );
                    counters.incr(Category::UnconvertedDivision, resolver.long_name(node)?);
                } else {
                    purified.op = Op::CallFunction(function.clone());
                }
            }
        }

        if meta.is_mutation {
            counters.incr(Category::Mutation, resolver.long_name(node)?);
            purified.pure = false;
        }
        Ok(purified)
    }

    fn is_scalar_division(&self, target: &FunctionId, node: &Node) -> bool {
        target.is(TRUEDIV) && !node.args.iter().all(|arg| arg.as_node().is_some())
    }
}

/// Replaces `getattr(x, "dtype" | "device")` by the value recorded on `x`.
///
/// Returns `None` for any other read, which is re-emitted as a call.
fn fold_getattr(source: &Graph, counters: &mut Counters, node: &Node) -> Result<Option<Argument>> {
    let Some(attr) = node.args.get(1).and_then(Argument::as_str) else {
        return Ok(None);
    };
    let field = match attr {
        "dtype" => "dtype",
        "device" => "device",
        other => {
            counters.incr(Category::Getattr, other);
            return Ok(None);
        }
    };
    let Some(target) = node.args.first().and_then(Argument::as_node) else {
        counters.incr(Category::Getattr, attr);
        return Ok(None);
    };
    let target = source.node(target)?;
    let meta = target.meta_or_err(field)?;
    let value = match field {
        "dtype" => meta.dtype.clone(),
        _ => meta.device.clone(),
    }
    .ok_or_else(|| Error::MissingMetadata {
        node: target.name.clone(),
        field,
    })?;
    debug!("{}: folded {field} of {} to {value}", node.name, target.name);
    counters.incr(Category::ResolvedGetattr, attr);
    Ok(Some(Argument::Literal(Literal::Str(value))))
}

fn lookup(env: &FxHashMap<NodeId, Argument>, id: NodeId) -> Result<Argument> {
    env.get(&id).cloned().ok_or(Error::UnknownNode(id))
}

impl GraphPass for Functionalizer<'_> {
    fn name(&self) -> &str {
        "functionalize"
    }

    fn run(&self, module: &mut GraphModule, counters: &mut Counters) -> Result<()> {
        let (graph, diagnostics) = self.functionalize(module)?;
        module.graph = graph;
        counters.merge(&diagnostics);
        Ok(())
    }
}

/// Runs the [`Functionalizer`] with `config`.
pub fn functionalize(module: &GraphModule, config: &RewriteConfig) -> Result<(Graph, Counters)> {
    Functionalizer::new(config).functionalize(module)
}
