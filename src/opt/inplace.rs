//! Rewrites calls whose argument is dead afterwards into in-place calls.
//!
//! The pass runs in two phases. The first assigns each node a storage
//! buffer: views and `out=` calls share the buffer of the tensor they alias,
//! every other call owns a fresh one, and graph inputs, attributes and the
//! output are pinned. The second walks the graph backwards, counting the
//! uses of each buffer seen so far. When a call reaches its argument's
//! buffer with zero later uses, writing into that buffer is unobservable.

use log::{debug, info};
use rustc_hash::FxHashMap;

use super::GraphPass;
use crate::config::{RewriteConfig, INPLACE_KWARG, OUT_KWARG};
use crate::counters::{self, Category, Counters};
use crate::error::Result;
use crate::ir::{Argument, FunctionId, Kwargs, Node, NodeId, Op};
use crate::module::GraphModule;
use crate::resolver::MetadataResolver;
use crate::signature::SignatureDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Uses(usize),
    /// Observable outside the graph; never reusable.
    Pinned,
}

#[derive(Debug, Default)]
struct Buffers {
    of: FxHashMap<NodeId, usize>,
    liveness: Vec<Liveness>,
}

impl Buffers {
    fn fresh(&mut self, node: NodeId, liveness: Liveness) {
        self.of.insert(node, self.liveness.len());
        self.liveness.push(liveness);
    }

    fn alias(&mut self, node: NodeId, target: NodeId) {
        match self.of.get(&target).copied() {
            Some(buffer) => {
                self.of.insert(node, buffer);
            }
            None => self.fresh(node, Liveness::Uses(0)),
        }
    }

    fn same(&self, a: NodeId, b: NodeId) -> bool {
        matches!((self.of.get(&a), self.of.get(&b)), (Some(x), Some(y)) if x == y)
    }

    fn is_dead(&self, node: NodeId) -> bool {
        self.of
            .get(&node)
            .is_some_and(|&buffer| self.liveness[buffer] == Liveness::Uses(0))
    }

    fn record_use(&mut self, node: NodeId) {
        if let Some(&buffer) = self.of.get(&node) {
            if let Liveness::Uses(n) = &mut self.liveness[buffer] {
                *n += 1;
            }
        }
    }
}

/// How a call was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rewrite {
    Inplace,
    Out,
}

impl Rewrite {
    fn key(self) -> &'static str {
        match self {
            Rewrite::Inplace => counters::INPLACE,
            Rewrite::Out => counters::OUT,
        }
    }
}

pub struct Inplacifier<'a> {
    config: &'a RewriteConfig,
    signatures: &'a dyn SignatureDb,
}

impl<'a> Inplacifier<'a> {
    pub fn new(config: &'a RewriteConfig, signatures: &'a dyn SignatureDb) -> Self {
        Self { config, signatures }
    }

    pub fn inplacify(&self, module: &mut GraphModule, counters: &mut Counters) -> Result<()> {
        let mut buffers = self.assign_buffers(module)?;
        let mut rewrites = 0;

        let order = module.graph.node_ids();
        for &id in order.iter().rev() {
            let node = module.graph.node(id)?.clone();
            let planned = match &node.op {
                Op::CallFunction(target) => self
                    .plan(&self.resolver(module), target, &node, &buffers)
                    .map(|(kwargs, rewrite)| (target, kwargs, rewrite)),
                _ => None,
            };
            if let Some((target, kwargs, rewrite)) = planned {
                let new = module.graph.inserting_before(id, |graph| {
                    graph.call_function(target.clone(), node.args.clone(), kwargs)
                });
                let mut meta = node.meta.clone();
                if let Some(meta) = meta.as_mut() {
                    meta.is_mutation = true;
                }
                module.graph.node_mut(new)?.meta = meta;
                module
                    .graph
                    .replace_all_uses_with(id, &Argument::Node(new));
                module.graph.erase_node(id)?;

                debug!("{}: {} -> {}", node.name, target, rewrite.key());
                counters.incr(Category::Optimizations, rewrite.key());
                rewrites += 1;
            }
            node.for_each_input(|input| buffers.record_use(input));
        }

        info!("Inplacifier rewrote {rewrites} calls");
        Ok(())
    }

    fn resolver<'m>(&'m self, module: &'m GraphModule) -> MetadataResolver<'m> {
        MetadataResolver::new(module, self.config).with_signatures(self.signatures)
    }

    /// Phase A. A call that already writes into an argument (`inplace=True`,
    /// `out=`, `relu_`, `x += y`, or a traced mutation) shares that
    /// argument's buffer, like a view shares its base.
    fn assign_buffers(&self, module: &GraphModule) -> Result<Buffers> {
        let resolver = self.resolver(module);
        let mut buffers = Buffers::default();
        for (id, node) in module.graph.iter() {
            if !node.op.is_call() {
                buffers.fresh(id, Liveness::Pinned);
                continue;
            }
            let aliased = if resolver.is_view(node)? {
                node.args.first().and_then(Argument::as_node)
            } else {
                resolver.mutated_argument(node)
            };
            match aliased {
                Some(target) => buffers.alias(id, target),
                None => buffers.fresh(id, Liveness::Uses(0)),
            }
        }
        Ok(buffers)
    }

    /// The kwargs of the in-place replacement for `node`, if it has one.
    fn plan(
        &self,
        resolver: &MetadataResolver<'_>,
        target: &FunctionId,
        node: &Node,
        buffers: &Buffers,
    ) -> Option<(Kwargs, Rewrite)> {
        if resolver.is_never_inplace(target) {
            return None;
        }
        let mut kwargs = node.kwargs.clone();
        kwargs.remove(INPLACE_KWARG);

        if node.args.len() + kwargs.len() == 1 {
            let arg = node.args.first().or_else(|| kwargs.values().next())?.clone();
            if !buffers.is_dead(arg.as_node()?) {
                return None;
            }
            if resolver.has_inplace_variant(target) {
                kwargs.insert(INPLACE_KWARG.to_string(), Argument::from(true));
                return Some((kwargs, Rewrite::Inplace));
            }
            if resolver.accepts_out(target) {
                kwargs.insert(OUT_KWARG.to_string(), arg);
                return Some((kwargs, Rewrite::Out));
            }
            return None;
        }

        if self.is_binary_out_candidate(resolver, target, node, &kwargs, buffers) {
            kwargs.insert(OUT_KWARG.to_string(), node.args[0].clone());
            return Some((kwargs, Rewrite::Out));
        }
        None
    }

    /// `f(a, b)` may write into `a` when `f` is elementwise, `a` is dead and
    /// shares no storage with `b`, and every tensor involved has the same
    /// known shape. A literal `b` is a scalar.
    fn is_binary_out_candidate(
        &self,
        resolver: &MetadataResolver<'_>,
        target: &FunctionId,
        node: &Node,
        kwargs: &Kwargs,
        buffers: &Buffers,
    ) -> bool {
        if node.args.len() != 2
            || !kwargs.is_empty()
            || !self.config.elementwise_binary_ops.contains(target)
            || !resolver.accepts_out(target)
        {
            return false;
        }
        let Some(first) = node.args[0].as_node() else {
            return false;
        };
        if !buffers.is_dead(first) {
            return false;
        }
        let graph = resolver.graph();
        let shape_of = |id: NodeId| {
            graph
                .get(id)
                .and_then(|n| n.meta.as_ref())
                .and_then(|m| m.shape.clone())
        };
        let Some(shape) = node.meta.as_ref().and_then(|m| m.shape.clone()) else {
            return false;
        };
        if shape_of(first).as_ref() != Some(&shape) {
            return false;
        }
        match &node.args[1] {
            Argument::Literal(_) => true,
            Argument::Node(second) => {
                !buffers.same(first, *second) && shape_of(*second).as_ref() == Some(&shape)
            }
            Argument::Tuple(_) => false,
        }
    }
}

impl GraphPass for Inplacifier<'_> {
    fn name(&self) -> &str {
        "inplace"
    }

    fn run(&self, module: &mut GraphModule, counters: &mut Counters) -> Result<()> {
        self.inplacify(module, counters)
    }
}
