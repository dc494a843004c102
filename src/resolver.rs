//! Per-node names and operator classification used by the passes.

use crate::config::{RewriteConfig, INPLACE_KWARG, OUT_KWARG};
use crate::error::Result;
use crate::ir::{Argument, FunctionId, Graph, Node, NodeId, Op};
use crate::module::GraphModule;
use crate::signature::SignatureDb;

/// Answers questions about nodes of one [`GraphModule`].
pub struct MetadataResolver<'a> {
    module: &'a GraphModule,
    config: &'a RewriteConfig,
    signatures: Option<&'a dyn SignatureDb>,
}

impl<'a> MetadataResolver<'a> {
    pub fn new(module: &'a GraphModule, config: &'a RewriteConfig) -> Self {
        Self {
            module,
            config,
            signatures: None,
        }
    }

    pub fn with_signatures(mut self, signatures: &'a dyn SignatureDb) -> Self {
        self.signatures = Some(signatures);
        self
    }

    pub fn graph(&self) -> &'a Graph {
        &self.module.graph
    }

    /// Short operator name: `relu` for `torch.relu`, the class name for a
    /// module call, the attribute path for a `GetAttr`.
    pub fn short_name(&self, node: &Node) -> Result<String> {
        Ok(match &node.op {
            Op::CallFunction(target) => target.name().to_string(),
            Op::CallMethod(method) => method.clone(),
            Op::CallModule(target) => self
                .module
                .get_submodule(target)?
                .class_name()
                .to_string(),
            Op::GetAttr(target) => target.clone(),
            Op::Placeholder => node.name.clone(),
            Op::Output => "output".to_string(),
        })
    }

    /// Qualified name used as a diagnostic key.
    pub fn long_name(&self, node: &Node) -> Result<String> {
        Ok(match &node.op {
            Op::CallFunction(target) => self.function_name(target),
            Op::CallModule(target) => self.module.get_submodule(target)?.qualified_class(),
            Op::CallMethod(_) | Op::GetAttr(_) | Op::Placeholder | Op::Output => {
                self.short_name(node)?
            }
        })
    }

    pub fn function_name(&self, function: &FunctionId) -> String {
        self.config
            .display_names
            .get(function)
            .cloned()
            .unwrap_or_else(|| function.path().to_string())
    }

    /// Whether the node's result may share storage with its first argument.
    pub fn is_view(&self, node: &Node) -> Result<bool> {
        if !node.op.is_call() {
            return Ok(false);
        }
        Ok(self.config.is_view_op(&self.short_name(node)?))
    }

    pub fn is_tensor(&self, node: &Node) -> Result<bool> {
        Ok(node.meta_or_err("type")?.is_tensor())
    }

    /// Whether `function` can run in place through an `inplace=True` flag.
    pub fn has_inplace_variant(&self, function: &FunctionId) -> bool {
        self.config.inplace_ops.contains(function)
    }

    /// Whether `function` accepts an output buffer. `false` without a signature database.
    pub fn accepts_out(&self, function: &FunctionId) -> bool {
        self.signatures
            .map_or(false, |signatures| signatures.accepts_out(function))
    }

    pub fn is_never_inplace(&self, function: &FunctionId) -> bool {
        self.config.is_never_inplace(function)
    }

    /// The pure function behind an in-place variant (`torch.relu_`) or a
    /// destructive operator (`_operator.iadd`).
    pub fn pure_variant(&self, function: &FunctionId) -> Option<&'a FunctionId> {
        self.config
            .inplace_variants
            .get(function)
            .or_else(|| self.config.destructive_operators.get(function))
    }

    /// The node whose storage `node` writes into.
    ///
    /// That is the `out=` buffer if one is given, else the first argument
    /// of a call flagged `inplace=True`, of an in-place variant or
    /// destructive operator, or of any call the tracer marked as mutating.
    pub fn mutated_argument(&self, node: &Node) -> Option<NodeId> {
        if !node.op.is_call() {
            return None;
        }
        if let Some(out) = node.kwargs.get(OUT_KWARG).and_then(Argument::as_node) {
            return Some(out);
        }
        let first = node.args.first().and_then(Argument::as_node)?;
        let flagged = node.kwargs.get(INPLACE_KWARG).and_then(Argument::as_bool) == Some(true);
        let variant = node
            .op
            .function()
            .is_some_and(|function| self.pure_variant(function).is_some());
        let marked = node.meta.as_ref().is_some_and(|meta| meta.is_mutation);
        (flagged || variant || marked).then_some(first)
    }
}
