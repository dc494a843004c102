use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use super::argument::{Argument, Kwargs};
use super::function::FunctionId;
use super::node::{Node, NodeId, NodeMeta, Op};
use crate::error::{Error, Result};

/// Owns all the nodes of a traced computation.
///
/// Nodes live in an arena indexed by `NodeId`; `order` holds the live ids in
/// topological order. Erasing a node frees its slot but never reuses its id.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    order: Vec<NodeId>,
    insert_point: Option<NodeId>,
    name_counts: FxHashMap<String, usize>,
}

impl Graph {
    /// Creates a new, empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or(Error::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Snapshot of the live node ids in topological order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    /// Iterates over live nodes in topological order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.order
            .iter()
            .filter_map(move |&id| self.get(id).map(|node| (id, node)))
    }

    /// The node at `index` in topological order.
    pub fn node_at(&self, index: usize) -> Option<NodeId> {
        self.order.get(index).copied()
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    pub fn placeholders(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.op == Op::Placeholder)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn output_node(&self) -> Option<NodeId> {
        self.iter()
            .find(|(_, node)| node.op == Op::Output)
            .map(|(id, _)| id)
    }

    // --- Node creation ---

    /// Adds a node at the current insertion point (the end of the graph by default).
    pub fn create_node(
        &mut self,
        op: Op,
        args: Vec<Argument>,
        kwargs: Kwargs,
        name_hint: Option<&str>,
    ) -> NodeId {
        let base = match name_hint {
            Some(hint) => sanitize(hint),
            None => default_name(&op),
        };
        let name = self.unique_name(&base);
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            name,
            op,
            args,
            kwargs,
            meta: None,
        }));
        let at = self
            .insert_point
            .and_then(|anchor| self.position(anchor))
            .unwrap_or(self.order.len());
        self.order.insert(at, id);
        id
    }

    pub fn placeholder(&mut self, name: &str) -> NodeId {
        self.create_node(Op::Placeholder, vec![], Kwargs::new(), Some(name))
    }

    pub fn get_attr(&mut self, target: impl Into<String>) -> NodeId {
        self.create_node(Op::GetAttr(target.into()), vec![], Kwargs::new(), None)
    }

    pub fn call_function(
        &mut self,
        target: FunctionId,
        args: Vec<Argument>,
        kwargs: Kwargs,
    ) -> NodeId {
        self.create_node(Op::CallFunction(target), args, kwargs, None)
    }

    pub fn call_method(
        &mut self,
        method: impl Into<String>,
        args: Vec<Argument>,
        kwargs: Kwargs,
    ) -> NodeId {
        self.create_node(Op::CallMethod(method.into()), args, kwargs, None)
    }

    pub fn call_module(
        &mut self,
        target: impl Into<String>,
        args: Vec<Argument>,
        kwargs: Kwargs,
    ) -> NodeId {
        self.create_node(Op::CallModule(target.into()), args, kwargs, None)
    }

    pub fn output(&mut self, result: Argument) -> NodeId {
        self.create_node(Op::Output, vec![result], Kwargs::new(), None)
    }

    pub fn set_meta(&mut self, id: NodeId, meta: NodeMeta) -> Result<()> {
        self.node_mut(id)?.meta = Some(meta);
        Ok(())
    }

    /// Runs `f` with new nodes inserted immediately before `anchor`.
    ///
    /// The previous insertion point is restored afterwards, so calls nest.
    pub fn inserting_before<R>(&mut self, anchor: NodeId, f: impl FnOnce(&mut Graph) -> R) -> R {
        let saved = self.insert_point.replace(anchor);
        let result = f(self);
        self.insert_point = saved;
        result
    }

    /// Copies `node` (usually from another graph) into this one, resolving each
    /// node reference through `map`. Metadata is copied as is.
    pub fn node_copy<F>(&mut self, node: &Node, mut map: F) -> Result<NodeId>
    where
        F: FnMut(NodeId) -> Result<Argument>,
    {
        let args = node
            .args
            .iter()
            .map(|arg| arg.try_map_nodes(&mut map))
            .collect::<Result<Vec<_>>>()?;
        let kwargs = node
            .kwargs
            .iter()
            .map(|(key, arg)| Ok((key.clone(), arg.try_map_nodes(&mut map)?)))
            .collect::<Result<Kwargs>>()?;
        let hint = match node.op {
            Op::Placeholder => Some(node.name.as_str()),
            _ => None,
        };
        let id = self.create_node(node.op.clone(), args, kwargs, hint);
        self.node_mut(id)?.meta = node.meta.clone();
        Ok(id)
    }

    // --- Mutation ---

    /// Live nodes that reference `id` in their arguments, in graph order.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| {
                node.args.iter().any(|arg| arg.references(id))
                    || node.kwargs.values().any(|arg| arg.references(id))
            })
            .map(|(user, _)| user)
            .collect()
    }

    /// Redirects every use of `old` to `new`. Returns the number of rewritten users.
    pub fn replace_all_uses_with(&mut self, old: NodeId, new: &Argument) -> usize {
        let mut rewritten = 0;
        for slot in self.nodes.iter_mut() {
            let Some(node) = slot.as_mut() else {
                continue;
            };
            let mut touched = false;
            let mut substitute = |id: NodeId| {
                if id == old {
                    touched = true;
                    new.clone()
                } else {
                    Argument::Node(id)
                }
            };
            node.args = node
                .args
                .iter()
                .map(|arg| arg.map_nodes(&mut substitute))
                .collect();
            node.kwargs = node
                .kwargs
                .iter()
                .map(|(key, arg)| (key.clone(), arg.map_nodes(&mut substitute)))
                .collect();
            if touched {
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Removes a node that no other node reads.
    pub fn erase_node(&mut self, id: NodeId) -> Result<()> {
        let users = self.users(id).len();
        let node = self.node(id)?;
        if users > 0 {
            return Err(Error::NodeHasUsers {
                name: node.name.clone(),
                users,
            });
        }
        self.order.retain(|&other| other != id);
        self.nodes[id.0] = None;
        if self.insert_point == Some(id) {
            self.insert_point = None;
        }
        Ok(())
    }

    // --- Invariants ---

    /// Checks the structural invariants every pass relies on: arguments only
    /// reference earlier nodes, placeholders come first, and exactly one
    /// output node exists and is last.
    pub fn validate(&self) -> Result<()> {
        let mut defined: FxHashSet<NodeId> = FxHashSet::default();
        let mut seen_non_placeholder = false;
        let mut output: Option<&Node> = None;

        for (id, node) in self.iter() {
            if let Some(out) = output {
                return Err(if node.op == Op::Output {
                    Error::DuplicateOutput
                } else {
                    Error::OutputNotLast(out.name.clone())
                });
            }
            match node.op {
                Op::Placeholder if seen_non_placeholder => {
                    return Err(Error::PlaceholderOutOfOrder(node.name.clone()));
                }
                Op::Placeholder => {}
                Op::Output => {
                    output = Some(node);
                    seen_non_placeholder = true;
                }
                Op::GetAttr(_) | Op::CallFunction(_) | Op::CallMethod(_) | Op::CallModule(_) => {
                    seen_non_placeholder = true;
                }
            }
            let mut forward = None;
            node.for_each_input(|arg| {
                if forward.is_none() && !defined.contains(&arg) {
                    forward = Some(arg);
                }
            });
            if let Some(arg) = forward {
                return Err(Error::ForwardReference {
                    node: node.name.clone(),
                    arg: self
                        .get(arg)
                        .map_or_else(|| arg.to_string(), |n| n.name.clone()),
                });
            }
            defined.insert(id);
        }

        if output.is_none() {
            return Err(Error::MissingOutput);
        }
        Ok(())
    }

    /// Equality up to node identity: same ops, arguments (by position), kwargs
    /// and metadata, in the same order. Node names are ignored.
    pub fn structurally_eq(&self, other: &Graph) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let ours = self.positions();
        let theirs = other.positions();
        self.iter().zip(other.iter()).all(|((_, a), (_, b))| {
            let a_args: Vec<_> = a.args.iter().map(|arg| canonical(arg, &ours)).collect();
            let b_args: Vec<_> = b.args.iter().map(|arg| canonical(arg, &theirs)).collect();
            let a_kwargs: Vec<_> = a
                .kwargs
                .iter()
                .map(|(k, arg)| (k, canonical(arg, &ours)))
                .collect();
            let b_kwargs: Vec<_> = b
                .kwargs
                .iter()
                .map(|(k, arg)| (k, canonical(arg, &theirs)))
                .collect();
            a.op == b.op && a.meta == b.meta && a_args == b_args && a_kwargs == b_kwargs
        })
    }

    fn positions(&self) -> FxHashMap<NodeId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect()
    }

    fn unique_name(&mut self, base: &str) -> String {
        let count = self.name_counts.entry(base.to_string()).or_insert(0);
        let name = if *count == 0 {
            base.to_string()
        } else {
            format!("{base}_{count}")
        };
        *count += 1;
        name
    }

    pub(crate) fn display_arg(&self, arg: &Argument) -> String {
        match arg {
            Argument::Node(id) => self
                .get(*id)
                .map_or_else(|| id.to_string(), |node| node.name.clone()),
            Argument::Literal(lit) => lit.to_string(),
            Argument::Tuple(items) => {
                let items: Vec<_> = items.iter().map(|item| self.display_arg(item)).collect();
                format!("({})", items.join(", "))
            }
        }
    }
}

fn canonical(arg: &Argument, positions: &FxHashMap<NodeId, usize>) -> Argument {
    arg.map_nodes(&mut |id| Argument::Node(NodeId(positions.get(&id).copied().unwrap_or(usize::MAX))))
}

fn sanitize(name: &str) -> String {
    name.replace('.', "_")
}

fn default_name(op: &Op) -> String {
    match op {
        Op::Placeholder => "input".to_string(),
        Op::GetAttr(target) | Op::CallMethod(target) | Op::CallModule(target) => sanitize(target),
        Op::CallFunction(target) => target.name().to_string(),
        Op::Output => "output".to_string(),
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<14} {:<16} {:<32} {:<28} kwargs",
            "opcode", "name", "target", "args"
        )?;
        for (_, node) in self.iter() {
            let args: Vec<_> = node.args.iter().map(|arg| self.display_arg(arg)).collect();
            let kwargs: Vec<_> = node
                .kwargs
                .iter()
                .map(|(key, arg)| format!("{key}={}", self.display_arg(arg)))
                .collect();
            writeln!(
                f,
                "{:<14} {:<16} {:<32} {:<28} {{{}}}",
                node.op.opcode(),
                node.name,
                node.target_string(),
                format!("({})", args.join(", ")),
                kwargs.join(", ")
            )?;
        }
        Ok(())
    }
}
