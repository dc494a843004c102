//! Tracer interface and the transparent re-tracer used by inlining.
//!
//! Tracing a [`Module`] records its body into a fresh [`Graph`]. Children that
//! the [`Tracer`] does not treat as leaves are flattened into the same graph,
//! with their `GetAttr` targets qualified by the child's path so parameter
//! ownership stays attached to the child.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::{Argument, Graph, Kwargs, Node, NodeId, Op};
use crate::module::{Module, ModuleBody};

/// Decides which submodules stay opaque `CallModule` nodes while tracing.
pub trait Tracer {
    fn is_leaf_module(&self, module: &Module, qualified_name: &str) -> bool;
}

/// Treats no module as a leaf, so every nested module is flattened.
#[derive(Debug, Clone, Copy, Default)]
pub struct InliningTracer;

impl Tracer for InliningTracer {
    fn is_leaf_module(&self, _module: &Module, _qualified_name: &str) -> bool {
        false
    }
}

/// Inputs bound to a nested module's placeholders.
struct CallInputs {
    args: Vec<Argument>,
    kwargs: Kwargs,
    next: usize,
}

/// One module being walked. Nested modules push a frame instead of recursing.
struct Frame<'m> {
    module: &'m Module,
    body: &'m Graph,
    order: Vec<NodeId>,
    cursor: usize,
    prefix: String,
    env: FxHashMap<NodeId, Argument>,
    /// `None` for the traced root, whose placeholders become graph inputs.
    inputs: Option<CallInputs>,
    /// The `CallModule` node in the parent frame that receives the result.
    call_site: Option<NodeId>,
}

impl<'m> Frame<'m> {
    fn new(
        module: &'m Module,
        prefix: String,
        inputs: Option<CallInputs>,
        call_site: Option<NodeId>,
    ) -> Result<Self> {
        let body = match module.body() {
            ModuleBody::Traced(body) => body,
            ModuleBody::Opaque => {
                return Err(Error::NotTraceable(module.class_name().to_string()))
            }
        };
        Ok(Frame {
            module,
            body,
            order: body.node_ids(),
            cursor: 0,
            prefix,
            env: FxHashMap::default(),
            inputs,
            call_site,
        })
    }

    fn lookup(&self, id: NodeId) -> Result<Argument> {
        self.env.get(&id).cloned().ok_or(Error::UnknownNode(id))
    }

    fn resolve(&self, arg: &Argument) -> Result<Argument> {
        arg.try_map_nodes(&mut |id| self.lookup(id))
    }

    fn bind_placeholder(&mut self, node: &Node) -> Result<Option<Argument>> {
        let Some(inputs) = self.inputs.as_mut() else {
            return Ok(None);
        };
        let value = if let Some(arg) = inputs.args.get(inputs.next) {
            inputs.next += 1;
            arg.clone()
        } else if let Some(arg) = inputs.kwargs.get(&node.name) {
            arg.clone()
        } else {
            return Err(Error::ArityMismatch {
                class: self.module.class_name().to_string(),
                expected: self.body.placeholders().len(),
                got: inputs.args.len() + inputs.kwargs.len(),
            });
        };
        Ok(Some(value))
    }
}

enum Step<'m> {
    Continue,
    Enter(Frame<'m>),
    Return(Argument),
}

/// Records `module` into a standalone graph, flattening every child that
/// `tracer` does not consider a leaf.
///
/// Each traced module's input check runs against its placeholders; a
/// rejection aborts the trace.
pub fn trace(tracer: &dyn Tracer, module: &Module) -> Result<Graph> {
    let mut graph = Graph::new();
    let mut stack = vec![Frame::new(module, String::new(), None, None)?];

    loop {
        let Some(frame) = stack.last_mut() else {
            return Err(Error::NoOutputInTrace(module.class_name().to_string()));
        };
        let Some(&id) = frame.order.get(frame.cursor) else {
            return Err(Error::NoOutputInTrace(
                frame.module.class_name().to_string(),
            ));
        };
        frame.cursor += 1;
        let current: &Module = frame.module;
        let body: &Graph = frame.body;
        let node = body.node(id)?;
        log::trace!("tracing {} {}", node.op.opcode(), node.name);

        let step = match &node.op {
            Op::Placeholder => {
                if !current.check_input(node) {
                    return Err(Error::InputRejected(current.class_name().to_string()));
                }
                let value = match frame.bind_placeholder(node)? {
                    Some(value) => value,
                    None => Argument::Node(graph.node_copy(node, |arg| frame.lookup(arg))?),
                };
                frame.env.insert(id, value);
                Step::Continue
            }
            Op::GetAttr(target) => {
                let attr = graph.get_attr(format!("{}{}", frame.prefix, target));
                graph.node_mut(attr)?.meta = node.meta.clone();
                frame.env.insert(id, Argument::Node(attr));
                Step::Continue
            }
            Op::CallModule(target) => {
                let qualified = format!("{}{}", frame.prefix, target);
                let child = current
                    .descendant(target)
                    .ok_or_else(|| Error::UnknownModule(qualified.clone()))?;
                if tracer.is_leaf_module(child, &qualified) {
                    let copied = graph.node_copy(node, |arg| frame.lookup(arg))?;
                    graph.node_mut(copied)?.op = Op::CallModule(qualified);
                    frame.env.insert(id, Argument::Node(copied));
                    Step::Continue
                } else {
                    let args = node
                        .args
                        .iter()
                        .map(|arg| frame.resolve(arg))
                        .collect::<Result<Vec<_>>>()?;
                    let kwargs = node
                        .kwargs
                        .iter()
                        .map(|(key, arg)| Ok((key.clone(), frame.resolve(arg)?)))
                        .collect::<Result<Kwargs>>()?;
                    let inputs = CallInputs {
                        args,
                        kwargs,
                        next: 0,
                    };
                    Step::Enter(Frame::new(
                        child,
                        format!("{qualified}."),
                        Some(inputs),
                        Some(id),
                    )?)
                }
            }
            Op::Output => {
                let result = node
                    .args
                    .first()
                    .map(|arg| frame.resolve(arg))
                    .transpose()?
                    .unwrap_or(Argument::Tuple(Vec::new()));
                Step::Return(result)
            }
            Op::CallFunction(_) | Op::CallMethod(_) => {
                let copied = graph.node_copy(node, |arg| frame.lookup(arg))?;
                frame.env.insert(id, Argument::Node(copied));
                Step::Continue
            }
        };

        match step {
            Step::Continue => {}
            Step::Enter(child) => stack.push(child),
            Step::Return(value) => {
                let finished = stack.pop();
                let call_site = finished.and_then(|frame| frame.call_site);
                match (call_site, stack.last_mut()) {
                    (Some(call), Some(parent)) => {
                        parent.env.insert(call, value);
                    }
                    _ => {
                        graph.output(value);
                        return Ok(graph);
                    }
                }
            }
        }
    }
}
