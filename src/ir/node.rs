use std::fmt;

use super::argument::{Argument, Kwargs};
use super::function::FunctionId;
use crate::error::{Error, Result};

/// A unique identifier for a node within a `Graph`.
///
/// Ids index the graph's arena and are never reused, so an erased node's id
/// stays invalid for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The kind of operation a node performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// An external input to the graph.
    Placeholder,
    /// Reads a parameter or constant owned by the enclosing module.
    GetAttr(String),
    /// Invokes a function with positional and keyword arguments.
    CallFunction(FunctionId),
    /// Invokes a named method on the first argument.
    CallMethod(String),
    /// Invokes a named submodule; opaque unless inlined.
    CallModule(String),
    /// Wraps the graph's result value. Always the last node.
    Output,
}

impl Op {
    pub fn opcode(&self) -> &'static str {
        match self {
            Op::Placeholder => "placeholder",
            Op::GetAttr(_) => "get_attr",
            Op::CallFunction(_) => "call_function",
            Op::CallMethod(_) => "call_method",
            Op::CallModule(_) => "call_module",
            Op::Output => "output",
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self,
            Op::CallFunction(_) | Op::CallMethod(_) | Op::CallModule(_)
        )
    }

    pub fn function(&self) -> Option<&FunctionId> {
        match self {
            Op::CallFunction(target) => Some(target),
            _ => None,
        }
    }
}

/// Classification of the value a node produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Tensor,
    /// Any non-tensor value, named by its type (`int`, `torch.Size`, ...).
    Other(String),
}

/// Metadata recorded by the tracer for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub value: ValueKind,
    pub dtype: Option<String>,
    pub device: Option<String>,
    pub shape: Option<Vec<usize>>,
    /// This call mutates one of its arguments.
    pub is_mutation: bool,
    /// The mutated argument is itself a graph input.
    pub is_input_mutation: bool,
}

impl NodeMeta {
    pub fn tensor() -> Self {
        NodeMeta {
            value: ValueKind::Tensor,
            dtype: None,
            device: None,
            shape: None,
            is_mutation: false,
            is_input_mutation: false,
        }
    }

    pub fn other(type_name: impl Into<String>) -> Self {
        NodeMeta {
            value: ValueKind::Other(type_name.into()),
            ..NodeMeta::tensor()
        }
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = Some(dtype.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn mutating(mut self) -> Self {
        self.is_mutation = true;
        self
    }

    pub fn mutating_input(mut self) -> Self {
        self.is_mutation = true;
        self.is_input_mutation = true;
        self
    }

    pub fn is_tensor(&self) -> bool {
        self.value == ValueKind::Tensor
    }
}

/// A single value-producing operation of the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique, human readable name within the owning graph.
    pub name: String,
    pub op: Op,
    pub args: Vec<Argument>,
    pub kwargs: Kwargs,
    pub meta: Option<NodeMeta>,
}

impl Node {
    /// Metadata or a `MissingMetadata` error naming `field`.
    pub fn meta_or_err(&self, field: &'static str) -> Result<&NodeMeta> {
        self.meta.as_ref().ok_or_else(|| Error::MissingMetadata {
            node: self.name.clone(),
            field,
        })
    }

    /// Visits every node referenced by the positional then keyword arguments.
    ///
    /// A node referenced twice is visited twice.
    pub fn for_each_input<F: FnMut(NodeId)>(&self, mut f: F) {
        for arg in &self.args {
            arg.for_each_node(&mut f);
        }
        for arg in self.kwargs.values() {
            arg.for_each_node(&mut f);
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        let mut inputs = Vec::new();
        self.for_each_input(|id| inputs.push(id));
        inputs
    }

    pub fn target_string(&self) -> String {
        match &self.op {
            Op::Placeholder => self.name.clone(),
            Op::GetAttr(target) | Op::CallMethod(target) | Op::CallModule(target) => {
                target.clone()
            }
            Op::CallFunction(target) => target.to_string(),
            Op::Output => "output".to_string(),
        }
    }
}
