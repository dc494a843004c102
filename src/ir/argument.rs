use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::NodeId;

/// A constant appearing directly in a call's arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => write!(f, "None"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(x) => write!(f, "{x:?}"),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// A call argument: a def-use edge to an earlier node, a literal, or a tuple of either.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Node(NodeId),
    Literal(Literal),
    Tuple(Vec<Argument>),
}

/// Keyword arguments, ordered by name so every pass iterates them deterministically.
pub type Kwargs = BTreeMap<String, Argument>;

impl Argument {
    /// The referenced node, if this argument is a bare node reference.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Argument::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Argument::Literal(Literal::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Literal truthiness; node references and tuples are not literals and yield `None`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Argument::Literal(Literal::Bool(b)) => Some(*b),
            Argument::Literal(Literal::Int(i)) => Some(*i != 0),
            Argument::Literal(Literal::None) => Some(false),
            _ => None,
        }
    }

    /// Visits every node reference, descending into tuples, in argument order.
    pub fn for_each_node<F: FnMut(NodeId)>(&self, f: &mut F) {
        match self {
            Argument::Node(id) => f(*id),
            Argument::Literal(_) => {}
            Argument::Tuple(items) => {
                for item in items {
                    item.for_each_node(f);
                }
            }
        }
    }

    /// Rebuilds the argument with every node reference replaced by `f(id)`.
    pub fn try_map_nodes<E, F>(&self, f: &mut F) -> Result<Argument, E>
    where
        F: FnMut(NodeId) -> Result<Argument, E>,
    {
        Ok(match self {
            Argument::Node(id) => f(*id)?,
            Argument::Literal(lit) => Argument::Literal(lit.clone()),
            Argument::Tuple(items) => Argument::Tuple(
                items
                    .iter()
                    .map(|item| item.try_map_nodes(f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    pub fn map_nodes<F: FnMut(NodeId) -> Argument>(&self, f: &mut F) -> Argument {
        match self {
            Argument::Node(id) => f(*id),
            Argument::Literal(lit) => Argument::Literal(lit.clone()),
            Argument::Tuple(items) => {
                Argument::Tuple(items.iter().map(|item| item.map_nodes(f)).collect())
            }
        }
    }

    pub fn references(&self, node: NodeId) -> bool {
        let mut found = false;
        self.for_each_node(&mut |id| found |= id == node);
        found
    }
}

impl From<NodeId> for Argument {
    fn from(id: NodeId) -> Self {
        Argument::Node(id)
    }
}

impl From<Literal> for Argument {
    fn from(lit: Literal) -> Self {
        Argument::Literal(lit)
    }
}

impl From<bool> for Argument {
    fn from(b: bool) -> Self {
        Argument::Literal(Literal::Bool(b))
    }
}

impl From<i64> for Argument {
    fn from(i: i64) -> Self {
        Argument::Literal(Literal::Int(i))
    }
}

impl From<f64> for Argument {
    fn from(x: f64) -> Self {
        Argument::Literal(Literal::Float(x))
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Argument::Literal(Literal::Str(s.to_string()))
    }
}

impl<T: Into<Argument>> From<Vec<T>> for Argument {
    fn from(items: Vec<T>) -> Self {
        Argument::Tuple(items.into_iter().map(Into::into).collect())
    }
}
