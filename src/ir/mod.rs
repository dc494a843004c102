//! The graph intermediate representation shared by every pass.
//!
//! A [`Graph`] is an ordered arena of [`Node`]s. Each node produces exactly one
//! value and may only reference nodes that precede it, so the graph order is
//! always a valid topological order.

mod argument;
mod function;
mod graph;
mod node;

pub use argument::{Argument, Kwargs, Literal};
pub use function::{FunctionId, GETATTR};
pub use graph::Graph;
pub use node::{Node, NodeId, NodeMeta, Op, ValueKind};

/// Builds a [`Kwargs`] map from `name => value` pairs.
#[macro_export]
macro_rules! kwargs {
    () => { $crate::ir::Kwargs::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::ir::Kwargs::new();
        $(map.insert($key.to_string(), $crate::ir::Argument::from($value));)+
        map
    }};
}
