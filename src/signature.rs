//! Operator signature lookup.
//!
//! The inplacifier only needs to know whether a function has an output-buffer
//! parameter. A real deployment answers that from the operator schema
//! registry; [`StaticSignatures`] answers it from a fixed table.

use rustc_hash::FxHashSet;

use crate::ir::FunctionId;

pub trait SignatureDb {
    /// Whether `function` accepts an `out: Tensor` keyword argument.
    fn accepts_out(&self, function: &FunctionId) -> bool;
}

impl<F> SignatureDb for F
where
    F: Fn(&FunctionId) -> bool,
{
    fn accepts_out(&self, function: &FunctionId) -> bool {
        self(function)
    }
}

/// A fixed set of functions known to take an output buffer.
#[derive(Debug, Clone)]
pub struct StaticSignatures {
    with_out: FxHashSet<FunctionId>,
}

impl StaticSignatures {
    pub fn new(functions: impl IntoIterator<Item = FunctionId>) -> Self {
        Self {
            with_out: functions.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }
}

impl Default for StaticSignatures {
    /// Unary and binary pointwise ops of the `torch` namespace.
    fn default() -> Self {
        Self::new(
            [
                "torch.abs",
                "torch.add",
                "torch.ceil",
                "torch.clamp",
                "torch.cos",
                "torch.div",
                "torch.erf",
                "torch.exp",
                "torch.floor",
                "torch.log",
                "torch.mul",
                "torch.neg",
                "torch.pow",
                "torch.reciprocal",
                "torch.round",
                "torch.rsqrt",
                "torch.sigmoid",
                "torch.sin",
                "torch.sqrt",
                "torch.sub",
                "torch.tanh",
                "torch.tril",
            ]
            .into_iter()
            .map(FunctionId::new),
        )
    }
}

impl SignatureDb for StaticSignatures {
    fn accepts_out(&self, function: &FunctionId) -> bool {
        self.with_out.contains(function)
    }
}
