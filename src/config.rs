//! Configuration tables that drive the rewrite passes.
//!
//! Every table is plain data. The defaults describe the PyTorch operator set;
//! callers can swap any table programmatically or from JSON:
//!
//! ```
//! use harp_rewrite::config::RewriteConfig;
//!
//! let config = RewriteConfig::from_json(r#"{ "dont_expand_modules": ["LSTM", "GRU"] }"#).unwrap();
//! assert!(config.dont_expand_modules.contains("GRU"));
//! // tables missing from the JSON keep their defaults
//! assert!(config.view_ops.contains("transpose"));
//! ```
//!
//! `RewriteConfig::from_env()` loads the file named by `HARP_REWRITE_CONFIG`,
//! falling back to the defaults when the variable is unset.

use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ir::FunctionId;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_ENV: &str = "HARP_REWRITE_CONFIG";

/// Keyword argument that requests in-place execution.
pub const INPLACE_KWARG: &str = "inplace";

/// Keyword argument that names an output buffer.
pub const OUT_KWARG: &str = "out";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// `x.foo(...)` becomes `function(x, ...)`.
    pub normalize_methods: FxHashMap<String, FunctionId>,
    /// Deprecated aliases replaced by their canonical function.
    pub function_replacements: FxHashMap<FunctionId, FunctionId>,
    /// Module classes with internal control flow; never inlined.
    pub dont_expand_modules: FxHashSet<String>,
    /// Ops whose result shares storage with their first argument.
    pub view_ops: FxHashSet<String>,
    /// Ops that may or may not return a view; treated as views.
    pub maybe_view_ops: FxHashSet<String>,
    /// Functions that must stay pure.
    pub never_inplace: FxHashSet<FunctionId>,
    /// Every function defined in one of these modules must stay pure.
    pub never_inplace_modules: FxHashSet<String>,
    /// Functions that accept `inplace=True`.
    pub inplace_ops: FxHashSet<FunctionId>,
    /// In-place unary variants and the pure function they mutate with.
    pub inplace_variants: FxHashMap<FunctionId, FunctionId>,
    /// Destructive compound operators (`x += y`) and their pure replacement.
    pub destructive_operators: FxHashMap<FunctionId, FunctionId>,
    /// Plain operator functions and their tensor-library equivalent.
    pub operator_functions: FxHashMap<FunctionId, FunctionId>,
    /// Elementwise binary functions whose first operand may serve as `out`.
    pub elementwise_binary_ops: FxHashSet<FunctionId>,
    /// Preferred diagnostic names for functions, e.g. public aliases of
    /// private implementations. Unlisted functions use their path.
    pub display_names: FxHashMap<FunctionId, String>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            normalize_methods: default_normalize_methods(),
            function_replacements: pairs(&[
                ("torch.nn.functional.sigmoid", "torch.sigmoid"),
                ("torch.nn.functional.tanh", "torch.tanh"),
            ]),
            dont_expand_modules: strings(&["ConvTranspose2d", "EmbeddingBag", "LSTM"]),
            view_ops: strings(VIEW_OPS),
            maybe_view_ops: strings(&["contiguous", "reshape"]),
            never_inplace: FxHashSet::default(),
            never_inplace_modules: strings(&["builtins", "math", "_operator"]),
            inplace_ops: functions(&[
                "torch.nn.functional.mish",
                "torch.nn.functional.silu",
                "torch.nn.functional.hardsigmoid",
                "torch.nn.functional.rrelu",
                "torch.nn.functional.leaky_relu",
                "torch.nn.functional.celu",
                "torch.nn.functional.selu",
                "torch.nn.functional.elu",
                "torch.nn.functional.relu6",
                "torch.nn.functional.hardswish",
                "torch.nn.functional.hardtanh",
                "torch.nn.functional.relu",
                "torch.nn.functional.threshold",
            ]),
            inplace_variants: pairs(&[
                ("torch.relu_", "torch.relu"),
                ("torch.sigmoid_", "torch.sigmoid"),
                ("torch.tanh_", "torch.tanh"),
            ]),
            destructive_operators: pairs(&[
                ("_operator.iadd", "torch.add"),
                ("_operator.isub", "torch.sub"),
                ("_operator.imul", "torch.mul"),
                ("_operator.itruediv", "torch.div"),
                ("_operator.ifloordiv", "torch.floor_divide"),
                ("_operator.ipow", "torch.pow"),
                ("_operator.imatmul", "torch.matmul"),
                ("_operator.iand", "torch.bitwise_and"),
                ("_operator.ior", "torch.bitwise_or"),
                ("_operator.ixor", "torch.bitwise_xor"),
            ]),
            operator_functions: pairs(&[
                ("_operator.add", "torch.add"),
                ("_operator.sub", "torch.sub"),
                ("_operator.mul", "torch.mul"),
                ("_operator.truediv", "torch.div"),
                ("_operator.floordiv", "torch.floor_divide"),
                ("_operator.mod", "torch.remainder"),
                ("_operator.pow", "torch.pow"),
                ("_operator.matmul", "torch.matmul"),
                ("_operator.neg", "torch.neg"),
                ("_operator.abs", "torch.abs"),
                ("_operator.invert", "torch.bitwise_not"),
                ("_operator.and_", "torch.bitwise_and"),
                ("_operator.or_", "torch.bitwise_or"),
                ("_operator.xor", "torch.bitwise_xor"),
                ("_operator.eq", "torch.eq"),
                ("_operator.ne", "torch.ne"),
                ("_operator.lt", "torch.lt"),
                ("_operator.le", "torch.le"),
                ("_operator.gt", "torch.gt"),
                ("_operator.ge", "torch.ge"),
            ]),
            elementwise_binary_ops: functions(&["torch.add", "torch.sub", "torch.mul", "torch.div"]),
            display_names: FxHashMap::default(),
        }
    }
}

impl RewriteConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Loads the file named by [`CONFIG_ENV`], or the defaults if it is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                log::info!("loading rewrite configuration from {path:?}");
                Self::from_path(path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_method(mut self, method: impl Into<String>, function: impl Into<String>) -> Self {
        self.normalize_methods
            .insert(method.into(), FunctionId::new(function));
        self
    }

    pub fn with_opaque_module(mut self, class_name: impl Into<String>) -> Self {
        self.dont_expand_modules.insert(class_name.into());
        self
    }

    pub fn with_never_inplace(mut self, function: impl Into<String>) -> Self {
        self.never_inplace.insert(FunctionId::new(function));
        self
    }

    pub fn with_inplace_op(mut self, function: impl Into<String>) -> Self {
        self.inplace_ops.insert(FunctionId::new(function));
        self
    }

    /// View and maybe-view ops together.
    pub fn is_view_op(&self, name: &str) -> bool {
        self.view_ops.contains(name) || self.maybe_view_ops.contains(name)
    }

    pub fn is_never_inplace(&self, function: &FunctionId) -> bool {
        self.never_inplace.contains(function)
            || self.never_inplace_modules.contains(function.module())
    }
}

// list taken from https://pytorch.org/docs/stable/tensor_view.html
const VIEW_OPS: &[&str] = &[
    "getitem",
    "as_strided",
    "detach",
    "diagonal",
    "expand",
    "expand_as",
    "movedim",
    "narrow",
    "permute",
    "select",
    "squeeze",
    "transpose",
    "t",
    "T",
    "real",
    "imag",
    "view_as_real",
    "view_as_imag",
    "unflatten",
    "unfold",
    "unsqueeze",
    "view",
    "view_as",
    "unbind",
    "split",
    "split_with_sizes",
    "swapaxes",
    "swapdims",
    "chunk",
    "indices",
    "values",
];

fn default_normalize_methods() -> FxHashMap<String, FunctionId> {
    [
        ("add_", "_operator.iadd"),
        ("all", "torch.all"),
        ("chunk", "torch.chunk"),
        ("clamp", "torch.clamp"),
        ("clone", "torch.clone"),
        ("exp", "torch.exp"),
        ("flatten", "torch.flatten"),
        ("flip", "torch.flip"),
        ("log_softmax", "torch.nn.functional.log_softmax"),
        ("max", "torch.max"),
        ("mean", "torch.mean"),
        ("mul_", "_operator.imul"),
        ("narrow", "torch.narrow"),
        ("nonzero", "torch.nonzero"),
        ("numel", "torch.numel"),
        ("pow", "torch.pow"),
        ("rsqrt", "torch.rsqrt"),
        ("sigmoid", "torch.sigmoid"),
        ("softmax", "torch.nn.functional.softmax"),
        ("sort", "torch.sort"),
        ("squeeze", "torch.squeeze"),
        ("std", "torch.std"),
        ("sum", "torch.sum"),
        ("transpose", "torch.transpose"),
        ("tril", "torch.tril"),
        ("unsqueeze", "torch.unsqueeze"),
    ]
    .into_iter()
    .map(|(method, function)| (method.to_string(), FunctionId::new(function)))
    .collect()
}

fn strings(items: &[&str]) -> FxHashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn functions(items: &[&str]) -> FxHashSet<FunctionId> {
    items.iter().map(|&s| FunctionId::new(s)).collect()
}

fn pairs(items: &[(&str, &str)]) -> FxHashMap<FunctionId, FunctionId> {
    items
        .iter()
        .map(|&(from, to)| (FunctionId::new(from), FunctionId::new(to)))
        .collect()
}
