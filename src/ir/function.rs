use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualified identity of a callable, e.g. `torch.relu` or `_operator.iadd`.
///
/// Two call targets are the same function exactly when their paths are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(path: impl Into<String>) -> Self {
        FunctionId(path.into())
    }

    /// The full dotted path.
    pub fn path(&self) -> &str {
        &self.0
    }

    /// The last path segment (`relu` for `torch.nn.functional.relu`).
    pub fn name(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, name)| name)
    }

    /// Everything before the last segment, or `""` for a bare name.
    pub fn module(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(module, _)| module)
    }

    pub fn is(&self, path: &str) -> bool {
        self.0 == path
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FunctionId {
    fn from(path: &str) -> Self {
        FunctionId::new(path)
    }
}

/// `builtins.getattr`, which the functionalizer folds for `dtype`/`device`.
pub const GETATTR: &str = "builtins.getattr";
