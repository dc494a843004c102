//! Submodules referenced by `CallModule` nodes and the module that owns a graph.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::ir::{Graph, Node};

/// Validates a traced input of a module; returning `false` aborts tracing.
pub type InputCheck = Rc<dyn Fn(&Node) -> bool>;

/// What a module does when called.
#[derive(Debug, Clone)]
pub enum ModuleBody {
    /// A recorded graph whose `GetAttr` targets are relative to the module
    /// and whose `CallModule` targets name the module's children.
    Traced(Graph),
    /// An opaque callable; it can only be called, never traced.
    Opaque,
}

/// A named sub-computation.
pub struct Module {
    class_name: String,
    class_path: String,
    body: ModuleBody,
    children: BTreeMap<String, Rc<Module>>,
    input_check: Option<InputCheck>,
    check_override: RefCell<Option<InputCheck>>,
}

impl Module {
    pub fn traced(class_name: impl Into<String>, body: Graph) -> Self {
        Self::with_body(class_name, ModuleBody::Traced(body))
    }

    pub fn opaque(class_name: impl Into<String>) -> Self {
        Self::with_body(class_name, ModuleBody::Opaque)
    }

    fn with_body(class_name: impl Into<String>, body: ModuleBody) -> Self {
        Module {
            class_name: class_name.into(),
            class_path: String::new(),
            body,
            children: BTreeMap::new(),
            input_check: None,
            check_override: RefCell::new(None),
        }
    }

    /// Sets the dotted path of the defining package, used in long names.
    pub fn with_class_path(mut self, path: impl Into<String>) -> Self {
        self.class_path = path.into();
        self
    }

    pub fn with_child(mut self, name: impl Into<String>, child: Module) -> Self {
        self.children.insert(name.into(), Rc::new(child));
        self
    }

    /// Installs the class-level input check consulted while tracing.
    pub fn with_input_check(mut self, check: impl Fn(&Node) -> bool + 'static) -> Self {
        self.input_check = Some(Rc::new(check));
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// `package.Class`, or just `Class` when no package path is known.
    pub fn qualified_class(&self) -> String {
        if self.class_path.is_empty() {
            self.class_name.clone()
        } else {
            format!("{}.{}", self.class_path, self.class_name)
        }
    }

    pub fn body(&self) -> &ModuleBody {
        &self.body
    }

    pub fn child(&self, name: &str) -> Option<&Rc<Module>> {
        self.children.get(name)
    }

    /// Resolves a dotted child path such as `layers.0`.
    pub fn descendant(&self, path: &str) -> Option<&Rc<Module>> {
        let mut segments = path.split('.');
        let mut module = self.child(segments.next()?)?;
        for segment in segments {
            module = module.child(segment)?;
        }
        Some(module)
    }

    /// Runs the instance override if one is installed, else the class-level check.
    pub fn check_input(&self, node: &Node) -> bool {
        if let Some(check) = self.check_override.borrow().as_ref() {
            return check(node);
        }
        self.input_check.as_ref().map_or(true, |check| check(node))
    }

    pub fn has_check_override(&self) -> bool {
        self.check_override.borrow().is_some()
    }

    /// Replaces the input check with one that accepts everything until the
    /// returned guard is dropped.
    pub fn override_input_check(&self) -> Result<InputCheckOverride<'_>> {
        let mut slot = self.check_override.borrow_mut();
        if slot.is_some() {
            return Err(Error::CheckAlreadyOverridden(self.class_name.clone()));
        }
        *slot = Some(Rc::new(|_: &Node| true));
        Ok(InputCheckOverride { module: self })
    }

    /// Runs `f` with the input check disabled; the check is restored on every
    /// exit path, including errors and panics inside `f`.
    pub fn with_input_check_disabled<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let _guard = self.override_input_check()?;
        f()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("class", &self.qualified_class())
            .field("body", &self.body)
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("input_check", &self.input_check.is_some())
            .field("check_override", &self.has_check_override())
            .finish()
    }
}

/// Scoped override of a module's input check. Dropping it restores the check.
pub struct InputCheckOverride<'a> {
    module: &'a Module,
}

impl Drop for InputCheckOverride<'_> {
    fn drop(&mut self) {
        self.module.check_override.borrow_mut().take();
    }
}

/// A graph together with the submodules its `CallModule` nodes refer to.
#[derive(Debug, Clone, Default)]
pub struct GraphModule {
    pub graph: Graph,
    modules: BTreeMap<String, Rc<Module>>,
}

impl GraphModule {
    pub fn new(graph: Graph) -> Self {
        GraphModule {
            graph,
            modules: BTreeMap::new(),
        }
    }

    pub fn with_module(mut self, name: impl Into<String>, module: Module) -> Self {
        self.modules.insert(name.into(), Rc::new(module));
        self
    }

    /// Resolves a dotted path such as `encoder.layer0.norm`.
    pub fn get_submodule(&self, path: &str) -> Result<&Rc<Module>> {
        let unknown = || Error::UnknownModule(path.to_string());
        let (first, rest) = match path.split_once('.') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };
        let module = self.modules.get(first).ok_or_else(unknown)?;
        match rest {
            Some(rest) => module.descendant(rest).ok_or_else(unknown),
            None => Ok(module),
        }
    }
}
