//! Splices a submodule's computation into a parent graph.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::ir::{Argument, Graph, Kwargs, NodeId, Op};
use crate::module::Module;
use crate::trace::{trace, InliningTracer};

/// Expands a call to `module` into `graph` at the current insertion point and
/// returns the value the call produced.
///
/// The module is re-traced with [`InliningTracer`], so nested modules are
/// flattened as well. `GetAttr` nodes are re-targeted to `prefix` + their
/// attribute path. Only positional call sites are supported.
///
/// The module's input check is disabled for the duration of the expansion.
/// Checks of nested children stay in force, so a child that rejects a traced
/// input fails the whole expansion.
pub fn expand_module_call(
    prefix: &str,
    graph: &mut Graph,
    module: &Module,
    args: &[Argument],
    kwargs: &Kwargs,
) -> Result<Argument> {
    module
        .with_input_check_disabled(|| splice(prefix, graph, module, args, kwargs))
        .map_err(|err| {
            log::error!("Error while expanding {}", module.class_name());
            Error::Inline {
                class: module.class_name().to_string(),
                source: Box::new(err),
            }
        })
}

fn splice(
    prefix: &str,
    graph: &mut Graph,
    module: &Module,
    args: &[Argument],
    kwargs: &Kwargs,
) -> Result<Argument> {
    if !kwargs.is_empty() {
        return Err(Error::KeywordArgumentsToInline(
            module.class_name().to_string(),
        ));
    }

    let traced = trace(&InliningTracer, module)?;
    let mut inputs = args.iter();
    let mut vars: FxHashMap<NodeId, Argument> = FxHashMap::default();
    let lookup = |vars: &FxHashMap<NodeId, Argument>, id: NodeId| {
        vars.get(&id).cloned().ok_or(Error::UnknownNode(id))
    };

    for (id, node) in traced.iter() {
        match &node.op {
            Op::Placeholder => {
                let arg = inputs.next().ok_or_else(|| Error::ArityMismatch {
                    class: module.class_name().to_string(),
                    expected: traced.placeholders().len(),
                    got: args.len(),
                })?;
                vars.insert(id, arg.clone());
            }
            Op::Output => {
                let result = node.args.first().ok_or(Error::MissingOutput)?;
                return result.try_map_nodes(&mut |arg| lookup(&vars, arg));
            }
            Op::GetAttr(target) => {
                let attr = graph.get_attr(format!("{prefix}{target}"));
                graph.node_mut(attr)?.meta = node.meta.clone();
                vars.insert(id, Argument::Node(attr));
            }
            Op::CallFunction(_) | Op::CallMethod(_) | Op::CallModule(_) => {
                let copied = graph.node_copy(node, |arg| lookup(&vars, arg))?;
                log::trace!("inlined {} as {}", node.name, graph.node(copied)?.name);
                vars.insert(id, Argument::Node(copied));
            }
        }
    }
    Err(Error::NoOutputInTrace(module.class_name().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, NodeMeta};
    use crate::kwargs;

    fn batch_norm() -> Module {
        let mut body = Graph::new();
        let x = body.placeholder("input");
        let mean = body.get_attr("running_mean");
        let var = body.get_attr("running_var");
        let y = body.call_function(
            FunctionId::new("torch.nn.functional.batch_norm"),
            vec![x.into(), mean.into(), var.into()],
            kwargs!(),
        );
        body.set_meta(y, NodeMeta::tensor()).unwrap();
        body.output(y.into());
        // rejects symbolic inputs, as a shape check against a traced input would
        Module::traced("BatchNorm2d", body).with_input_check(|_| false)
    }

    fn parent() -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new();
        let x = graph.placeholder("x");
        let call = graph.call_module("bn", vec![x.into()], kwargs!());
        graph.output(call.into());
        (graph, x, call)
    }

    #[test]
    fn test_expand_splices_before_call_site() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mut graph, x, call) = parent();
        let module = batch_norm();
        let result = graph
            .inserting_before(call, |g| {
                expand_module_call("bn.", g, &module, &[x.into()], &kwargs!())
            })
            .unwrap();

        let id = result.as_node().unwrap();
        let node = graph.node(id).unwrap();
        assert_eq!(node.args[0], Argument::Node(x));
        let attrs: Vec<_> = graph
            .iter()
            .filter_map(|(_, n)| match &n.op {
                Op::GetAttr(target) => Some(target.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(attrs, vec!["bn.running_mean", "bn.running_var"]);
        assert!(graph.position(id).unwrap() < graph.position(call).unwrap());
        assert!(!module.has_check_override());
    }

    #[test]
    fn test_keyword_arguments_are_rejected() {
        let (mut graph, x, _) = parent();
        let module = batch_norm();
        let err = expand_module_call("bn.", &mut graph, &module, &[], &kwargs!("input" => x))
            .unwrap_err();
        match err {
            Error::Inline { class, source } => {
                assert_eq!(class, "BatchNorm2d");
                assert!(matches!(*source, Error::KeywordArgumentsToInline(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!module.has_check_override());
    }

    #[test]
    fn test_missing_argument_is_reported() {
        let (mut graph, _, _) = parent();
        let module = batch_norm();
        let err = expand_module_call("bn.", &mut graph, &module, &[], &kwargs!()).unwrap_err();
        assert!(matches!(err, Error::Inline { .. }));
        assert!(!module.has_check_override());
    }

    #[test]
    fn test_nested_input_check_still_applies() {
        let mut body = Graph::new();
        let x = body.placeholder("x");
        let y = body.call_module("bn", vec![x.into()], kwargs!());
        body.output(y.into());
        let block = Module::traced("Block", body)
            .with_child("bn", batch_norm())
            .with_input_check(|_| false);
        let mut graph = Graph::new();
        let x = graph.placeholder("x");

        let err = expand_module_call("block.", &mut graph, &block, &[x.into()], &kwargs!())
            .unwrap_err();

        match err {
            Error::Inline { class, source } => {
                assert_eq!(class, "Block");
                assert!(matches!(*source, Error::InputRejected(ref c) if c == "BatchNorm2d"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!block.has_check_override());
    }
}
