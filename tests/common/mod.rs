//! Shared helpers for the integration tests: graph builders, a reference
//! interpreter over `f64` vectors, and random program generators.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use harp_rewrite::ir::Kwargs;
use harp_rewrite::prelude::*;
use harp_rewrite::resolver::MetadataResolver;
use proptest::prelude::*;

/// Element count of every tensor the helpers build.
pub const LEN: usize = 4;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tensor() -> NodeMeta {
    NodeMeta::tensor()
        .with_shape(vec![LEN])
        .with_dtype("torch.float32")
        .with_device("cpu")
}

pub fn input(graph: &mut Graph, name: &str) -> NodeId {
    let id = graph.placeholder(name);
    graph.set_meta(id, tensor()).unwrap();
    id
}

pub fn call(
    graph: &mut Graph,
    target: &str,
    args: Vec<Argument>,
    kwargs: Kwargs,
    meta: NodeMeta,
) -> NodeId {
    let id = graph.call_function(FunctionId::new(target), args, kwargs);
    graph.set_meta(id, meta).unwrap();
    id
}

pub fn placeholder_names(graph: &Graph) -> Vec<String> {
    graph
        .placeholders()
        .into_iter()
        .map(|id| graph.node(id).unwrap().name.clone())
        .collect()
}

// --- Reference interpreter ---

type Storage = Rc<RefCell<Vec<f64>>>;

/// A runtime value. Tensors that share storage alias each other.
#[derive(Debug, Clone)]
pub enum Value {
    Tensor(Storage),
    Scalar(f64),
    Tuple(Vec<Value>),
}

impl Value {
    fn tensor(data: Vec<f64>) -> Self {
        Value::Tensor(Rc::new(RefCell::new(data)))
    }

    fn storage(&self) -> &Storage {
        match self {
            Value::Tensor(storage) => storage,
            other => panic!("expected a tensor, got {other:?}"),
        }
    }

    fn flatten(&self, into: &mut Vec<Vec<f64>>) {
        match self {
            Value::Tensor(storage) => into.push(storage.borrow().clone()),
            Value::Scalar(x) => into.push(vec![*x]),
            Value::Tuple(items) => items.iter().for_each(|item| item.flatten(into)),
        }
    }
}

fn unary(name: &str) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match name {
        "exp" => f64::exp,
        "tanh" => f64::tanh,
        "neg" => |x| -x,
        "relu" => |x| x.max(0.0),
        "sigmoid" => |x| 1.0 / (1.0 + (-x).exp()),
        _ => return None,
    };
    Some(f)
}

fn binary(name: &str) -> Option<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match name {
        "add" => |a, b| a + b,
        "sub" => |a, b| a - b,
        "mul" => |a, b| a * b,
        "div" | "truediv" => |a, b| a / b,
        _ => return None,
    };
    Some(f)
}

/// Writes `data` into the buffer the call targets, if any, and returns the result.
fn store(data: Vec<f64>, inplace_into: Option<&Value>) -> Value {
    match inplace_into {
        Some(target) => {
            *target.storage().borrow_mut() = data;
            target.clone()
        }
        None => Value::tensor(data),
    }
}

fn eval_call(target: &FunctionId, args: &[Value], kwargs: &HashMap<String, Value>, inplace: bool) -> Value {
    let (module, name) = (target.module(), target.name());
    let out = kwargs.get("out");

    if target.is("torch.detach") {
        return args[0].clone();
    }

    // `relu_`, `iadd` and friends write into their first argument
    let (base, mutates_first) = if module == "_operator" && name.starts_with('i') && binary(&name[1..]).is_some() {
        (&name[1..], true)
    } else if let Some(base) = name.strip_suffix('_') {
        (base, true)
    } else {
        (name, inplace)
    };
    let into = if mutates_first { Some(&args[0]) } else { out };

    if let Some(f) = unary(base) {
        let data = args[0].storage().borrow().iter().map(|&x| f(x)).collect();
        return store(data, into);
    }
    if let Some(f) = binary(base) {
        let a = args[0].storage().borrow().clone();
        let data = match &args[1] {
            Value::Tensor(b) => a.iter().zip(b.borrow().iter()).map(|(&x, &y)| f(x, y)).collect(),
            Value::Scalar(y) => a.iter().map(|&x| f(x, *y)).collect(),
            other => panic!("bad operand {other:?}"),
        };
        return store(data, into);
    }
    panic!("the reference interpreter does not know {target}")
}

fn eval_arg(arg: &Argument, env: &HashMap<NodeId, Value>) -> Value {
    match arg {
        Argument::Node(id) => env[id].clone(),
        Argument::Literal(Literal::Float(x)) => Value::Scalar(*x),
        Argument::Literal(Literal::Int(x)) => Value::Scalar(*x as f64),
        Argument::Literal(other) => panic!("unsupported literal {other}"),
        Argument::Tuple(items) => Value::Tuple(items.iter().map(|item| eval_arg(item, env)).collect()),
    }
}

/// Runs `graph` on copies of `inputs` and returns every output tensor.
pub fn evaluate(graph: &Graph, inputs: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let mut env = HashMap::new();
    let mut next_input = inputs.iter();
    for (id, node) in graph.iter() {
        let value = match &node.op {
            Op::Placeholder => Value::tensor(next_input.next().expect("missing input").clone()),
            Op::CallFunction(target) => {
                let args: Vec<_> = node.args.iter().map(|arg| eval_arg(arg, &env)).collect();
                let inplace = node.kwargs.get("inplace").and_then(Argument::as_bool) == Some(true);
                let kwargs = node
                    .kwargs
                    .iter()
                    .filter(|(key, _)| key.as_str() != "inplace")
                    .map(|(key, arg)| (key.clone(), eval_arg(arg, &env)))
                    .collect();
                eval_call(target, &args, &kwargs, inplace)
            }
            Op::Output => {
                let mut outputs = Vec::new();
                eval_arg(&node.args[0], &env).flatten(&mut outputs);
                return outputs;
            }
            other => panic!("the reference interpreter does not run {}", other.opcode()),
        };
        env.insert(id, value);
    }
    panic!("graph has no output")
}

pub fn sample_inputs(count: usize, seed: u64) -> Vec<Vec<f64>> {
    (0..count)
        .map(|i| {
            (0..LEN)
                .map(|j| ((seed as f64) * 0.37 + (i * LEN + j) as f64 * 0.61).sin() * 3.0)
                .collect()
        })
        .collect()
}

// --- Random programs ---

/// One step of a generated program. Operands index into the values built so
/// far, modulo their count.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Unary(&'static str, usize),
    Binary(&'static str, usize, usize),
    Relu(usize),
    Detach(usize),
    ScalarDivision(usize),
    ReluInPlace(usize),
    ReluFlagged(usize),
    AddInPlace(usize, usize),
}

fn pure_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (prop::sample::select(vec!["torch.exp", "torch.sigmoid", "torch.tanh", "torch.neg"]), any::<usize>())
            .prop_map(|(f, a)| Step::Unary(f, a)),
        (prop::sample::select(vec!["torch.add", "torch.mul", "torch.sub"]), any::<usize>(), any::<usize>())
            .prop_map(|(f, a, b)| Step::Binary(f, a, b)),
        any::<usize>().prop_map(Step::Relu),
        any::<usize>().prop_map(Step::ScalarDivision),
    ]
}

/// Pure programs, including views.
pub fn pure_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![4 => pure_step(), 1 => any::<usize>().prop_map(Step::Detach)],
        1..14,
    )
}

fn mutating_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<usize>().prop_map(Step::ReluInPlace),
        any::<usize>().prop_map(Step::ReluFlagged),
        (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Step::AddInPlace(a, b)),
    ]
}

/// Programs with in-place mutation and no views.
pub fn mutating_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(prop_oneof![3 => pure_step(), 1 => mutating_step()], 1..14)
}

/// Everything the inplacifier may meet: pure calls, views, and calls that
/// already mutate, possibly through a view.
pub fn mixed_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            4 => pure_step(),
            1 => any::<usize>().prop_map(Step::Detach),
            2 => mutating_step(),
        ],
        1..16,
    )
}

/// Builds a program over `inputs` placeholders.
///
/// In-place steps mutate their operand and their result is never reused, so
/// the only alias of a mutated value is the value itself. With `output_all`
/// every value is returned, otherwise only the last one.
pub fn build_program(inputs: usize, steps: &[Step], output_all: bool) -> Graph {
    let mut graph = Graph::new();
    let mut values: Vec<NodeId> = (0..inputs).map(|i| input(&mut graph, &format!("x{i}"))).collect();
    let placeholders = values.clone();

    for step in steps {
        let pick = |i: usize| values[i % values.len()];
        let mutation = |target: NodeId| {
            if placeholders.contains(&target) {
                tensor().mutating_input()
            } else {
                tensor().mutating()
            }
        };
        match *step {
            Step::Unary(f, a) => {
                let id = call(&mut graph, f, vec![pick(a).into()], Kwargs::new(), tensor());
                values.push(id);
            }
            Step::Binary(f, a, b) => {
                let id = call(&mut graph, f, vec![pick(a).into(), pick(b).into()], Kwargs::new(), tensor());
                values.push(id);
            }
            Step::Relu(a) => {
                let id = call(
                    &mut graph,
                    "torch.nn.functional.relu",
                    vec![pick(a).into()],
                    kwargs!("inplace" => false),
                    tensor(),
                );
                values.push(id);
            }
            Step::Detach(a) => {
                let id = call(&mut graph, "torch.detach", vec![pick(a).into()], Kwargs::new(), tensor());
                values.push(id);
            }
            Step::ScalarDivision(a) => {
                let id = call(
                    &mut graph,
                    "_operator.truediv",
                    vec![pick(a).into(), 2.0.into()],
                    Kwargs::new(),
                    tensor(),
                );
                values.push(id);
            }
            Step::ReluInPlace(a) => {
                let target = pick(a);
                call(&mut graph, "torch.relu_", vec![target.into()], Kwargs::new(), mutation(target));
            }
            Step::ReluFlagged(a) => {
                let target = pick(a);
                call(
                    &mut graph,
                    "torch.nn.functional.relu",
                    vec![target.into()],
                    kwargs!("inplace" => true),
                    mutation(target),
                );
            }
            Step::AddInPlace(a, b) => {
                let target = pick(a);
                let meta = mutation(target);
                call(&mut graph, "_operator.iadd", vec![target.into(), pick(b).into()], Kwargs::new(), meta);
            }
        }
    }

    let result = if output_all {
        Argument::from(values)
    } else {
        Argument::Node(values[values.len() - 1])
    };
    graph.output(result);
    graph
}

// --- Buffer liveness ---

/// Checks that no write the inplacifier introduced makes a later read stale.
///
/// `after` is the rewritten form of `before`, node for node. A node writes
/// into a buffer when it did not before the rewrite (`inplace=True` or
/// `out=` added). Every node preceding that write and aliasing the buffer
/// holds the old value, so no node after the write may read one of them.
/// Returns the first violating pair of node names.
pub fn find_stale_read(before: &Graph, after: &Graph, config: &RewriteConfig) -> Option<(String, String)> {
    let original = GraphModule::new(before.clone());
    let rewritten = GraphModule::new(after.clone());
    let was_writing = MetadataResolver::new(&original, config);
    let resolver = MetadataResolver::new(&rewritten, config);
    let order: Vec<NodeId> = after.node_ids();
    let old_order: Vec<NodeId> = before.node_ids();
    assert_eq!(order.len(), old_order.len(), "rewrite changed the node count");

    let mut buffer: HashMap<NodeId, usize> = HashMap::new();
    for (i, &id) in order.iter().enumerate() {
        let node = after.node(id).unwrap();
        let view_of = match &node.op {
            Op::CallFunction(f) if config.is_view_op(f.name()) => {
                node.args.first().and_then(Argument::as_node)
            }
            _ => None,
        };
        let alias = resolver
            .mutated_argument(node)
            .or(view_of)
            .and_then(|a| buffer.get(&a).copied());
        buffer.insert(id, alias.unwrap_or(i));
    }

    for (i, &id) in order.iter().enumerate() {
        let node = after.node(id).unwrap();
        let old = before.node(old_order[i]).unwrap();
        if was_writing.mutated_argument(old).is_some() {
            continue;
        }
        let Some(written) = resolver.mutated_argument(node) else {
            continue;
        };
        let target = buffer[&written];
        let stale: Vec<NodeId> = order[..i]
            .iter()
            .copied()
            .filter(|n| buffer[n] == target)
            .collect();
        for &reader in &order[i + 1..] {
            let reader_node = after.node(reader).unwrap();
            if reader_node.inputs().iter().any(|input| stale.contains(input)) {
                return Some((node.name.clone(), reader_node.name.clone()));
            }
        }
    }
    None
}
