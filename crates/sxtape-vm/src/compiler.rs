//! Expression graph to tape compiler
//!
//! Compilation runs in three passes:
//!
//! 1. Linearize the graph reachable from the outputs into a postorder list
//!    (declared outputs in order, operand 0 first)
//! 2. Lay out the tape: loads for every reachable input in declared order,
//!    then the computations, then one store per output element
//! 3. Assign work slots, releasing an operand's slot at its last use so
//!    the result of the same operation may take it over
//!
//! Nothing here iterates a hash map, so the tape is a pure function of the
//! graph structure and the options.

use crate::algorithm::Algorithm;
use crate::atomic::ScalarAtomic;
use crate::CompileError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use sxtape_symbolic::{NodeId, Op, SxElem, SxExprKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Emit each distinct node once. When off, a shared subexpression is
    /// recomputed at every use; inputs are still loaded once.
    pub cse: bool,
    /// Reuse a work slot once the value in it is dead
    pub live_variables: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            cse: true,
            live_variables: true,
        }
    }
}

struct Emit {
    node: SxElem,
    deps: [usize; 2],
}

struct Frame {
    node: SxElem,
    next: usize,
    deps: [usize; 2],
}

/// Postorder over the roots. With `cse` every node is emitted once,
/// otherwise only symbols are.
fn linearize(roots: &[SxElem], cse: bool) -> (Vec<Emit>, Vec<usize>) {
    let shared = |n: &SxElem| cse || n.is_symbolic();
    let mut emits: Vec<Emit> = Vec::new();
    let mut memo: HashMap<NodeId, usize> = HashMap::new();
    let mut root_index = Vec::with_capacity(roots.len());

    for root in roots {
        if shared(root) {
            if let Some(&k) = memo.get(&root.id()) {
                root_index.push(k);
                continue;
            }
        }
        let mut stack = vec![Frame {
            node: root.clone(),
            next: 0,
            deps: [0; 2],
        }];
        while let Some(top) = stack.last_mut() {
            if let Some(dep) = top.node.dep(top.next) {
                let hit = if shared(dep) {
                    memo.get(&dep.id()).copied()
                } else {
                    None
                };
                match hit {
                    Some(k) => {
                        top.deps[top.next] = k;
                        top.next += 1;
                    }
                    None => {
                        let node = dep.clone();
                        stack.push(Frame {
                            node,
                            next: 0,
                            deps: [0; 2],
                        });
                    }
                }
                continue;
            }

            let Some(done) = stack.pop() else {
                break;
            };
            let k = emits.len();
            if shared(&done.node) {
                memo.insert(done.node.id(), k);
            }
            emits.push(Emit {
                node: done.node,
                deps: done.deps,
            });
            match stack.last_mut() {
                Some(parent) => {
                    parent.deps[parent.next] = k;
                    parent.next += 1;
                }
                None => root_index.push(k),
            }
        }
    }
    (emits, root_index)
}

enum Entry {
    Load {
        emit: usize,
        input: u32,
        element: u32,
    },
    Const {
        emit: usize,
        value: f64,
    },
    Apply {
        emit: usize,
        op: Op,
        x: usize,
        y: usize,
    },
    Store {
        output: u32,
        element: u32,
        emit: usize,
    },
}

fn alloc(free: &mut Vec<u32>, n_slots: &mut u32) -> u32 {
    free.pop().unwrap_or_else(|| {
        *n_slots += 1;
        *n_slots - 1
    })
}

/// Compile `outputs` as functions of `inputs`.
///
/// Every input element must be a distinct symbolic primitive, and every
/// symbol reachable from the outputs must be one of them.
pub fn compile(
    inputs: &[Vec<SxElem>],
    outputs: &[Vec<SxElem>],
    options: &CompileOptions,
) -> Result<Algorithm, CompileError> {
    let _span = tracing::debug_span!(
        "sxtape.compile",
        n_in = inputs.len(),
        n_out = outputs.len(),
        cse = options.cse
    )
    .entered();

    let mut declared: HashMap<NodeId, (u32, u32)> = HashMap::new();
    for (i, input) in inputs.iter().enumerate() {
        for (e, s) in input.iter().enumerate() {
            let Some(name) = s.name() else {
                return Err(CompileError::NotSymbolic {
                    input: i,
                    element: e,
                    op: s.op(),
                    node: s.id(),
                });
            };
            if declared.insert(s.id(), (i as u32, e as u32)).is_some() {
                return Err(CompileError::DuplicateInput {
                    name: name.to_string(),
                });
            }
        }
    }

    let roots: Vec<SxElem> = outputs.iter().flatten().cloned().collect();
    let (emits, root_index) = linearize(&roots, options.cse);

    let mut loaded: HashMap<NodeId, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(emits.len() + roots.len());
    let mut body = Vec::with_capacity(emits.len());
    for (k, emit) in emits.iter().enumerate() {
        match emit.node.kind() {
            SxExprKind::Symbolic(name) => {
                if !declared.contains_key(&emit.node.id()) {
                    return Err(CompileError::FreeVariable { name: name.clone() });
                }
                loaded.insert(emit.node.id(), k);
            }
            SxExprKind::Constant(value) => body.push(Entry::Const {
                emit: k,
                value: *value,
            }),
            SxExprKind::Unary(op, _) => body.push(Entry::Apply {
                emit: k,
                op: *op,
                x: emit.deps[0],
                y: emit.deps[0],
            }),
            SxExprKind::Binary(op, _, _) => body.push(Entry::Apply {
                emit: k,
                op: *op,
                x: emit.deps[0],
                y: emit.deps[1],
            }),
        }
    }

    for (i, input) in inputs.iter().enumerate() {
        for (e, s) in input.iter().enumerate() {
            if let Some(&emit) = loaded.get(&s.id()) {
                entries.push(Entry::Load {
                    emit,
                    input: i as u32,
                    element: e as u32,
                });
            }
        }
    }
    entries.extend(body);
    let mut flat = root_index.iter().copied();
    for (o, output) in outputs.iter().enumerate() {
        for e in 0..output.len() {
            if let Some(emit) = flat.next() {
                entries.push(Entry::Store {
                    output: o as u32,
                    element: e as u32,
                    emit,
                });
            }
        }
    }

    let mut last_use = vec![0usize; emits.len()];
    for (pos, entry) in entries.iter().enumerate() {
        match *entry {
            Entry::Apply { x, y, .. } => {
                last_use[x] = pos;
                last_use[y] = pos;
            }
            Entry::Store { emit, .. } => last_use[emit] = pos,
            Entry::Load { .. } | Entry::Const { .. } => {}
        }
    }

    let live = options.live_variables;
    let mut slot = vec![0u32; emits.len()];
    let mut free: Vec<u32> = Vec::new();
    let mut n_slots = 0u32;
    let mut ops = Vec::with_capacity(entries.len());
    for (pos, entry) in entries.iter().enumerate() {
        match *entry {
            Entry::Load {
                emit,
                input,
                element,
            } => {
                let s = alloc(&mut free, &mut n_slots);
                slot[emit] = s;
                ops.push(ScalarAtomic::input(s, input, element));
            }
            Entry::Const { emit, value } => {
                let s = alloc(&mut free, &mut n_slots);
                slot[emit] = s;
                ops.push(ScalarAtomic::constant(s, value));
            }
            Entry::Apply { emit, op, x, y } => {
                let (sx, sy) = (slot[x], slot[y]);
                if live {
                    if last_use[x] == pos {
                        free.push(sx);
                    }
                    if y != x && last_use[y] == pos {
                        free.push(sy);
                    }
                }
                let s = alloc(&mut free, &mut n_slots);
                slot[emit] = s;
                ops.push(if op.arity() == 1 {
                    ScalarAtomic::unary(op, s, sx)
                } else {
                    ScalarAtomic::binary(op, s, sx, sy)
                });
            }
            Entry::Store {
                output,
                element,
                emit,
            } => {
                ops.push(ScalarAtomic::output(output, slot[emit], element));
                if live && last_use[emit] == pos {
                    free.push(slot[emit]);
                }
            }
        }
    }

    let input_sizes = inputs.iter().map(Vec::len).collect();
    let output_sizes = outputs.iter().map(Vec::len).collect();
    match Algorithm::from_atomics(ops, input_sizes, output_sizes) {
        Ok(alg) => {
            log::debug!(
                "compiled {} operations over {} work slots ({} distinct nodes)",
                alg.len(),
                alg.work_size(),
                emits.len()
            );
            Ok(alg)
        }
        Err(err) => panic!("compiler emitted an invalid tape: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sxtape_symbolic::without_simplification;

    fn ops_of(alg: &Algorithm) -> Vec<Op> {
        alg.ops().iter().map(|a| a.op).collect()
    }

    #[test]
    fn identical_graphs_give_identical_tapes() {
        let build = || {
            let x = SxElem::sym("x");
            let y = SxElem::sym("y");
            let f = &x * &y + x.sin();
            compile(&[vec![x, y]], &[vec![f]], &CompileOptions::default()).unwrap()
        };
        assert_eq!(build().to_bytes(), build().to_bytes());
    }

    #[test]
    fn shared_subexpression_is_emitted_once() {
        let x = SxElem::sym("x");
        let s = x.sin();
        let f = without_simplification(|| &s * &s);
        let alg = compile(&[vec![x]], &[vec![f]], &CompileOptions::default()).unwrap();
        let sins = ops_of(&alg).iter().filter(|&&op| op == Op::Sin).count();
        assert_eq!(sins, 1);
        assert_eq!(
            ops_of(&alg),
            vec![Op::Input, Op::Sin, Op::Mul, Op::Output]
        );
        assert_eq!(alg.work_size(), 1);
    }

    #[test]
    fn tree_expansion_recomputes_shared_nodes() {
        let x = SxElem::sym("x");
        let s = x.sin();
        let f = without_simplification(|| &s * &s);
        let options = CompileOptions {
            cse: false,
            live_variables: true,
        };
        let alg = compile(&[vec![x]], &[vec![f]], &options).unwrap();
        assert_eq!(
            ops_of(&alg),
            vec![Op::Input, Op::Sin, Op::Sin, Op::Mul, Op::Output]
        );
        assert_eq!(alg.ops().iter().filter(|a| a.op == Op::Input).count(), 1);
    }

    #[test]
    fn twice_needs_one_slot() {
        let x = SxElem::sym("x");
        let f = &x + &x;
        assert_eq!(f.op(), Op::Twice);
        let alg = compile(&[vec![x]], &[vec![f]], &CompileOptions::default()).unwrap();
        assert_eq!(alg.work_size(), 1);
        assert_eq!(alg.count_nodes(), 1);
    }

    #[test]
    fn live_variables_shrink_the_work_vector() {
        let x = SxElem::sym("x");
        let mut f = x.clone();
        for _ in 0..10 {
            f = f.sin();
        }
        let packed = compile(&[vec![x.clone()]], &[vec![f.clone()]], &CompileOptions::default())
            .unwrap();
        let spread = compile(
            &[vec![x]],
            &[vec![f]],
            &CompileOptions {
                cse: true,
                live_variables: false,
            },
        )
        .unwrap();
        assert_eq!(packed.work_size(), 1);
        assert_eq!(spread.work_size(), 11);
        assert_eq!(packed.len(), spread.len());
    }

    #[test]
    fn loads_follow_declaration_order_and_skip_unused() {
        let [a, b, c] = [SxElem::sym("a"), SxElem::sym("b"), SxElem::sym("c")];
        let f = &c - &a;
        let alg = compile(&[vec![a, b], vec![c]], &[vec![f]], &CompileOptions::default())
            .unwrap();
        let loads: Vec<(u32, u32)> = alg
            .ops()
            .iter()
            .filter(|op| op.op == Op::Input)
            .map(|op| op.slots())
            .collect();
        assert_eq!(loads, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn outputs_may_be_inputs_or_constants() {
        let x = SxElem::sym("x");
        let alg = compile(
            &[vec![x.clone()]],
            &[vec![x, SxElem::constant(4.0)], vec![]],
            &CompileOptions::default(),
        )
        .unwrap();
        assert_eq!(alg.output_sizes(), &[2, 0]);
        assert_eq!(ops_of(&alg), vec![Op::Input, Op::Const, Op::Output, Op::Output]);
    }

    #[test]
    fn rejects_bad_inputs() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let opts = CompileOptions::default();

        let doubled = x.clone() * 2.0;
        let err = compile(&[vec![doubled.clone()]], &[vec![]], &opts).unwrap_err();
        assert_eq!(
            err,
            CompileError::NotSymbolic {
                input: 0,
                element: 0,
                op: doubled.op(),
                node: doubled.id(),
            }
        );

        let err = compile(&[vec![x.clone()], vec![x.clone()]], &[vec![]], &opts).unwrap_err();
        assert_eq!(err, CompileError::DuplicateInput { name: "x".into() });

        let err = compile(&[vec![x.clone()]], &[vec![&x + &y]], &opts).unwrap_err();
        assert_eq!(err, CompileError::FreeVariable { name: "y".into() });
    }

    #[test]
    fn every_read_follows_its_write() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let f = (&x * &y).exp() / (&x - &y).cos() + x.atan2(&y);
        let alg = compile(&[vec![x, y]], &[vec![f]], &CompileOptions::default()).unwrap();
        let revalidated = Algorithm::from_atomics(
            alg.ops().to_vec(),
            alg.input_sizes().to_vec(),
            alg.output_sizes().to_vec(),
        );
        assert_eq!(revalidated, Ok(alg));
    }
}
