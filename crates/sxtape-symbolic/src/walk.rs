//! Graph traversal
//!
//! The graph is never materialised; it is whatever is reachable from a set
//! of roots. All walks use an explicit stack so depth is bounded by heap,
//! not by the call stack.

use crate::expr::{NodeId, SxElem, SxExprKind};
use crate::{Result, SymbolicError};
use std::collections::{HashMap, HashSet};

/// Every node reachable from `roots`, each exactly once, operands before
/// the nodes that use them. Roots are explored in order and operand 0
/// before operand 1, so the result depends only on graph structure.
pub fn postorder(roots: &[SxElem]) -> Vec<SxElem> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<(SxElem, usize)> = Vec::new();

    for root in roots {
        if !visited.insert(root.id()) {
            continue;
        }
        stack.push((root.clone(), 0));
        loop {
            let Some(top) = stack.last_mut() else {
                break;
            };
            if let Some(dep) = top.0.dep(top.1).cloned() {
                top.1 += 1;
                if visited.insert(dep.id()) {
                    stack.push((dep, 0));
                }
            } else if let Some((node, _)) = stack.pop() {
                order.push(node);
            }
        }
    }
    order
}

/// Number of distinct nodes reachable from `roots`
pub fn count_nodes(roots: &[SxElem]) -> usize {
    postorder(roots).len()
}

/// Symbolic primitives reachable from `roots`, in discovery order
pub fn symvar(roots: &[SxElem]) -> Vec<SxElem> {
    postorder(roots)
        .into_iter()
        .filter(SxElem::is_symbolic)
        .collect()
}

/// Check whether any node reachable from `roots` is `target`
pub fn depends_on(roots: &[SxElem], target: &SxElem) -> bool {
    postorder(roots).iter().any(|n| n.is_equal(target))
}

/// Evaluate `outputs` directly on the graph, without compiling a tape.
/// Every symbol reached must appear in `bindings`.
pub fn treewalk_eval(outputs: &[SxElem], bindings: &[(SxElem, f64)]) -> Result<Vec<f64>> {
    let mut values: HashMap<NodeId, f64> = bindings.iter().map(|(s, v)| (s.id(), *v)).collect();
    for node in postorder(outputs) {
        let v = match node.kind() {
            SxExprKind::Symbolic(name) => match values.get(&node.id()) {
                Some(v) => *v,
                None => return Err(SymbolicError::UnboundSymbol(name.clone())),
            },
            SxExprKind::Constant(v) => *v,
            SxExprKind::Unary(op, x) => {
                let a = values[&x.id()];
                op.eval(a, a)
            }
            SxExprKind::Binary(op, x, y) => op.eval(values[&x.id()], values[&y.id()]),
        };
        values.insert(node.id(), v);
    }
    Ok(outputs.iter().map(|o| values[&o.id()]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Op;

    #[test]
    fn postorder_visits_shared_nodes_once() {
        let x = SxElem::sym("x");
        let s = SxElem::unary(Op::Sin, &x);
        let e = SxElem::binary(Op::Add, &SxElem::binary(Op::Mul, &s, &x), &s);
        let order = postorder(&[e.clone()]);
        assert_eq!(order.len(), 4);
        assert!(order.last().map(|n| n.is_equal(&e)).unwrap_or(false));
        let pos = |n: &SxElem| order.iter().position(|m| m.is_equal(n));
        assert!(pos(&x) < pos(&s));
    }

    #[test]
    fn treewalk_reports_unbound_symbols() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let e = SxElem::binary(Op::Sub, &x, &y);
        let err = treewalk_eval(&[e.clone()], &[(x.clone(), 1.0)]).unwrap_err();
        assert!(matches!(err, SymbolicError::UnboundSymbol(name) if name == "y"));
        let v = treewalk_eval(&[e], &[(x, 1.0), (y, 4.0)]).unwrap();
        assert_eq!(v, vec![-3.0]);
    }

    #[test]
    fn symvar_and_dependency() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let e = SxElem::binary(Op::Atan2, &y, &x);
        let vars = symvar(&[e.clone()]);
        assert_eq!(vars.len(), 2);
        assert!(vars[0].is_equal(&y));
        assert!(depends_on(&[e.clone()], &x));
        assert!(!depends_on(&[e], &SxElem::sym("z")));
    }
}
