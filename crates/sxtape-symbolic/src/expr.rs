//! Scalar expression nodes
//!
//! An [`SxElem`] is a reference-counted handle to an immutable node in an
//! expression DAG. Nodes other than symbolic primitives are hash-consed
//! through a per-thread intern table, so building the same operation on the
//! same operands twice yields the same node. Handles are `!Send`: a graph
//! and its intern table never leave the thread that built them.

use crate::ops::Op;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique node identifier. Operands always have smaller ids than
/// the nodes built on top of them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Intern table entries below this count are never pruned
const MIN_PRUNE_THRESHOLD: usize = 1024;

/// Node payload
#[derive(Debug)]
pub enum SxExprKind {
    /// Named symbolic primitive (never unified with another symbol)
    Symbolic(String),
    /// Numeric literal
    Constant(f64),
    Unary(Op, SxElem),
    Binary(Op, SxElem, SxElem),
}

#[derive(Debug)]
struct Node {
    id: NodeId,
    kind: SxExprKind,
}

impl Node {
    fn release_operands(&mut self, pending: &mut Vec<Rc<Node>>) {
        match std::mem::replace(&mut self.kind, SxExprKind::Constant(0.0)) {
            SxExprKind::Unary(_, x) => pending.push(x.0),
            SxExprKind::Binary(_, x, y) => {
                pending.push(x.0);
                pending.push(y.0);
            }
            SxExprKind::Symbolic(_) | SxExprKind::Constant(_) => {}
        }
    }
}

impl Drop for Node {
    // Long chains would otherwise recurse once per level
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_operands(&mut pending);
        while let Some(rc) = pending.pop() {
            if let Ok(mut node) = Rc::try_unwrap(rc) {
                node.release_operands(&mut pending);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InternKey {
    Constant(u64),
    Unary(Op, NodeId),
    Binary(Op, NodeId, NodeId),
}

struct Interner {
    table: HashMap<InternKey, Weak<Node>>,
    prune_at: usize,
}

impl Interner {
    fn new() -> Self {
        Interner {
            table: HashMap::new(),
            prune_at: MIN_PRUNE_THRESHOLD,
        }
    }

    fn lookup(&self, key: &InternKey) -> Option<SxElem> {
        self.table.get(key).and_then(Weak::upgrade).map(SxElem)
    }

    fn insert(&mut self, key: InternKey, node: &SxElem) {
        self.table.insert(key, Rc::downgrade(&node.0));
        if self.table.len() >= self.prune_at {
            let before = self.table.len();
            self.table.retain(|_, w| w.strong_count() > 0);
            self.prune_at = (self.table.len() * 2).max(MIN_PRUNE_THRESHOLD);
            log::trace!(
                "intern table pruned: {} -> {} entries",
                before,
                self.table.len()
            );
        }
    }
}

thread_local! {
    static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
    static SIMPLIFY: Cell<bool> = const { Cell::new(true) };
}

/// Number of live entries in this thread's intern table
pub fn interned_count() -> usize {
    INTERNER.with(|cell| {
        cell.borrow()
            .table
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    })
}

/// Run `f` with construction-time canonicalisation switched off on this
/// thread. Hash-consing stays active.
pub fn without_simplification<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);
    impl Drop for Restore {
        fn drop(&mut self) {
            SIMPLIFY.with(|s| s.set(self.0));
        }
    }
    let _restore = Restore(SIMPLIFY.with(|s| s.replace(false)));
    f()
}

fn simplification_enabled() -> bool {
    SIMPLIFY.with(Cell::get)
}

/// Handle to a scalar expression node
#[derive(Clone)]
pub struct SxElem(Rc<Node>);

impl SxElem {
    fn alloc(kind: SxExprKind) -> Self {
        let id = NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        SxElem(Rc::new(Node { id, kind }))
    }

    fn interned(key: InternKey, make: impl FnOnce() -> SxExprKind) -> Self {
        INTERNER.with(|cell| {
            let mut interner = cell.borrow_mut();
            if let Some(existing) = interner.lookup(&key) {
                return existing;
            }
            let node = SxElem::alloc(make());
            interner.insert(key, &node);
            node
        })
    }

    /// Create a fresh symbolic primitive
    pub fn sym(name: impl Into<String>) -> Self {
        SxElem::alloc(SxExprKind::Symbolic(name.into()))
    }

    /// Create `n` symbolic primitives named `name_0 .. name_{n-1}`
    pub fn sym_vec(name: &str, n: usize) -> Vec<Self> {
        (0..n).map(|i| SxElem::sym(format!("{name}_{i}"))).collect()
    }

    /// Numeric constant (unified by bit pattern)
    pub fn constant(value: f64) -> Self {
        SxElem::interned(InternKey::Constant(value.to_bits()), || {
            SxExprKind::Constant(value)
        })
    }

    pub fn zero() -> Self {
        SxElem::constant(0.0)
    }

    pub fn one() -> Self {
        SxElem::constant(1.0)
    }

    /// Apply a unary operator
    ///
    /// # Panics
    /// If `op` is not unary.
    pub fn unary(op: Op, x: &SxElem) -> SxElem {
        assert_eq!(op.arity(), 1, "'{op}' is not a unary operator");
        if simplification_enabled() {
            if let Some(v) = x.value() {
                return SxElem::constant(op.eval(v, v));
            }
            match op {
                Op::Assign => return x.clone(),
                Op::Neg => {
                    if let SxExprKind::Unary(Op::Neg, inner) = x.kind() {
                        return inner.clone();
                    }
                }
                _ => {}
            }
        }
        SxElem::interned(InternKey::Unary(op, x.id()), || {
            SxExprKind::Unary(op, x.clone())
        })
    }

    /// Apply a binary operator
    ///
    /// # Panics
    /// If `op` is not binary.
    pub fn binary(op: Op, x: &SxElem, y: &SxElem) -> SxElem {
        assert_eq!(op.arity(), 2, "'{op}' is not a binary operator");
        if simplification_enabled() {
            if let Some(folded) = simplify_binary(op, x, y) {
                return folded;
            }
        }
        let (x, y) = if op.is_commutative() && y.id() < x.id() {
            (y, x)
        } else {
            (x, y)
        };
        SxElem::interned(InternKey::Binary(op, x.id(), y.id()), || {
            SxExprKind::Binary(op, x.clone(), y.clone())
        })
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn kind(&self) -> &SxExprKind {
        &self.0.kind
    }

    /// Operator tag: `Parameter` for symbols, `Const` for constants
    pub fn op(&self) -> Op {
        match self.kind() {
            SxExprKind::Symbolic(_) => Op::Parameter,
            SxExprKind::Constant(_) => Op::Const,
            SxExprKind::Unary(op, _) | SxExprKind::Binary(op, _, _) => *op,
        }
    }

    /// Number of operands
    pub fn n_dep(&self) -> usize {
        match self.kind() {
            SxExprKind::Symbolic(_) | SxExprKind::Constant(_) => 0,
            SxExprKind::Unary(..) => 1,
            SxExprKind::Binary(..) => 2,
        }
    }

    /// Operand `i`, if present
    pub fn dep(&self, i: usize) -> Option<&SxElem> {
        match (self.kind(), i) {
            (SxExprKind::Unary(_, x), 0) | (SxExprKind::Binary(_, x, _), 0) => Some(x),
            (SxExprKind::Binary(_, _, y), 1) => Some(y),
            _ => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self.kind(), SxExprKind::Symbolic(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind(), SxExprKind::Constant(_))
    }

    /// Literal value of a constant node
    pub fn value(&self) -> Option<f64> {
        match self.kind() {
            SxExprKind::Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// Name of a symbolic primitive
    pub fn name(&self) -> Option<&str> {
        match self.kind() {
            SxExprKind::Symbolic(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.value() == Some(0.0)
    }

    /// Exactly `+0.0` or exactly `-0.0`, told apart by sign bit
    fn is_signed_zero(&self, negative: bool) -> bool {
        let zero = if negative { -0.0f64 } else { 0.0 };
        self.value().map(f64::to_bits) == Some(zero.to_bits())
    }

    pub fn is_one(&self) -> bool {
        self.value() == Some(1.0)
    }

    /// Identity comparison (same node)
    pub fn is_equal(&self, other: &SxElem) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of handles sharing this node
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

/// Construction-time rules. Each one leaves the evaluated value unchanged,
/// down to the sign of a zero: only `-0.0` is an additive identity
/// (`-0.0 + 0.0` is `+0.0`), and only `+0.0` may be subtracted away.
fn simplify_binary(op: Op, x: &SxElem, y: &SxElem) -> Option<SxElem> {
    if let (Some(a), Some(b)) = (x.value(), y.value()) {
        return Some(SxElem::constant(op.eval(a, b)));
    }
    match op {
        Op::Add if x.is_signed_zero(true) => Some(y.clone()),
        Op::Add if y.is_signed_zero(true) => Some(x.clone()),
        Op::Add if x.is_equal(y) => Some(SxElem::unary(Op::Twice, x)),
        Op::Sub if y.is_signed_zero(false) => Some(x.clone()),
        Op::Mul if x.is_one() => Some(y.clone()),
        Op::Mul if y.is_one() => Some(x.clone()),
        Op::Mul if x.is_equal(y) => Some(SxElem::unary(Op::Sq, x)),
        Op::Div if y.is_one() => Some(x.clone()),
        Op::Div if x.is_one() => Some(SxElem::unary(Op::Inv, y)),
        Op::Pow if y.is_constant() => Some(SxElem::binary(Op::ConstPow, x, y)),
        Op::IfElseZero => x.value().map(|c| {
            if c != 0.0 {
                y.clone()
            } else {
                SxElem::zero()
            }
        }),
        _ => None,
    }
}

impl PartialEq for SxElem {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for SxElem {}

impl Hash for SxElem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl From<f64> for SxElem {
    fn from(value: f64) -> Self {
        SxElem::constant(value)
    }
}

impl fmt::Debug for SxElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SxElem({} {})", self.id(), self)
    }
}

/// Infix form. Operations used more than once are printed once as a
/// definition `@id=...` and referred to by id afterwards, e.g.
/// `@7=sin(x), (@7*(@7+1))`.
impl fmt::Display for SxElem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let order = crate::walk::postorder(std::slice::from_ref(self));
        let mut uses: HashMap<NodeId, usize> = HashMap::new();
        for node in &order {
            for i in 0..node.n_dep() {
                if let Some(d) = node.dep(i) {
                    *uses.entry(d.id()).or_default() += 1;
                }
            }
        }

        let mut printed: HashMap<NodeId, String> = HashMap::new();
        for node in &order {
            let text = match node.kind() {
                SxExprKind::Symbolic(name) => name.clone(),
                SxExprKind::Constant(v) => format!("{v}"),
                SxExprKind::Unary(op, x) => op.print(&printed[&x.id()], ""),
                SxExprKind::Binary(op, x, y) => op.print(&printed[&x.id()], &printed[&y.id()]),
            };
            let shared = node.n_dep() > 0 && uses.get(&node.id()).is_some_and(|&n| n > 1);
            if shared {
                write!(f, "{}={}, ", node.id(), text)?;
                printed.insert(node.id(), node.id().to_string());
            } else {
                printed.insert(node.id(), text);
            }
        }
        f.write_str(&printed[&self.id()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_are_never_unified() {
        let a = SxElem::sym("x");
        let b = SxElem::sym("x");
        assert!(!a.is_equal(&b));
        assert!(a.id() < b.id());
    }

    #[test]
    fn hash_consing_reuses_nodes() {
        let x = SxElem::sym("x");
        let a = SxElem::unary(Op::Sin, &x);
        let b = SxElem::unary(Op::Sin, &x);
        assert!(a.is_equal(&b));

        let c = SxElem::constant(2.5);
        let d = SxElem::constant(2.5);
        assert!(c.is_equal(&d));
    }

    #[test]
    fn commutative_operands_are_canonical() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let a = SxElem::binary(Op::Add, &x, &y);
        let b = SxElem::binary(Op::Add, &y, &x);
        assert!(a.is_equal(&b));

        let s = SxElem::binary(Op::Sub, &x, &y);
        let t = SxElem::binary(Op::Sub, &y, &x);
        assert!(!s.is_equal(&t));
    }

    #[test]
    fn identities_fold() {
        let x = SxElem::sym("x");
        assert!(SxElem::binary(Op::Add, &x, &SxElem::constant(-0.0)).is_equal(&x));
        assert!(SxElem::binary(Op::Sub, &x, &SxElem::zero()).is_equal(&x));
        assert!(SxElem::binary(Op::Mul, &SxElem::one(), &x).is_equal(&x));
        assert_eq!(SxElem::binary(Op::Add, &x, &x).op(), Op::Twice);
        assert_eq!(SxElem::binary(Op::Mul, &x, &x).op(), Op::Sq);
        assert_eq!(SxElem::binary(Op::Div, &SxElem::one(), &x).op(), Op::Inv);
        let neg = SxElem::unary(Op::Neg, &x);
        assert!(SxElem::unary(Op::Neg, &neg).is_equal(&x));
    }

    #[test]
    fn zero_sign_survives_additive_rules() {
        let x = SxElem::sym("x");
        let plus = SxElem::binary(Op::Add, &x, &SxElem::zero());
        let minus = SxElem::binary(Op::Sub, &x, &SxElem::constant(-0.0));
        assert_eq!(plus.op(), Op::Add);
        assert_eq!(minus.op(), Op::Sub);

        let v = crate::walk::treewalk_eval(&[plus, minus], &[(x.clone(), -0.0)]).unwrap();
        assert_eq!(v[0].to_bits(), 0.0f64.to_bits());
        assert_eq!(v[1].to_bits(), 0.0f64.to_bits());
    }

    #[test]
    fn constants_fold() {
        let a = SxElem::constant(2.0);
        let b = SxElem::constant(3.0);
        assert_eq!(SxElem::binary(Op::Mul, &a, &b).value(), Some(6.0));
        assert_eq!(SxElem::unary(Op::Neg, &a).value(), Some(-2.0));
    }

    #[test]
    fn simplification_can_be_disabled() {
        let x = SxElem::sym("x");
        let sum = without_simplification(|| SxElem::binary(Op::Add, &x, &x));
        assert_eq!(sum.op(), Op::Add);
        // re-enabled afterwards
        assert_eq!(SxElem::binary(Op::Add, &x, &x).op(), Op::Twice);
    }

    #[test]
    fn deep_chain_drops_without_overflow() {
        let x = SxElem::sym("x");
        let mut e = x.clone();
        for _ in 0..200_000 {
            e = SxElem::unary(Op::Sin, &e);
        }
        drop(e);
        assert_eq!(x.ref_count(), 1);
    }

    #[test]
    fn display_names_shared_subexpressions() {
        let x = SxElem::sym("x");
        let s = SxElem::unary(Op::Sin, &x);
        let e = SxElem::binary(Op::Mul, &s, &SxElem::binary(Op::Add, &s, &SxElem::one()));
        let id = s.id();
        let text = e.to_string();
        assert!(text.starts_with(&format!("{id}=sin(x), ")));
        assert_eq!(text.matches("sin(").count(), 1);
        assert_eq!(text.matches(&id.to_string()).count(), 3);

        // a repeated squaring chain prints in linear space
        let mut e = x.clone();
        for _ in 0..64 {
            e = SxElem::binary(Op::Mul, &e, &SxElem::binary(Op::Add, &e, &SxElem::one()));
        }
        assert!(e.to_string().len() < 64 * 64);
    }

    #[test]
    fn display_is_infix() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let e = SxElem::binary(Op::Add, &SxElem::binary(Op::Mul, &x, &y), &SxElem::unary(Op::Sin, &x));
        let text = e.to_string();
        assert!(text.contains("(x*y)"));
        assert!(text.contains("sin(x)"));
    }
}
