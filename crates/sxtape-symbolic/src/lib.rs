//! sxtape symbolic expression graphs
//!
//! Scalar expressions are built by applying operators to symbolic
//! primitives and constants. The result is a DAG of immutable,
//! reference-counted nodes:
//!
//! - Structurally identical operations are hash-consed to a single node
//! - Trivial identities and constant subexpressions fold at construction
//! - Traversals are iterative, so deep graphs are safe to walk and drop
//!
//! The same [`Op`] table drives graph construction, tape evaluation and
//! differentiation (see [`derivatives`]).

mod arith;
mod expr;
mod ops;
mod scalar;
mod walk;

pub use arith::if_else;
pub use expr::{interned_count, without_simplification, NodeId, SxElem, SxExprKind};
pub use ops::Op;
pub use scalar::{add, derivatives, mul, Scalar};
pub use walk::{count_nodes, depends_on, postorder, symvar, treewalk_eval};

/// Error type for symbolic operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SymbolicError {
    #[error("expected a symbolic primitive, got {op} node {node}")]
    NotSymbolic { op: Op, node: NodeId },

    #[error("symbol '{0}' has no binding")]
    UnboundSymbol(String),
}

pub type Result<T> = std::result::Result<T, SymbolicError>;

impl SxElem {
    /// Name of this node if it is a symbolic primitive, otherwise an error
    pub fn require_symbolic(&self) -> Result<&str> {
        self.name()
            .ok_or_else(|| SymbolicError::NotSymbolic {
                op: self.op(),
                node: self.id(),
            })
    }
}
