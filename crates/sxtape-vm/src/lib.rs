//! sxtape virtual machine
//!
//! Expression graphs are compiled into a flat sequence of
//! [`ScalarAtomic`] operations over a fixed-size work vector. The same
//! tape is then interpreted to evaluate the outputs, to push tangents
//! forward, to pull adjoints backward, or to propagate sparsity patterns.

pub mod algorithm;
pub mod atomic;
pub mod compiler;
pub mod dual;
pub mod interp;
pub mod sparsity;

pub use algorithm::Algorithm;
pub use atomic::{Payload, ScalarAtomic, ENCODED_ATOMIC_SIZE};
pub use compiler::{compile, CompileOptions};
pub use dual::Dual;
pub use interp::Workspace;
pub use sparsity::Sparsity;

use sxtape_symbolic::{NodeId, Op};

/// Compile-time errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("input {input} element {element} is not a symbolic primitive: {op} node {node}")]
    NotSymbolic {
        input: usize,
        element: usize,
        op: Op,
        node: NodeId,
    },

    #[error("symbol '{name}' is declared as an input more than once")]
    DuplicateInput { name: String },

    #[error("outputs depend on '{name}', which is not a declared input")]
    FreeVariable { name: String },
}

/// Errors raised while validating or interpreting a tape
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TapeError {
    #[error("expected {expected} {what}, got {got}")]
    Count {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{what} {index} has length {got}, expected {expected}")]
    Length {
        what: &'static str,
        index: usize,
        expected: usize,
        got: usize,
    },

    #[error("operation {index} reads slot {slot} before it is written")]
    UnwrittenSlot { index: usize, slot: u32 },

    #[error("operation {index} refers to {what} ({input}, {element}) outside the declared shape")]
    MarkerOutOfRange {
        index: usize,
        what: &'static str,
        input: u32,
        element: u32,
    },

    #[error("operation {index}: payload does not match opcode {op}")]
    PayloadMismatch { index: usize, op: Op },

    #[error("operation {index} writes slot {slot}, but a tape of this length has at most {limit} slots")]
    SlotOutOfRange { index: usize, slot: u32, limit: usize },

    #[error("operation {index}: opcode {op} cannot appear on a tape")]
    UnexpectedOp { index: usize, op: Op },

    #[error("truncated or unknown record at byte offset {offset}")]
    Decode { offset: usize },
}

pub type Result<T> = std::result::Result<T, TapeError>;
