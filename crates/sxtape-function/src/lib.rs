//! Compiled scalar functions
//!
//! [`SxFunction`] binds named inputs and outputs to one compiled tape and
//! exposes evaluation, Jacobian-vector and vector-Jacobian products,
//! Jacobian and Hessian assembly, symbolic derivative construction and
//! tape introspection for code generators.
//!
//! ```
//! use sxtape_function::{FunctionOptions, SxFunction};
//! use sxtape_symbolic::SxElem;
//!
//! let x = SxElem::sym("x");
//! let y = SxElem::sym("y");
//! let f = &x * &y + x.sin();
//! let fun = SxFunction::new(
//!     "f",
//!     vec![("x", vec![x]), ("y", vec![y])],
//!     vec![("f", vec![f])],
//!     FunctionOptions::default(),
//! )
//! .unwrap();
//! let out = fun.evaluate(&[&[2.0], &[3.0]]).unwrap();
//! assert!((out[0][0] - (6.0 + 2f64.sin())).abs() < 1e-12);
//! ```

mod function;
mod numeric;
mod options;

pub use function::SxFunction;
pub use numeric::{NumericFunction, SparseMatrix};
pub use options::FunctionOptions;

use sxtape_vm::{CompileError, TapeError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FunctionError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Tape(#[from] TapeError),

    #[error("no input named '{0}'")]
    UnknownInput(String),

    #[error("no output named '{0}'")]
    UnknownOutput(String),

    #[error("'{0}' is used for more than one input or output")]
    DuplicateName(String),

    #[error("{what} must be scalar, has {size} elements")]
    NotScalar { what: String, size: usize },

    #[error("the symbolic graph of '{0}' has been cleared")]
    SymbolicCleared(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}

pub type Result<T> = std::result::Result<T, FunctionError>;
