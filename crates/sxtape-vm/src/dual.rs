//! First-order dual numbers
//!
//! Running the reverse sweep over [`Dual`] values seeded with a direction
//! `v` gives the gradient in the value parts and the Hessian-vector product
//! `H v` in the tangent parts (forward-over-reverse).

use serde::{Deserialize, Serialize};
use sxtape_symbolic::{derivatives, Op, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dual {
    pub value: f64,
    pub tangent: f64,
}

impl Dual {
    pub fn new(value: f64, tangent: f64) -> Self {
        Dual { value, tangent }
    }
}

impl Scalar for Dual {
    fn from_f64(value: f64) -> Self {
        Dual {
            value,
            tangent: 0.0,
        }
    }

    fn apply(op: Op, x: &Self, y: &Self) -> Self {
        let value = op.eval(x.value, y.value);
        let [d0, d1] = derivatives(op, &x.value, &y.value, &value);
        let tangent = match op.arity() {
            2 => d0 * x.tangent + d1 * y.tangent,
            1 => d0 * x.tangent,
            _ => return *x,
        };
        Dual { value, tangent }
    }
}
