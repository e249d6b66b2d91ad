//! Values a tape can be interpreted over
//!
//! The interpreter is generic over [`Scalar`]: `f64` gives numeric
//! evaluation, [`SxElem`] gives symbolic evaluation (derivative expressions
//! are built by running the same sweeps over expression handles), and dual
//! numbers give second-order products.

use crate::expr::SxElem;
use crate::ops::Op;
use std::f64::consts::FRAC_2_SQRT_PI;
use std::fmt;

pub trait Scalar: Clone + fmt::Debug {
    fn from_f64(value: f64) -> Self;

    /// Apply `op`; unary operators ignore `y`
    fn apply(op: Op, x: &Self, y: &Self) -> Self;

    /// True only when the value is known to be exactly zero regardless of
    /// the inputs. Sweeps skip work for structural zeros.
    fn is_structural_zero(&self) -> bool {
        false
    }

    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    fn one() -> Self {
        Self::from_f64(1.0)
    }
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn apply(op: Op, x: &Self, y: &Self) -> Self {
        op.eval(*x, *y)
    }
}

impl Scalar for SxElem {
    fn from_f64(value: f64) -> Self {
        SxElem::constant(value)
    }

    fn apply(op: Op, x: &Self, y: &Self) -> Self {
        match op.arity() {
            2 => SxElem::binary(op, x, y),
            1 => SxElem::unary(op, x),
            _ => x.clone(),
        }
    }

    fn is_structural_zero(&self) -> bool {
        self.is_zero()
    }
}

#[inline]
fn un<T: Scalar>(op: Op, x: &T) -> T {
    T::apply(op, x, x)
}

#[inline]
fn bin<T: Scalar>(op: Op, x: &T, y: &T) -> T {
    T::apply(op, x, y)
}

/// `a + b`
#[inline]
pub fn add<T: Scalar>(a: &T, b: &T) -> T {
    T::apply(Op::Add, a, b)
}

/// `a * b`
#[inline]
pub fn mul<T: Scalar>(a: &T, b: &T) -> T {
    T::apply(Op::Mul, a, b)
}

/// Local partial derivatives of `f = op(x, y)` with respect to `x` and `y`.
///
/// This one table drives forward, reverse and symbolic differentiation, so
/// the conventions at non-differentiable points are shared by all modes:
///
/// * `fabs`: `sign(x)`, so the derivative at 0 is 0
/// * `fmin`/`fmax`: on a tie the first operand takes the whole derivative
/// * `lt le eq ne not and or floor ceil sign`: 0 everywhere
/// * `if_else_zero(c, x)`: 1 for `x` when `c != 0`, otherwise 0; 0 for `c`
/// * `fmod(x, y)`: the quotient is treated as locally constant
/// * `copysign(x, y)`: `sign(x) * copysign(1, y)`, 0 for `y`
/// * `sqrt`: `1/(2 sqrt(x))`, i.e. `+inf` at 0
/// * `pow(x, y)`: `y x^(y-1)` and `f ln(x)`
pub fn derivatives<T: Scalar>(op: Op, x: &T, y: &T, f: &T) -> [T; 2] {
    let c = T::from_f64;
    match op {
        Op::Const | Op::Parameter | Op::Input | Op::Output => [T::zero(), T::zero()],
        Op::Assign => [T::one(), T::zero()],
        Op::Add => [T::one(), T::one()],
        Op::Sub => [T::one(), c(-1.0)],
        Op::Mul => [y.clone(), x.clone()],
        Op::Div => [un(Op::Inv, y), un(Op::Neg, &bin(Op::Div, f, y))],
        Op::Neg => [c(-1.0), T::zero()],
        Op::Exp => [f.clone(), T::zero()],
        Op::Log => [un(Op::Inv, x), T::zero()],
        Op::Pow => [
            mul(y, &bin(Op::Pow, x, &bin(Op::Sub, y, &T::one()))),
            mul(&un(Op::Log, x), f),
        ],
        Op::ConstPow => [
            mul(y, &bin(Op::ConstPow, x, &bin(Op::Sub, y, &T::one()))),
            T::zero(),
        ],
        Op::Sqrt => [un(Op::Inv, &un(Op::Twice, f)), T::zero()],
        Op::Sq => [un(Op::Twice, x), T::zero()],
        Op::Twice => [c(2.0), T::zero()],
        Op::Inv => [un(Op::Neg, &un(Op::Sq, f)), T::zero()],
        Op::Sin => [un(Op::Cos, x), T::zero()],
        Op::Cos => [un(Op::Neg, &un(Op::Sin, x)), T::zero()],
        Op::Tan => [add(&T::one(), &un(Op::Sq, f)), T::zero()],
        Op::Asin => [
            un(Op::Inv, &un(Op::Sqrt, &bin(Op::Sub, &T::one(), &un(Op::Sq, x)))),
            T::zero(),
        ],
        Op::Acos => [
            un(
                Op::Neg,
                &un(Op::Inv, &un(Op::Sqrt, &bin(Op::Sub, &T::one(), &un(Op::Sq, x)))),
            ),
            T::zero(),
        ],
        Op::Atan => [un(Op::Inv, &add(&T::one(), &un(Op::Sq, x))), T::zero()],
        Op::Atan2 => {
            let r = add(&un(Op::Sq, x), &un(Op::Sq, y));
            [bin(Op::Div, y, &r), un(Op::Neg, &bin(Op::Div, x, &r))]
        }
        Op::Sinh => [un(Op::Cosh, x), T::zero()],
        Op::Cosh => [un(Op::Sinh, x), T::zero()],
        Op::Tanh => [bin(Op::Sub, &T::one(), &un(Op::Sq, f)), T::zero()],
        Op::Asinh => [
            un(Op::Inv, &un(Op::Sqrt, &add(&un(Op::Sq, x), &T::one()))),
            T::zero(),
        ],
        Op::Acosh => [
            un(Op::Inv, &un(Op::Sqrt, &bin(Op::Sub, &un(Op::Sq, x), &T::one()))),
            T::zero(),
        ],
        Op::Atanh => [
            un(Op::Inv, &bin(Op::Sub, &T::one(), &un(Op::Sq, x))),
            T::zero(),
        ],
        Op::Lt
        | Op::Le
        | Op::Eq
        | Op::Ne
        | Op::Not
        | Op::And
        | Op::Or
        | Op::Floor
        | Op::Ceil
        | Op::Sign => [T::zero(), T::zero()],
        Op::Fmod => [
            T::one(),
            un(Op::Neg, &bin(Op::Div, &bin(Op::Sub, x, f), y)),
        ],
        Op::Fabs => [un(Op::Sign, x), T::zero()],
        Op::Copysign => [
            mul(&un(Op::Sign, x), &bin(Op::Copysign, &T::one(), y)),
            T::zero(),
        ],
        Op::IfElseZero => [T::zero(), bin(Op::IfElseZero, x, &T::one())],
        Op::Fmin => [bin(Op::Le, x, y), bin(Op::Lt, y, x)],
        Op::Fmax => [bin(Op::Le, y, x), bin(Op::Lt, x, y)],
        Op::Erf => [
            mul(&c(FRAC_2_SQRT_PI), &un(Op::Exp, &un(Op::Neg, &un(Op::Sq, x)))),
            T::zero(),
        ],
    }
}
