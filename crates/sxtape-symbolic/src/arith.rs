//! Operator overloading and named math functions on [`SxElem`]

use crate::expr::SxElem;
use crate::ops::Op;
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<SxElem> for SxElem {
            type Output = SxElem;
            fn $method(self, rhs: SxElem) -> SxElem {
                SxElem::binary($op, &self, &rhs)
            }
        }

        impl $trait<&SxElem> for SxElem {
            type Output = SxElem;
            fn $method(self, rhs: &SxElem) -> SxElem {
                SxElem::binary($op, &self, rhs)
            }
        }

        impl $trait<SxElem> for &SxElem {
            type Output = SxElem;
            fn $method(self, rhs: SxElem) -> SxElem {
                SxElem::binary($op, self, &rhs)
            }
        }

        impl $trait<&SxElem> for &SxElem {
            type Output = SxElem;
            fn $method(self, rhs: &SxElem) -> SxElem {
                SxElem::binary($op, self, rhs)
            }
        }

        impl $trait<f64> for SxElem {
            type Output = SxElem;
            fn $method(self, rhs: f64) -> SxElem {
                SxElem::binary($op, &self, &SxElem::constant(rhs))
            }
        }

        impl $trait<f64> for &SxElem {
            type Output = SxElem;
            fn $method(self, rhs: f64) -> SxElem {
                SxElem::binary($op, self, &SxElem::constant(rhs))
            }
        }

        impl $trait<SxElem> for f64 {
            type Output = SxElem;
            fn $method(self, rhs: SxElem) -> SxElem {
                SxElem::binary($op, &SxElem::constant(self), &rhs)
            }
        }

        impl $trait<&SxElem> for f64 {
            type Output = SxElem;
            fn $method(self, rhs: &SxElem) -> SxElem {
                SxElem::binary($op, &SxElem::constant(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, Op::Add);
impl_binary_op!(Sub, sub, Op::Sub);
impl_binary_op!(Mul, mul, Op::Mul);
impl_binary_op!(Div, div, Op::Div);

impl Neg for SxElem {
    type Output = SxElem;
    fn neg(self) -> SxElem {
        SxElem::unary(Op::Neg, &self)
    }
}

impl Neg for &SxElem {
    type Output = SxElem;
    fn neg(self) -> SxElem {
        SxElem::unary(Op::Neg, self)
    }
}

macro_rules! unary_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr),* $(,)?) => {
        impl SxElem {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> SxElem {
                    SxElem::unary($op, self)
                }
            )*
        }
    };
}

macro_rules! binary_methods {
    ($($(#[$doc:meta])* $name:ident => $op:expr),* $(,)?) => {
        impl SxElem {
            $(
                $(#[$doc])*
                pub fn $name(&self, other: &SxElem) -> SxElem {
                    SxElem::binary($op, self, other)
                }
            )*
        }
    };
}

unary_methods! {
    exp => Op::Exp,
    /// Natural logarithm
    log => Op::Log,
    sqrt => Op::Sqrt,
    /// `x * x`
    sq => Op::Sq,
    /// `2 * x`
    twice => Op::Twice,
    /// `1 / x`
    inv => Op::Inv,
    sin => Op::Sin,
    cos => Op::Cos,
    tan => Op::Tan,
    asin => Op::Asin,
    acos => Op::Acos,
    atan => Op::Atan,
    sinh => Op::Sinh,
    cosh => Op::Cosh,
    tanh => Op::Tanh,
    asinh => Op::Asinh,
    acosh => Op::Acosh,
    atanh => Op::Atanh,
    floor => Op::Floor,
    ceil => Op::Ceil,
    fabs => Op::Fabs,
    /// -1, 0 or 1 (NaN propagates)
    sign => Op::Sign,
    erf => Op::Erf,
    /// 1 where `x == 0`, else 0
    logic_not => Op::Not,
}

binary_methods! {
    pow => Op::Pow,
    /// `atan2(self, x)`, with `self` as the ordinate
    atan2 => Op::Atan2,
    fmin => Op::Fmin,
    fmax => Op::Fmax,
    fmod => Op::Fmod,
    copysign => Op::Copysign,
    lt => Op::Lt,
    le => Op::Le,
    /// Elementwise `==` as an expression (0 or 1)
    eq_expr => Op::Eq,
    /// Elementwise `!=` as an expression (0 or 1)
    ne_expr => Op::Ne,
    logic_and => Op::And,
    logic_or => Op::Or,
    /// `self != 0 ? value : 0`
    if_else_zero => Op::IfElseZero,
}

impl SxElem {
    pub fn gt(&self, other: &SxElem) -> SxElem {
        SxElem::binary(Op::Lt, other, self)
    }

    pub fn ge(&self, other: &SxElem) -> SxElem {
        SxElem::binary(Op::Le, other, self)
    }

    /// `x ^ exponent` for a constant exponent
    pub fn powf(&self, exponent: f64) -> SxElem {
        SxElem::binary(Op::Pow, self, &SxElem::constant(exponent))
    }
}

/// `cond != 0 ? if_true : if_false`, built from two `if_else_zero` terms
pub fn if_else(cond: &SxElem, if_true: &SxElem, if_false: &SxElem) -> SxElem {
    cond.if_else_zero(if_true) + cond.logic_not().if_else_zero(if_false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::treewalk_eval;

    #[test]
    fn mixed_operand_forms() {
        let x = SxElem::sym("x");
        let e = 2.0 * &x + &x / 4.0 - 1.0;
        let v = treewalk_eval(&[e], &[(x, 8.0)]).unwrap();
        assert_eq!(v, vec![17.0]);
    }

    #[test]
    fn if_else_selects_branch() {
        let x = SxElem::sym("x");
        let e = if_else(&x.gt(&SxElem::zero()), &x.sq(), &-&x);
        let pos = treewalk_eval(&[e.clone()], &[(x.clone(), 3.0)]).unwrap();
        let neg = treewalk_eval(&[e], &[(x, -2.0)]).unwrap();
        assert_eq!(pos, vec![9.0]);
        assert_eq!(neg, vec![2.0]);
    }

    #[test]
    fn pow_with_constant_exponent_is_constpow() {
        let x = SxElem::sym("x");
        assert_eq!(x.powf(3.0).op(), Op::ConstPow);
        let y = SxElem::sym("y");
        assert_eq!(x.pow(&y).op(), Op::Pow);
    }
}
