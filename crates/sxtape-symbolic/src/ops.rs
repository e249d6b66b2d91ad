//! Scalar operator set
//!
//! Every node in an expression graph and every atomic operation on a tape
//! carries one of these operators. The discriminants are the stable integer
//! opcodes exposed to code generators; never renumber an existing variant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar operator (the "opcode")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Op {
    // Leaves and tape markers
    Const = 0,
    Parameter = 1,
    Input = 2,
    Output = 3,
    Assign = 4,

    // Arithmetic
    Add = 10,
    Sub = 11,
    Mul = 12,
    Div = 13,
    Neg = 14,
    Exp = 15,
    Log = 16,
    Pow = 17,
    ConstPow = 18,
    Sqrt = 19,
    Sq = 20,
    Twice = 21,
    Inv = 22,

    // Trigonometric
    Sin = 30,
    Cos = 31,
    Tan = 32,
    Asin = 33,
    Acos = 34,
    Atan = 35,
    Atan2 = 36,
    Sinh = 37,
    Cosh = 38,
    Tanh = 39,
    Asinh = 40,
    Acosh = 41,
    Atanh = 42,

    // Comparison and logic (result is 0.0 or 1.0)
    Lt = 50,
    Le = 51,
    Eq = 52,
    Ne = 53,
    Not = 54,
    And = 55,
    Or = 56,

    // Piecewise
    Floor = 60,
    Ceil = 61,
    Fmod = 62,
    Fabs = 63,
    Sign = 64,
    Copysign = 65,
    IfElseZero = 66,
    Fmin = 67,
    Fmax = 68,
    Erf = 69,
}

impl Op {
    /// All operators, in opcode order
    pub const ALL: [Op; 48] = [
        Op::Const,
        Op::Parameter,
        Op::Input,
        Op::Output,
        Op::Assign,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Neg,
        Op::Exp,
        Op::Log,
        Op::Pow,
        Op::ConstPow,
        Op::Sqrt,
        Op::Sq,
        Op::Twice,
        Op::Inv,
        Op::Sin,
        Op::Cos,
        Op::Tan,
        Op::Asin,
        Op::Acos,
        Op::Atan,
        Op::Atan2,
        Op::Sinh,
        Op::Cosh,
        Op::Tanh,
        Op::Asinh,
        Op::Acosh,
        Op::Atanh,
        Op::Lt,
        Op::Le,
        Op::Eq,
        Op::Ne,
        Op::Not,
        Op::And,
        Op::Or,
        Op::Floor,
        Op::Ceil,
        Op::Fmod,
        Op::Fabs,
        Op::Sign,
        Op::Copysign,
        Op::IfElseZero,
        Op::Fmin,
        Op::Fmax,
        Op::Erf,
    ];

    /// Stable integer opcode
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Inverse of [`Op::code`]
    pub fn from_code(code: i32) -> Option<Op> {
        Op::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Number of operands (0 for leaves and markers)
    pub fn arity(self) -> usize {
        match self {
            Op::Const | Op::Parameter | Op::Input | Op::Output => 0,
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Pow
            | Op::ConstPow
            | Op::Atan2
            | Op::Lt
            | Op::Le
            | Op::Eq
            | Op::Ne
            | Op::And
            | Op::Or
            | Op::Fmod
            | Op::Copysign
            | Op::IfElseZero
            | Op::Fmin
            | Op::Fmax => 2,
            _ => 1,
        }
    }

    /// Check if swapping the operands leaves the result bit-identical
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add | Op::Mul | Op::Eq | Op::Ne | Op::And | Op::Or
        )
    }

    /// Check if the operator is an infix arithmetic or comparison operator
    fn infix(self) -> Option<&'static str> {
        match self {
            Op::Add => Some("+"),
            Op::Sub => Some("-"),
            Op::Mul => Some("*"),
            Op::Div => Some("/"),
            Op::Lt => Some("<"),
            Op::Le => Some("<="),
            Op::Eq => Some("=="),
            Op::Ne => Some("!="),
            Op::And => Some("&&"),
            Op::Or => Some("||"),
            _ => None,
        }
    }

    /// Lower-case operator name, as used in diagnostics and printing
    pub fn name(self) -> &'static str {
        match self {
            Op::Const => "const",
            Op::Parameter => "parameter",
            Op::Input => "input",
            Op::Output => "output",
            Op::Assign => "assign",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Neg => "neg",
            Op::Exp => "exp",
            Op::Log => "log",
            Op::Pow => "pow",
            Op::ConstPow => "constpow",
            Op::Sqrt => "sqrt",
            Op::Sq => "sq",
            Op::Twice => "twice",
            Op::Inv => "inv",
            Op::Sin => "sin",
            Op::Cos => "cos",
            Op::Tan => "tan",
            Op::Asin => "asin",
            Op::Acos => "acos",
            Op::Atan => "atan",
            Op::Atan2 => "atan2",
            Op::Sinh => "sinh",
            Op::Cosh => "cosh",
            Op::Tanh => "tanh",
            Op::Asinh => "asinh",
            Op::Acosh => "acosh",
            Op::Atanh => "atanh",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Floor => "floor",
            Op::Ceil => "ceil",
            Op::Fmod => "fmod",
            Op::Fabs => "fabs",
            Op::Sign => "sign",
            Op::Copysign => "copysign",
            Op::IfElseZero => "if_else_zero",
            Op::Fmin => "fmin",
            Op::Fmax => "fmax",
            Op::Erf => "erf",
        }
    }

    /// Primal evaluation. Unary operators ignore `y`; leaves and markers
    /// pass `x` through.
    #[inline]
    pub fn eval(self, x: f64, y: f64) -> f64 {
        match self {
            Op::Const | Op::Parameter | Op::Input | Op::Output | Op::Assign => x,
            Op::Add => x + y,
            Op::Sub => x - y,
            Op::Mul => x * y,
            Op::Div => x / y,
            Op::Neg => -x,
            Op::Exp => x.exp(),
            Op::Log => x.ln(),
            Op::Pow | Op::ConstPow => x.powf(y),
            Op::Sqrt => x.sqrt(),
            Op::Sq => x * x,
            Op::Twice => 2.0 * x,
            Op::Inv => 1.0 / x,
            Op::Sin => x.sin(),
            Op::Cos => x.cos(),
            Op::Tan => x.tan(),
            Op::Asin => x.asin(),
            Op::Acos => x.acos(),
            Op::Atan => x.atan(),
            Op::Atan2 => x.atan2(y),
            Op::Sinh => x.sinh(),
            Op::Cosh => x.cosh(),
            Op::Tanh => x.tanh(),
            Op::Asinh => x.asinh(),
            Op::Acosh => x.acosh(),
            Op::Atanh => x.atanh(),
            Op::Lt => bool_to_f64(x < y),
            Op::Le => bool_to_f64(x <= y),
            Op::Eq => bool_to_f64(x == y),
            Op::Ne => bool_to_f64(x != y),
            Op::Not => bool_to_f64(x == 0.0),
            Op::And => bool_to_f64(x != 0.0 && y != 0.0),
            Op::Or => bool_to_f64(x != 0.0 || y != 0.0),
            Op::Floor => x.floor(),
            Op::Ceil => x.ceil(),
            Op::Fmod => x % y,
            Op::Fabs => x.abs(),
            Op::Sign => sign(x),
            Op::Copysign => x.copysign(y),
            Op::IfElseZero => {
                if x != 0.0 {
                    y
                } else {
                    0.0
                }
            }
            Op::Fmin => x.min(y),
            Op::Fmax => x.max(y),
            Op::Erf => libm::erf(x),
        }
    }

    /// Render an application of this operator to already-printed operands
    pub fn print(self, x: &str, y: &str) -> String {
        if let Some(sym) = self.infix() {
            return format!("({x}{sym}{y})");
        }
        match self {
            Op::Neg => format!("(-{x})"),
            Op::Not => format!("(!{x})"),
            Op::Assign => x.to_string(),
            Op::Sq => format!("sq({x})"),
            Op::Twice => format!("(2.*{x})"),
            Op::Inv => format!("(1./{x})"),
            _ if self.arity() == 2 => format!("{}({x},{y})", self.name()),
            _ => format!("{}({x})", self.name()),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// sign(0) = 0, NaN propagates
#[inline]
fn sign(x: f64) -> f64 {
    if x < 0.0 {
        -1.0
    } else if x > 0.0 {
        1.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trip() {
        for op in &Op::ALL {
            assert_eq!(Op::from_code(op.code()), Some(*op));
        }
        assert_eq!(Op::from_code(9999), None);
    }

    #[test]
    fn piecewise_conventions() {
        assert_eq!(Op::Sign.eval(0.0, 0.0), 0.0);
        assert_eq!(Op::Sign.eval(-3.0, 0.0), -1.0);
        assert_eq!(Op::IfElseZero.eval(0.0, 5.0), 0.0);
        assert_eq!(Op::IfElseZero.eval(2.0, 5.0), 5.0);
        assert_eq!(Op::Fmod.eval(7.5, 2.0), 1.5);
        assert_eq!(Op::Le.eval(1.0, 1.0), 1.0);
        assert_eq!(Op::Lt.eval(1.0, 1.0), 0.0);
    }

    #[test]
    fn printing() {
        assert_eq!(Op::Add.print("x", "y"), "(x+y)");
        assert_eq!(Op::Sin.print("x", ""), "sin(x)");
        assert_eq!(Op::Atan2.print("y", "x"), "atan2(y,x)");
    }
}
