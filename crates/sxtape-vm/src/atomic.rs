//! Atomic operation records
//!
//! One [`ScalarAtomic`] per tape entry. The trailing payload is either two
//! operand slots or a literal, depending on the opcode:
//!
//! | op            | i0            | payload                          |
//! |---------------|---------------|----------------------------------|
//! | `Const`       | result slot   | `Literal(value)`                 |
//! | `Input`       | result slot   | `Slots(input index, element)`    |
//! | `Output`      | output index  | `Slots(source slot, element)`    |
//! | unary op      | result slot   | `Slots(operand, operand)`        |
//! | binary op     | result slot   | `Slots(lhs, rhs)`                |
//!
//! Unary operators repeat their operand in the second slot so every
//! arithmetic entry can be dispatched the same way.

use serde::{Deserialize, Serialize};
use std::fmt;
use sxtape_symbolic::Op;

/// Size of one record in the encoding produced by [`ScalarAtomic::encode`]
pub const ENCODED_ATOMIC_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Slots(u32, u32),
    Literal(f64),
}

/// An atomic operation of the scalar virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalarAtomic {
    pub op: Op,
    pub i0: u32,
    pub payload: Payload,
}

impl ScalarAtomic {
    pub fn constant(slot: u32, value: f64) -> Self {
        ScalarAtomic {
            op: Op::Const,
            i0: slot,
            payload: Payload::Literal(value),
        }
    }

    pub fn input(slot: u32, input: u32, element: u32) -> Self {
        ScalarAtomic {
            op: Op::Input,
            i0: slot,
            payload: Payload::Slots(input, element),
        }
    }

    pub fn output(output: u32, slot: u32, element: u32) -> Self {
        ScalarAtomic {
            op: Op::Output,
            i0: output,
            payload: Payload::Slots(slot, element),
        }
    }

    pub fn unary(op: Op, result: u32, x: u32) -> Self {
        ScalarAtomic {
            op,
            i0: result,
            payload: Payload::Slots(x, x),
        }
    }

    pub fn binary(op: Op, result: u32, x: u32, y: u32) -> Self {
        ScalarAtomic {
            op,
            i0: result,
            payload: Payload::Slots(x, y),
        }
    }

    /// `(i1, i2)`, or `(0, 0)` for a literal payload
    pub fn slots(&self) -> (u32, u32) {
        match self.payload {
            Payload::Slots(i1, i2) => (i1, i2),
            Payload::Literal(_) => (0, 0),
        }
    }

    /// Literal value, or 0.0 for a slot payload
    pub fn literal(&self) -> f64 {
        match self.payload {
            Payload::Literal(d) => d,
            Payload::Slots(..) => 0.0,
        }
    }

    /// Check whether this entry writes a work slot
    pub fn writes_slot(&self) -> bool {
        self.op != Op::Output
    }

    /// Little-endian `op i32 | i0 u32 | (i1 u32, i2 u32) or f64 bits`
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.op.code().to_le_bytes());
        out.extend_from_slice(&self.i0.to_le_bytes());
        match self.payload {
            Payload::Slots(i1, i2) => {
                out.extend_from_slice(&i1.to_le_bytes());
                out.extend_from_slice(&i2.to_le_bytes());
            }
            Payload::Literal(d) => out.extend_from_slice(&d.to_bits().to_le_bytes()),
        }
    }

    /// Inverse of [`ScalarAtomic::encode`] for one record
    pub fn decode(bytes: &[u8; ENCODED_ATOMIC_SIZE]) -> Option<Self> {
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        let op = Op::from_code(i32::from_le_bytes(word(0)))?;
        let i0 = u32::from_le_bytes(word(4));
        let payload = if op == Op::Const {
            let mut lit = [0u8; 8];
            lit.copy_from_slice(&bytes[8..16]);
            Payload::Literal(f64::from_bits(u64::from_le_bytes(lit)))
        } else {
            Payload::Slots(u32::from_le_bytes(word(8)), u32::from_le_bytes(word(12)))
        };
        Some(ScalarAtomic { op, i0, payload })
    }
}

impl fmt::Display for ScalarAtomic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (i1, i2) = self.slots();
        match self.op {
            Op::Const => write!(f, "@{} = {}", self.i0, self.literal()),
            Op::Input => write!(f, "@{} = input[{}][{}]", self.i0, i1, i2),
            Op::Output => write!(f, "output[{}][{}] = @{}", self.i0, i2, i1),
            op => {
                let x = format!("@{i1}");
                let y = format!("@{i2}");
                write!(f, "@{} = {}", self.i0, op.print(&x, &y))
            }
        }
    }
}
