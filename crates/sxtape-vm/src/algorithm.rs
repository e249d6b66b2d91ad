//! Validated tapes

use crate::atomic::{Payload, ScalarAtomic, ENCODED_ATOMIC_SIZE};
use crate::{Result, TapeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use sxtape_symbolic::Op;

const NO_DEF: usize = usize::MAX;

/// A compiled tape together with the input and output shapes it was built
/// for. Every slot is written before it is read; [`Algorithm::from_atomics`]
/// rejects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAlgorithm", into = "RawAlgorithm")]
pub struct Algorithm {
    ops: Vec<ScalarAtomic>,
    input_sizes: Vec<usize>,
    output_sizes: Vec<usize>,
    work_size: usize,
    /// For each operation, the tape positions that last wrote its operand
    /// slots. Reverse sweeps read primal operand values from these.
    defs: Vec<[usize; 2]>,
}

#[derive(Serialize, Deserialize)]
struct RawAlgorithm {
    ops: Vec<ScalarAtomic>,
    input_sizes: Vec<usize>,
    output_sizes: Vec<usize>,
}

impl TryFrom<RawAlgorithm> for Algorithm {
    type Error = TapeError;

    fn try_from(raw: RawAlgorithm) -> Result<Self> {
        Algorithm::from_atomics(raw.ops, raw.input_sizes, raw.output_sizes)
    }
}

impl From<Algorithm> for RawAlgorithm {
    fn from(alg: Algorithm) -> Self {
        RawAlgorithm {
            ops: alg.ops,
            input_sizes: alg.input_sizes,
            output_sizes: alg.output_sizes,
        }
    }
}

impl Algorithm {
    /// Validate a sequence of atomic operations against the given shapes
    pub fn from_atomics(
        ops: Vec<ScalarAtomic>,
        input_sizes: Vec<usize>,
        output_sizes: Vec<usize>,
    ) -> Result<Self> {
        let mut writer: Vec<usize> = Vec::new();
        let mut defs = Vec::with_capacity(ops.len());

        let read = |writer: &[usize], index: usize, slot: u32| -> Result<usize> {
            match writer.get(slot as usize) {
                Some(&k) if k != NO_DEF => Ok(k),
                _ => Err(TapeError::UnwrittenSlot { index, slot }),
            }
        };

        for (k, a) in ops.iter().enumerate() {
            let literal = matches!(a.payload, Payload::Literal(_));
            if literal != (a.op == Op::Const) {
                return Err(TapeError::PayloadMismatch { index: k, op: a.op });
            }
            let (i1, i2) = a.slots();
            let def = match a.op {
                Op::Const => [NO_DEF; 2],
                Op::Input => {
                    let in_range = input_sizes
                        .get(i1 as usize)
                        .is_some_and(|&n| (i2 as usize) < n);
                    if !in_range {
                        return Err(TapeError::MarkerOutOfRange {
                            index: k,
                            what: "input",
                            input: i1,
                            element: i2,
                        });
                    }
                    [NO_DEF; 2]
                }
                Op::Output => {
                    let in_range = output_sizes
                        .get(a.i0 as usize)
                        .is_some_and(|&n| (i2 as usize) < n);
                    if !in_range {
                        return Err(TapeError::MarkerOutOfRange {
                            index: k,
                            what: "output",
                            input: a.i0,
                            element: i2,
                        });
                    }
                    [read(&writer, k, i1)?, NO_DEF]
                }
                Op::Parameter => return Err(TapeError::UnexpectedOp { index: k, op: a.op }),
                op if op.arity() == 1 => {
                    let d = read(&writer, k, i1)?;
                    read(&writer, k, i2)?;
                    [d, d]
                }
                _ => [read(&writer, k, i1)?, read(&writer, k, i2)?],
            };
            defs.push(def);

            if a.writes_slot() {
                let slot = a.i0 as usize;
                if slot >= ops.len() {
                    return Err(TapeError::SlotOutOfRange {
                        index: k,
                        slot: a.i0,
                        limit: ops.len(),
                    });
                }
                if slot >= writer.len() {
                    writer.resize(slot + 1, NO_DEF);
                }
                writer[slot] = k;
            }
        }

        Ok(Algorithm {
            ops,
            input_sizes,
            output_sizes,
            work_size: writer.len(),
            defs,
        })
    }

    /// Decode a tape written by [`Algorithm::to_bytes`]
    pub fn from_bytes(
        bytes: &[u8],
        input_sizes: Vec<usize>,
        output_sizes: Vec<usize>,
    ) -> Result<Self> {
        if bytes.len() % ENCODED_ATOMIC_SIZE != 0 {
            let offset = bytes.len() - bytes.len() % ENCODED_ATOMIC_SIZE;
            return Err(TapeError::Decode { offset });
        }
        let mut ops = Vec::with_capacity(bytes.len() / ENCODED_ATOMIC_SIZE);
        for (n, chunk) in bytes.chunks_exact(ENCODED_ATOMIC_SIZE).enumerate() {
            let mut record = [0u8; ENCODED_ATOMIC_SIZE];
            record.copy_from_slice(chunk);
            let atomic = ScalarAtomic::decode(&record).ok_or(TapeError::Decode {
                offset: n * ENCODED_ATOMIC_SIZE,
            })?;
            ops.push(atomic);
        }
        Algorithm::from_atomics(ops, input_sizes, output_sizes)
    }

    /// Canonical little-endian encoding, 16 bytes per operation
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ops.len() * ENCODED_ATOMIC_SIZE);
        for a in &self.ops {
            a.encode(&mut out);
        }
        out
    }

    pub fn ops(&self) -> &[ScalarAtomic] {
        &self.ops
    }

    /// Number of atomic operations, markers included
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn work_size(&self) -> usize {
        self.work_size
    }

    pub fn n_in(&self) -> usize {
        self.input_sizes.len()
    }

    pub fn n_out(&self) -> usize {
        self.output_sizes.len()
    }

    pub fn input_sizes(&self) -> &[usize] {
        &self.input_sizes
    }

    pub fn output_sizes(&self) -> &[usize] {
        &self.output_sizes
    }

    /// Total number of scalar inputs over all inputs
    pub fn nnz_in(&self) -> usize {
        self.input_sizes.iter().sum()
    }

    /// Total number of scalar outputs over all outputs
    pub fn nnz_out(&self) -> usize {
        self.output_sizes.iter().sum()
    }

    /// Operations that compute something, i.e. excluding input and output
    /// markers
    pub fn count_nodes(&self) -> usize {
        self.ops
            .iter()
            .filter(|a| !matches!(a.op, Op::Input | Op::Output))
            .count()
    }

    /// # Panics
    ///
    /// Panics if `k` is not a valid tape position.
    pub fn atomic(&self, k: usize) -> &ScalarAtomic {
        &self.ops[k]
    }

    pub(crate) fn defs(&self, k: usize) -> [usize; 2] {
        self.defs[k]
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.ops {
            writeln!(f, "{a};")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ScalarAtomic> {
        vec![
            ScalarAtomic::input(0, 0, 0),
            ScalarAtomic::input(1, 0, 1),
            ScalarAtomic::binary(Op::Mul, 0, 0, 1),
            ScalarAtomic::output(0, 0, 0),
        ]
    }

    #[test]
    fn accepts_well_formed_tape() {
        let alg = Algorithm::from_atomics(sample(), vec![2], vec![1]).unwrap();
        assert_eq!(alg.len(), 4);
        assert_eq!(alg.work_size(), 2);
        assert_eq!(alg.count_nodes(), 1);
        assert_eq!(alg.defs(2), [0, 1]);
        assert_eq!(alg.defs(3), [2, NO_DEF]);
    }

    #[test]
    fn rejects_read_before_write() {
        let ops = vec![
            ScalarAtomic::input(0, 0, 0),
            ScalarAtomic::unary(Op::Sin, 1, 3),
            ScalarAtomic::output(0, 1, 0),
        ];
        let err = Algorithm::from_atomics(ops, vec![1], vec![1]).unwrap_err();
        assert_eq!(err, TapeError::UnwrittenSlot { index: 1, slot: 3 });
    }

    #[test]
    fn rejects_markers_outside_shape() {
        let err = Algorithm::from_atomics(sample(), vec![1], vec![1]).unwrap_err();
        assert!(matches!(err, TapeError::MarkerOutOfRange { index: 1, .. }));

        let err = Algorithm::from_atomics(sample(), vec![2], vec![]).unwrap_err();
        assert!(matches!(err, TapeError::MarkerOutOfRange { what: "output", .. }));
    }

    #[test]
    fn unary_second_operand_must_be_written() {
        let ops = vec![
            ScalarAtomic::input(0, 0, 0),
            ScalarAtomic::binary(Op::Sin, 0, 0, 999),
            ScalarAtomic::output(0, 0, 0),
        ];
        let mut bytes = Vec::new();
        for a in &ops {
            a.encode(&mut bytes);
        }
        let err = Algorithm::from_bytes(&bytes, vec![1], vec![1]).unwrap_err();
        assert_eq!(err, TapeError::UnwrittenSlot { index: 1, slot: 999 });
    }

    #[test]
    fn rejects_result_slot_beyond_tape_length() {
        let ops = vec![
            ScalarAtomic::input(u32::MAX, 0, 0),
            ScalarAtomic::output(0, u32::MAX, 0),
        ];
        let err = Algorithm::from_atomics(ops, vec![1], vec![1]).unwrap_err();
        assert_eq!(
            err,
            TapeError::SlotOutOfRange {
                index: 0,
                slot: u32::MAX,
                limit: 2,
            }
        );

        let ops = vec![
            ScalarAtomic::input(0, 0, 0),
            ScalarAtomic::unary(Op::Neg, 1, 0),
            ScalarAtomic::output(0, 1, 0),
        ];
        assert!(Algorithm::from_atomics(ops, vec![1], vec![1]).is_ok());
    }

    #[test]
    fn rejects_mismatched_payload() {
        let ops = vec![ScalarAtomic {
            op: Op::Const,
            i0: 0,
            payload: Payload::Slots(0, 0),
        }];
        let err = Algorithm::from_atomics(ops, vec![], vec![]).unwrap_err();
        assert!(matches!(err, TapeError::PayloadMismatch { index: 0, .. }));
    }

    #[test]
    fn byte_encoding_round_trips() {
        let mut ops = sample();
        ops.insert(2, ScalarAtomic::constant(2, -0.25));
        let alg = Algorithm::from_atomics(ops, vec![2], vec![1]).unwrap();
        let bytes = alg.to_bytes();
        assert_eq!(bytes.len(), alg.len() * ENCODED_ATOMIC_SIZE);
        let back = Algorithm::from_bytes(&bytes, vec![2], vec![1]).unwrap();
        assert_eq!(back, alg);

        let err = Algorithm::from_bytes(&bytes[..20], vec![2], vec![1]).unwrap_err();
        assert_eq!(err, TapeError::Decode { offset: 16 });
    }

    #[test]
    fn serde_revalidates() {
        let alg = Algorithm::from_atomics(sample(), vec![2], vec![1]).unwrap();
        let json = serde_json::to_string(&alg).unwrap();
        let back: Algorithm = serde_json::from_str(&json).unwrap();
        assert_eq!(back, alg);

        let broken = json.replace("\"input_sizes\":[2]", "\"input_sizes\":[1]");
        assert!(serde_json::from_str::<Algorithm>(&broken).is_err());
    }

    #[test]
    fn listing() {
        let alg = Algorithm::from_atomics(sample(), vec![2], vec![1]).unwrap();
        let text = alg.to_string();
        assert!(text.contains("@0 = (@0*@1);"));
        assert!(text.ends_with("output[0][0] = @0;\n"));
    }
}
