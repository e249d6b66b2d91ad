//! Jacobian sparsity patterns
//!
//! Patterns are computed by pushing 64-column bitsets forward through the
//! tape. An operand only contributes if its partial is not identically
//! zero, so comparisons, rounding and the condition of `if_else_zero` do
//! not create entries.

use crate::algorithm::Algorithm;
use serde::{Deserialize, Serialize};
use sxtape_symbolic::Op;

/// Compressed-column pattern of an `nrow x ncol` matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sparsity {
    nrow: usize,
    ncol: usize,
    colind: Vec<usize>,
    row: Vec<usize>,
}

impl Sparsity {
    /// Build from `(row, col)` entries; duplicates are merged
    pub fn from_triplets(nrow: usize, ncol: usize, entries: &[(usize, usize)]) -> Self {
        let mut sorted: Vec<(usize, usize)> = entries.iter().map(|&(r, c)| (c, r)).collect();
        sorted.sort_unstable();
        sorted.dedup();
        let mut colind = vec![0; ncol + 1];
        let mut row = Vec::with_capacity(sorted.len());
        for &(c, r) in &sorted {
            debug_assert!(r < nrow && c < ncol);
            colind[c + 1] += 1;
            row.push(r);
        }
        for c in 0..ncol {
            colind[c + 1] += colind[c];
        }
        Sparsity {
            nrow,
            ncol,
            colind,
            row,
        }
    }

    pub fn dense(nrow: usize, ncol: usize) -> Self {
        let entries: Vec<(usize, usize)> = (0..ncol)
            .flat_map(|c| (0..nrow).map(move |r| (r, c)))
            .collect();
        Sparsity::from_triplets(nrow, ncol, &entries)
    }

    pub fn nrow(&self) -> usize {
        self.nrow
    }

    pub fn ncol(&self) -> usize {
        self.ncol
    }

    pub fn nnz(&self) -> usize {
        self.row.len()
    }

    pub fn colind(&self) -> &[usize] {
        &self.colind
    }

    pub fn row(&self) -> &[usize] {
        &self.row
    }

    pub fn is_dense(&self) -> bool {
        self.nnz() == self.nrow * self.ncol
    }

    /// Row indices of the entries in column `c`
    pub fn column(&self, c: usize) -> &[usize] {
        &self.row[self.colind[c]..self.colind[c + 1]]
    }

    /// Position of `(r, c)` in the nonzero list
    pub fn get_nz(&self, r: usize, c: usize) -> Option<usize> {
        let col = self.column(c);
        col.binary_search(&r).ok().map(|k| self.colind[c] + k)
    }

    /// `(row, col)` of every entry, column-major
    pub fn triplets(&self) -> Vec<(usize, usize)> {
        (0..self.ncol)
            .flat_map(|c| self.column(c).iter().map(move |&r| (r, c)))
            .collect()
    }

    /// Partition the columns into groups with no row in common, greedily in
    /// column order. One forward sweep per group recovers the whole matrix.
    pub fn column_groups(&self) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut taken: Vec<Vec<bool>> = Vec::new();
        for c in 0..self.ncol {
            let rows = self.column(c);
            let slot = taken
                .iter()
                .position(|used| rows.iter().all(|&r| !used[r]));
            let g = match slot {
                Some(g) => g,
                None => {
                    groups.push(Vec::new());
                    taken.push(vec![false; self.nrow]);
                    groups.len() - 1
                }
            };
            for &r in rows {
                taken[g][r] = true;
            }
            groups[g].push(c);
        }
        groups
    }
}

/// Which operands of `op` can carry a nonzero partial
fn structural_deps(op: Op) -> (bool, bool) {
    match op {
        Op::Lt
        | Op::Le
        | Op::Eq
        | Op::Ne
        | Op::Not
        | Op::And
        | Op::Or
        | Op::Floor
        | Op::Ceil
        | Op::Sign => (false, false),
        Op::IfElseZero => (false, true),
        Op::Copysign | Op::ConstPow => (true, false),
        op if op.arity() == 1 => (true, false),
        _ => (true, true),
    }
}

impl Algorithm {
    /// Sparsity of the Jacobian of all outputs (stacked) with respect to
    /// all inputs (stacked)
    pub fn jac_sparsity(&self) -> Sparsity {
        let n = self.nnz_in();
        let m = self.nnz_out();
        let in_offset = offsets(self.input_sizes());
        let out_offset = offsets(self.output_sizes());

        let mut entries = Vec::new();
        let mut w = vec![0u64; self.work_size()];
        let mut out_bits = vec![0u64; m];
        for block in (0..n).step_by(64) {
            for a in self.ops() {
                let (i1, i2) = a.slots();
                let (i0, i1, i2) = (a.i0 as usize, i1 as usize, i2 as usize);
                match a.op {
                    Op::Const => w[i0] = 0,
                    Op::Input => {
                        let col = in_offset[i1] + i2;
                        w[i0] = if (block..block + 64).contains(&col) {
                            1u64 << (col - block)
                        } else {
                            0
                        };
                    }
                    Op::Output => out_bits[out_offset[i0] + i2] = w[i1],
                    op => {
                        let (dx, dy) = structural_deps(op);
                        let mut bits = 0;
                        if dx {
                            bits |= w[i1];
                        }
                        if dy {
                            bits |= w[i2];
                        }
                        w[i0] = bits;
                    }
                }
            }
            for (r, &bits) in out_bits.iter().enumerate() {
                let mut b = bits;
                while b != 0 {
                    let j = b.trailing_zeros() as usize;
                    entries.push((r, block + j));
                    b &= b - 1;
                }
            }
        }
        Sparsity::from_triplets(m, n, &entries)
    }
}

pub(crate) fn offsets(sizes: &[usize]) -> Vec<usize> {
    let mut acc = 0;
    sizes
        .iter()
        .map(|&s| {
            let o = acc;
            acc += s;
            o
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use sxtape_symbolic::SxElem;

    #[test]
    fn csc_layout() {
        let sp = Sparsity::from_triplets(3, 2, &[(2, 1), (0, 0), (1, 1), (2, 1)]);
        assert_eq!(sp.nnz(), 3);
        assert_eq!(sp.colind(), &[0, 1, 3]);
        assert_eq!(sp.row(), &[0, 1, 2]);
        assert_eq!(sp.get_nz(2, 1), Some(2));
        assert_eq!(sp.get_nz(1, 0), None);
        assert!(!sp.is_dense());
        assert!(Sparsity::dense(2, 3).is_dense());
    }

    #[test]
    fn diagonal_jacobian_pattern() {
        let x = SxElem::sym_vec("x", 3);
        let f: Vec<SxElem> = x.iter().map(|xi| xi.sin()).collect();
        let alg = compile(&[x], &[f], &CompileOptions::default()).unwrap();
        let sp = alg.jac_sparsity();
        assert_eq!(sp.triplets(), vec![(0, 0), (1, 1), (2, 2)]);
        assert_eq!(sp.column_groups(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn comparisons_do_not_create_entries() {
        let x = SxElem::sym("x");
        let y = SxElem::sym("y");
        let f = x.lt(&y).if_else_zero(&y.exp());
        let alg = compile(&[vec![x, y]], &[vec![f]], &CompileOptions::default()).unwrap();
        assert_eq!(alg.jac_sparsity().triplets(), vec![(0, 1)]);
    }

    #[test]
    fn wide_inputs_span_several_blocks() {
        let x = SxElem::sym_vec("x", 130);
        let f = vec![&x[0] * &x[129], x[64].clone()];
        let alg = compile(&[x], &[f], &CompileOptions::default()).unwrap();
        let sp = alg.jac_sparsity();
        assert_eq!(sp.ncol(), 130);
        assert_eq!(sp.triplets(), vec![(0, 0), (1, 64), (0, 129)]);
    }

    #[test]
    fn coupled_columns_get_separate_groups() {
        let sp = Sparsity::from_triplets(2, 3, &[(0, 0), (0, 1), (1, 2), (1, 1)]);
        assert_eq!(sp.column_groups(), vec![vec![0, 2], vec![1]]);
    }
}
