//! Numeric evaluation and derivative assembly
//!
//! A [`NumericFunction`] holds only the compiled tape and the
//! input/output names. It is `Send + Sync`, and cloning it is cheap, so
//! one instance can serve any number of threads, each with its own
//! [`Workspace`].

use crate::{FunctionError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use sxtape_symbolic::Op;
use sxtape_vm::{Algorithm, Dual, Sparsity, Workspace};

#[derive(Debug)]
struct Compiled {
    name: String,
    names_in: Vec<String>,
    names_out: Vec<String>,
    alg: Algorithm,
    jac_sparsity: OnceCell<Sparsity>,
}

#[derive(Debug, Clone)]
pub struct NumericFunction {
    inner: Arc<Compiled>,
}

/// Nonzeros of a sparse matrix in the column-major order of its pattern
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    pub sparsity: Sparsity,
    pub nz: Vec<f64>,
}

impl SparseMatrix {
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.sparsity.get_nz(r, c).map_or(0.0, |k| self.nz[k])
    }

    /// Row-major dense copy
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.sparsity.ncol()]; self.sparsity.nrow()];
        for (k, (r, c)) in self.sparsity.triplets().into_iter().enumerate() {
            dense[r][c] = self.nz[k];
        }
        dense
    }
}

pub(crate) fn zeros(sizes: &[usize]) -> Vec<Vec<f64>> {
    sizes.iter().map(|&n| vec![0.0; n]).collect()
}

pub(crate) fn as_mut_slices<T>(bufs: &mut [Vec<T>]) -> Vec<&mut [T]> {
    bufs.iter_mut().map(Vec::as_mut_slice).collect()
}

pub(crate) fn as_slices<T>(bufs: &[Vec<T>]) -> Vec<&[T]> {
    bufs.iter().map(Vec::as_slice).collect()
}

/// `(block, element)` of every position in a stacked vector
fn stacked(sizes: &[usize]) -> Vec<(usize, usize)> {
    sizes
        .iter()
        .enumerate()
        .flat_map(|(i, &n)| (0..n).map(move |e| (i, e)))
        .collect()
}

impl NumericFunction {
    pub(crate) fn new(
        name: String,
        names_in: Vec<String>,
        names_out: Vec<String>,
        alg: Algorithm,
    ) -> Self {
        NumericFunction {
            inner: Arc::new(Compiled {
                name,
                names_in,
                names_out,
                alg,
                jac_sparsity: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn algorithm(&self) -> &Algorithm {
        &self.inner.alg
    }

    pub fn n_in(&self) -> usize {
        self.inner.names_in.len()
    }

    pub fn n_out(&self) -> usize {
        self.inner.names_out.len()
    }

    pub fn name_in(&self, i: usize) -> Option<&str> {
        self.inner.names_in.get(i).map(String::as_str)
    }

    pub fn name_out(&self, i: usize) -> Option<&str> {
        self.inner.names_out.get(i).map(String::as_str)
    }

    pub fn index_in(&self, name: &str) -> Result<usize> {
        self.inner
            .names_in
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FunctionError::UnknownInput(name.to_string()))
    }

    pub fn index_out(&self, name: &str) -> Result<usize> {
        self.inner
            .names_out
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| FunctionError::UnknownOutput(name.to_string()))
    }

    pub fn size_in(&self, i: usize) -> Option<usize> {
        self.inner.alg.input_sizes().get(i).copied()
    }

    pub fn size_out(&self, i: usize) -> Option<usize> {
        self.inner.alg.output_sizes().get(i).copied()
    }

    /// Number of atomic operations, input and output markers included
    pub fn algorithm_size(&self) -> usize {
        self.inner.alg.len()
    }

    pub fn work_size(&self) -> usize {
        self.inner.alg.work_size()
    }

    /// Opcode of operation `k`. Panics if `k >= algorithm_size()`.
    pub fn atomic_operation(&self, k: usize) -> Op {
        self.inner.alg.atomic(k).op
    }

    /// Operand slots `(i1, i2)` of operation `k`. For an input marker this
    /// is `(input index, element)`, for an output marker
    /// `(source slot, element)`.
    pub fn atomic_input(&self, k: usize) -> (u32, u32) {
        self.inner.alg.atomic(k).slots()
    }

    /// Literal of constant operation `k`
    pub fn atomic_input_real(&self, k: usize) -> f64 {
        self.inner.alg.atomic(k).literal()
    }

    /// Result slot of operation `k`, or the output index for an output
    /// marker
    pub fn atomic_output(&self, k: usize) -> u32 {
        self.inner.alg.atomic(k).i0
    }

    /// Operations on the tape that compute a value
    pub fn count_nodes(&self) -> usize {
        self.inner.alg.count_nodes()
    }

    pub fn workspace(&self) -> Workspace<f64> {
        Workspace::new(&self.inner.alg)
    }

    pub fn evaluate(&self, args: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let mut ws = self.workspace();
        let mut res = zeros(self.inner.alg.output_sizes());
        self.evaluate_into(args, &mut as_mut_slices(&mut res), &mut ws)?;
        Ok(res)
    }

    /// Evaluate into caller buffers, allocating nothing
    pub fn evaluate_into(
        &self,
        args: &[&[f64]],
        res: &mut [&mut [f64]],
        ws: &mut Workspace<f64>,
    ) -> Result<()> {
        self.inner.alg.eval(args, res, ws)?;
        Ok(())
    }

    /// Jacobian-vector product: output tangents for input tangents `v`
    pub fn jvp(&self, args: &[&[f64]], v: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let alg = &self.inner.alg;
        let mut ws = self.workspace();
        let mut res = zeros(alg.output_sizes());
        let mut tangents = zeros(alg.output_sizes());
        alg.forward(
            args,
            v,
            &mut as_mut_slices(&mut res),
            &mut as_mut_slices(&mut tangents),
            &mut ws,
        )?;
        Ok(tangents)
    }

    /// Vector-Jacobian product: input adjoints for output seeds `w`
    pub fn vjp(&self, args: &[&[f64]], w: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let alg = &self.inner.alg;
        let mut ws = self.workspace();
        let mut res = zeros(alg.output_sizes());
        let mut adj = zeros(alg.input_sizes());
        alg.reverse(
            args,
            &mut as_mut_slices(&mut res),
            w,
            &mut as_mut_slices(&mut adj),
            &mut ws,
        )?;
        Ok(adj)
    }

    /// `(d/dx)(w^T J(x)) v`, the Hessian of `w^T f` applied to `v`
    pub fn hvp(&self, args: &[&[f64]], w: &[&[f64]], v: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let alg = &self.inner.alg;
        if v.len() != args.len() {
            return Err(sxtape_vm::TapeError::Count {
                what: "directions",
                expected: args.len(),
                got: v.len(),
            }
            .into());
        }
        for (index, (x, dx)) in args.iter().zip(v).enumerate() {
            if x.len() != dx.len() {
                return Err(sxtape_vm::TapeError::Length {
                    what: "directions",
                    index,
                    expected: x.len(),
                    got: dx.len(),
                }
                .into());
            }
        }
        let dual_args: Vec<Vec<Dual>> = args
            .iter()
            .zip(v)
            .map(|(x, dx)| x.iter().zip(dx.iter()).map(|(&a, &b)| Dual::new(a, b)).collect())
            .collect();
        let seeds: Vec<Vec<Dual>> = w
            .iter()
            .map(|s| s.iter().map(|&a| Dual::new(a, 0.0)).collect())
            .collect();
        let mut res: Vec<Vec<Dual>> = alg
            .output_sizes()
            .iter()
            .map(|&n| vec![Dual::default(); n])
            .collect();
        let mut adj: Vec<Vec<Dual>> = alg
            .input_sizes()
            .iter()
            .map(|&n| vec![Dual::default(); n])
            .collect();
        let mut ws = Workspace::new(alg);
        alg.reverse(
            &as_slices(&dual_args),
            &mut as_mut_slices(&mut res),
            &as_slices(&seeds),
            &mut as_mut_slices(&mut adj),
            &mut ws,
        )?;
        Ok(adj
            .into_iter()
            .map(|a| a.into_iter().map(|d| d.tangent).collect())
            .collect())
    }

    /// Dense Jacobian of all outputs (stacked) with respect to all inputs
    /// (stacked), as rows. Uses forward sweeps when there are no more
    /// inputs than outputs, reverse sweeps otherwise.
    pub fn jacobian_dense(&self, args: &[&[f64]]) -> Result<Vec<Vec<f64>>> {
        let _span = tracing::debug_span!("sxtape.jacobian", function = %self.name()).entered();
        let alg = &self.inner.alg;
        let cols = stacked(alg.input_sizes());
        let rows = stacked(alg.output_sizes());
        let mut jac = vec![vec![0.0; cols.len()]; rows.len()];
        let mut ws = self.workspace();
        let mut res = zeros(alg.output_sizes());

        if cols.len() <= rows.len() {
            let mut seed = zeros(alg.input_sizes());
            let mut tangents = zeros(alg.output_sizes());
            for (c, &(i, e)) in cols.iter().enumerate() {
                seed[i][e] = 1.0;
                alg.forward(
                    args,
                    &as_slices(&seed),
                    &mut as_mut_slices(&mut res),
                    &mut as_mut_slices(&mut tangents),
                    &mut ws,
                )?;
                seed[i][e] = 0.0;
                for (r, &(o, k)) in rows.iter().enumerate() {
                    jac[r][c] = tangents[o][k];
                }
            }
        } else {
            let mut seed = zeros(alg.output_sizes());
            let mut adj = zeros(alg.input_sizes());
            for (r, &(o, k)) in rows.iter().enumerate() {
                seed[o][k] = 1.0;
                alg.reverse(
                    args,
                    &mut as_mut_slices(&mut res),
                    &as_slices(&seed),
                    &mut as_mut_slices(&mut adj),
                    &mut ws,
                )?;
                seed[o][k] = 0.0;
                for (c, &(i, e)) in cols.iter().enumerate() {
                    jac[r][c] = adj[i][e];
                }
            }
        }
        log::debug!(
            "{}: dense jacobian {}x{}",
            self.name(),
            rows.len(),
            cols.len()
        );
        Ok(jac)
    }

    /// Structural Jacobian pattern, computed once and cached
    pub fn jac_sparsity(&self) -> &Sparsity {
        self.inner
            .jac_sparsity
            .get_or_init(|| self.inner.alg.jac_sparsity())
    }

    /// Sparse Jacobian. Columns that share no row are seeded together, so
    /// the number of forward sweeps is the number of column groups.
    pub fn jacobian_sparse(&self, args: &[&[f64]]) -> Result<SparseMatrix> {
        let _span =
            tracing::debug_span!("sxtape.jacobian_sparse", function = %self.name()).entered();
        let alg = &self.inner.alg;
        let sparsity = self.jac_sparsity().clone();
        let groups = sparsity.column_groups();
        let cols = stacked(alg.input_sizes());
        let rows = stacked(alg.output_sizes());

        let mut nz = vec![0.0; sparsity.nnz()];
        let mut ws = self.workspace();
        let mut res = zeros(alg.output_sizes());
        let mut seed = zeros(alg.input_sizes());
        let mut tangents = zeros(alg.output_sizes());
        for group in &groups {
            for &c in group {
                let (i, e) = cols[c];
                seed[i][e] = 1.0;
            }
            alg.forward(
                args,
                &as_slices(&seed),
                &mut as_mut_slices(&mut res),
                &mut as_mut_slices(&mut tangents),
                &mut ws,
            )?;
            for &c in group {
                let (i, e) = cols[c];
                seed[i][e] = 0.0;
                for (k, &r) in sparsity.column(c).iter().enumerate() {
                    let (o, el) = rows[r];
                    nz[sparsity.colind()[c] + k] = tangents[o][el];
                }
            }
        }
        log::debug!(
            "{}: sparse jacobian with {} nonzeros in {} sweeps",
            self.name(),
            nz.len(),
            groups.len()
        );
        Ok(SparseMatrix { sparsity, nz })
    }

    /// Dense Hessian of scalar output `oind` with respect to all inputs
    /// (stacked), one Hessian-vector product per column
    pub fn hessian_dense(&self, args: &[&[f64]], oind: usize) -> Result<Vec<Vec<f64>>> {
        let alg = &self.inner.alg;
        match alg.output_sizes().get(oind) {
            Some(1) => {}
            Some(&size) => {
                return Err(FunctionError::NotScalar {
                    what: format!("output {oind}"),
                    size,
                })
            }
            None => return Err(FunctionError::UnknownOutput(format!("#{oind}"))),
        }
        let _span = tracing::debug_span!("sxtape.hessian", function = %self.name()).entered();

        let mut w = zeros(alg.output_sizes());
        w[oind][0] = 1.0;
        let cols = stacked(alg.input_sizes());
        let mut hess = vec![vec![0.0; cols.len()]; cols.len()];
        let mut v = zeros(alg.input_sizes());
        for (c, &(i, e)) in cols.iter().enumerate() {
            v[i][e] = 1.0;
            let hv = self.hvp(args, &as_slices(&w), &as_slices(&v))?;
            v[i][e] = 0.0;
            for (r, &(ri, re)) in cols.iter().enumerate() {
                hess[r][c] = hv[ri][re];
            }
        }
        Ok(hess)
    }
}
