//! The function facade

use crate::numeric::{as_mut_slices, as_slices, NumericFunction, SparseMatrix};
use crate::{FunctionError, FunctionOptions, Result};
use std::collections::HashSet;
use std::fmt;
use sxtape_symbolic::{Op, SxElem};
use sxtape_vm::{compile, Algorithm, Sparsity, Workspace};

/// Symbolic inputs and outputs the tape was compiled from
struct Graph {
    inputs: Vec<Vec<SxElem>>,
    outputs: Vec<Vec<SxElem>>,
}

/// A function of named vector inputs to named vector outputs, compiled
/// from an expression graph.
///
/// Numeric requests run on the tape. Symbolic derivative requests run the
/// same tape over expression handles and need the original inputs, so
/// they fail once [`SxFunction::clear_symbolic`] has been called.
pub struct SxFunction {
    numeric: NumericFunction,
    options: FunctionOptions,
    graph: Option<Graph>,
}

fn check_names(names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(FunctionError::DuplicateName(n.clone()));
        }
    }
    Ok(())
}

fn sx_zeros(sizes: &[usize]) -> Vec<Vec<SxElem>> {
    sizes.iter().map(|&n| vec![SxElem::zero(); n]).collect()
}

/// Columns of `d outputs[oind] / d inputs[iind]` by symbolic forward
/// sweeps, returned as rows
fn forward_jacobian(
    alg: &Algorithm,
    inputs: &[Vec<SxElem>],
    iind: usize,
    oind: usize,
) -> Result<Vec<Vec<SxElem>>> {
    let n = inputs[iind].len();
    let m = alg.output_sizes()[oind];
    let mut jac = vec![vec![SxElem::zero(); n]; m];
    let mut ws = Workspace::default();
    let mut seeds = sx_zeros(alg.input_sizes());
    let mut res = sx_zeros(alg.output_sizes());
    let mut tangents = sx_zeros(alg.output_sizes());
    for j in 0..n {
        seeds[iind][j] = SxElem::one();
        alg.forward(
            &as_slices(inputs),
            &as_slices(&seeds),
            &mut as_mut_slices(&mut res),
            &mut as_mut_slices(&mut tangents),
            &mut ws,
        )?;
        seeds[iind][j] = SxElem::zero();
        for (r, row) in jac.iter_mut().enumerate() {
            row[j] = tangents[oind][r].clone();
        }
    }
    Ok(jac)
}

macro_rules! numeric_delegate {
    ($($(#[$meta:meta])* fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self $(, $arg: $ty)*) -> $ret {
                self.numeric.$name($($arg),*)
            }
        )*
    };
}

impl SxFunction {
    /// Compile `outputs` as a function of `inputs`.
    ///
    /// Every input element must be a distinct symbolic primitive and the
    /// outputs may only depend on those symbols. Input names, and output
    /// names, must be unique.
    pub fn new<I, O>(
        name: impl Into<String>,
        inputs: Vec<(I, Vec<SxElem>)>,
        outputs: Vec<(O, Vec<SxElem>)>,
        options: FunctionOptions,
    ) -> Result<Self>
    where
        I: Into<String>,
        O: Into<String>,
    {
        let name = name.into();
        let (names_in, inputs): (Vec<String>, Vec<Vec<SxElem>>) =
            inputs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        let (names_out, outputs): (Vec<String>, Vec<Vec<SxElem>>) =
            outputs.into_iter().map(|(n, v)| (n.into(), v)).unzip();
        check_names(&names_in)?;
        check_names(&names_out)?;

        let alg = compile(&inputs, &outputs, &options.compile_options())?;
        if options.verbose {
            log::debug!("{name}: algorithm\n{alg}");
        }
        log::debug!(
            "{name}: {} operations, work size {}",
            alg.len(),
            alg.work_size()
        );

        Ok(SxFunction {
            numeric: NumericFunction::new(name, names_in, names_out, alg),
            options,
            graph: Some(Graph { inputs, outputs }),
        })
    }

    /// Thread-safe handle on the compiled tape
    pub fn numeric(&self) -> NumericFunction {
        self.numeric.clone()
    }

    pub fn options(&self) -> &FunctionOptions {
        &self.options
    }

    numeric_delegate! {
        fn name(&self) -> &str;
        fn algorithm(&self) -> &Algorithm;
        fn n_in(&self) -> usize;
        fn n_out(&self) -> usize;
        fn name_in(&self, i: usize) -> Option<&str>;
        fn name_out(&self, i: usize) -> Option<&str>;
        fn index_in(&self, name: &str) -> Result<usize>;
        fn index_out(&self, name: &str) -> Result<usize>;
        fn size_in(&self, i: usize) -> Option<usize>;
        fn size_out(&self, i: usize) -> Option<usize>;
        fn algorithm_size(&self) -> usize;
        fn work_size(&self) -> usize;
        /// Panics if `k >= algorithm_size()`
        fn atomic_operation(&self, k: usize) -> Op;
        fn atomic_input(&self, k: usize) -> (u32, u32);
        fn atomic_input_real(&self, k: usize) -> f64;
        fn atomic_output(&self, k: usize) -> u32;
        fn count_nodes(&self) -> usize;
        fn workspace(&self) -> Workspace<f64>;
        fn evaluate(&self, args: &[&[f64]]) -> Result<Vec<Vec<f64>>>;
        fn evaluate_into(
            &self,
            args: &[&[f64]],
            res: &mut [&mut [f64]],
            ws: &mut Workspace<f64>
        ) -> Result<()>;
        fn jvp(&self, args: &[&[f64]], v: &[&[f64]]) -> Result<Vec<Vec<f64>>>;
        fn vjp(&self, args: &[&[f64]], w: &[&[f64]]) -> Result<Vec<Vec<f64>>>;
        fn hvp(&self, args: &[&[f64]], w: &[&[f64]], v: &[&[f64]]) -> Result<Vec<Vec<f64>>>;
        fn jacobian_dense(&self, args: &[&[f64]]) -> Result<Vec<Vec<f64>>>;
        fn jac_sparsity(&self) -> &Sparsity;
        fn jacobian_sparse(&self, args: &[&[f64]]) -> Result<SparseMatrix>;
        fn hessian_dense(&self, args: &[&[f64]], oind: usize) -> Result<Vec<Vec<f64>>>;
    }

    fn graph(&self) -> Result<&Graph> {
        self.graph
            .as_ref()
            .ok_or_else(|| FunctionError::SymbolicCleared(self.name().to_string()))
    }

    pub fn has_symbolic(&self) -> bool {
        self.graph.is_some()
    }

    /// Drop the symbolic inputs and outputs. Numeric evaluation and
    /// [`SxFunction::call_sx`] keep working.
    pub fn clear_symbolic(&mut self) {
        if self.graph.take().is_some() {
            log::debug!("{}: symbolic graph cleared", self.name());
        }
    }

    pub fn inputs(&self) -> Result<&[Vec<SxElem>]> {
        Ok(&self.graph()?.inputs)
    }

    pub fn outputs(&self) -> Result<&[Vec<SxElem>]> {
        Ok(&self.graph()?.outputs)
    }

    fn check_iind(&self, iind: usize) -> Result<()> {
        if iind < self.n_in() {
            Ok(())
        } else {
            Err(FunctionError::UnknownInput(format!("#{iind}")))
        }
    }

    fn check_oind(&self, oind: usize) -> Result<()> {
        if oind < self.n_out() {
            Ok(())
        } else {
            Err(FunctionError::UnknownOutput(format!("#{oind}")))
        }
    }

    /// Evaluate the tape on expressions, giving the outputs in terms of
    /// `args`
    pub fn call_sx(&self, args: &[Vec<SxElem>]) -> Result<Vec<Vec<SxElem>>> {
        let alg = self.algorithm();
        let mut res = sx_zeros(alg.output_sizes());
        let mut ws = Workspace::default();
        alg.eval(&as_slices(args), &mut as_mut_slices(&mut res), &mut ws)?;
        Ok(res)
    }

    /// Jacobian of output `oind` with respect to input `iind`, as rows
    pub fn jac_expr(&self, iind: usize, oind: usize) -> Result<Vec<Vec<SxElem>>> {
        self.check_iind(iind)?;
        self.check_oind(oind)?;
        let graph = self.graph()?;
        forward_jacobian(self.algorithm(), &graph.inputs, iind, oind)
    }

    /// Gradient of scalar output `oind` with respect to input `iind`
    pub fn grad_expr(&self, iind: usize, oind: usize) -> Result<Vec<SxElem>> {
        self.check_iind(iind)?;
        self.check_oind(oind)?;
        let alg = self.algorithm();
        let size = alg.output_sizes()[oind];
        if size != 1 {
            return Err(FunctionError::NotScalar {
                what: format!("output '{}'", self.name_out(oind).unwrap_or_default()),
                size,
            });
        }
        let graph = self.graph()?;
        let mut seeds = sx_zeros(alg.output_sizes());
        seeds[oind][0] = SxElem::one();
        let mut res = sx_zeros(alg.output_sizes());
        let mut adj = sx_zeros(alg.input_sizes());
        let mut ws = Workspace::default();
        alg.reverse(
            &as_slices(&graph.inputs),
            &mut as_mut_slices(&mut res),
            &as_slices(&seeds),
            &mut as_mut_slices(&mut adj),
            &mut ws,
        )?;
        Ok(adj.swap_remove(iind))
    }

    /// Derivative of output `oind` along scalar input `iind`
    pub fn tang_expr(&self, iind: usize, oind: usize) -> Result<Vec<SxElem>> {
        self.check_iind(iind)?;
        self.check_oind(oind)?;
        let size = self.algorithm().input_sizes()[iind];
        if size != 1 {
            return Err(FunctionError::NotScalar {
                what: format!("input '{}'", self.name_in(iind).unwrap_or_default()),
                size,
            });
        }
        let graph = self.graph()?;
        let jac = forward_jacobian(self.algorithm(), &graph.inputs, iind, oind)?;
        Ok(jac.into_iter().map(|mut row| row.swap_remove(0)).collect())
    }

    /// Hessian of scalar output `oind` with respect to input `iind`
    pub fn hess_expr(&self, iind: usize, oind: usize) -> Result<Vec<Vec<SxElem>>> {
        let grad = self.grad_expr(iind, oind)?;
        let _span = tracing::debug_span!("sxtape.hess_expr", function = %self.name()).entered();
        let graph = self.graph()?;
        let grad_alg = compile(
            &graph.inputs,
            &[grad],
            &self.options.compile_options(),
        )?;
        forward_jacobian(&grad_alg, &graph.inputs, iind, 0)
    }
}

impl fmt::Display for SxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |names: Vec<&str>| names.join(",");
        let ins = join((0..self.n_in()).filter_map(|i| self.name_in(i)).collect());
        let outs = join((0..self.n_out()).filter_map(|i| self.name_out(i)).collect());
        write!(f, "{}:({})->({}) SxFunction", self.name(), ins, outs)
    }
}

impl fmt::Debug for SxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SxFunction")
            .field("name", &self.name())
            .field("algorithm_size", &self.algorithm_size())
            .field("work_size", &self.work_size())
            .field("symbolic", &self.has_symbolic())
            .finish()
    }
}
