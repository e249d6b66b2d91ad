//! Tape interpreter
//!
//! All sweeps are generic over [`Scalar`], so one implementation serves
//! numeric evaluation (`f64`), symbolic re-evaluation ([`SxElem`]) and
//! second-order products ([`Dual`](crate::Dual)).
//!
//! [`SxElem`]: sxtape_symbolic::SxElem

use crate::algorithm::Algorithm;
use crate::{Result, TapeError};
use sxtape_symbolic::{add, derivatives, mul, Op, Scalar};

/// Scratch memory for the sweeps. One workspace may be reused across any
/// number of calls on tapes of any size; it grows on demand.
#[derive(Debug, Clone)]
pub struct Workspace<T> {
    work: Vec<T>,
    seeds: Vec<T>,
    trace: Vec<T>,
}

impl<T: Scalar> Workspace<T> {
    pub fn new(alg: &Algorithm) -> Self {
        Workspace {
            work: vec![T::zero(); alg.work_size()],
            seeds: vec![T::zero(); alg.work_size()],
            trace: Vec::with_capacity(alg.len()),
        }
    }

    fn fit(&mut self, alg: &Algorithm) {
        if self.work.len() < alg.work_size() {
            self.work.resize(alg.work_size(), T::zero());
            self.seeds.resize(alg.work_size(), T::zero());
        }
    }
}

impl<T: Scalar> Default for Workspace<T> {
    fn default() -> Self {
        Workspace {
            work: Vec::new(),
            seeds: Vec::new(),
            trace: Vec::new(),
        }
    }
}

fn check_shape(what: &'static str, sizes: &[usize], got: impl ExactSizeIterator<Item = usize>) -> Result<()> {
    if got.len() != sizes.len() {
        return Err(TapeError::Count {
            what,
            expected: sizes.len(),
            got: got.len(),
        });
    }
    for (index, (n, &expected)) in got.zip(sizes).enumerate() {
        if n != expected {
            return Err(TapeError::Length {
                what,
                index,
                expected,
                got: n,
            });
        }
    }
    Ok(())
}

/// `d * t`, or nothing if either factor is a structural zero
#[inline]
fn chain<T: Scalar>(d: &T, t: &T) -> Option<T> {
    if d.is_structural_zero() || t.is_structural_zero() {
        None
    } else {
        Some(mul(d, t))
    }
}

#[inline]
fn accumulate<T: Scalar>(acc: &mut T, term: T) {
    *acc = if acc.is_structural_zero() {
        term
    } else {
        add(acc, &term)
    };
}

impl Algorithm {
    fn check_args<T>(&self, args: &[&[T]]) -> Result<()> {
        check_shape("inputs", self.input_sizes(), args.iter().map(|a| a.len()))
    }

    fn check_res<T>(&self, what: &'static str, res: &[&mut [T]]) -> Result<()> {
        check_shape(what, self.output_sizes(), res.iter().map(|r| r.len()))
    }

    /// Evaluate the outputs at `args`, writing them into `res`
    pub fn eval<T: Scalar>(
        &self,
        args: &[&[T]],
        res: &mut [&mut [T]],
        ws: &mut Workspace<T>,
    ) -> Result<()> {
        self.check_args(args)?;
        self.check_res("outputs", res)?;
        ws.fit(self);
        let w = &mut ws.work;

        for a in self.ops() {
            let (i1, i2) = a.slots();
            let (i0, i1, i2) = (a.i0 as usize, i1 as usize, i2 as usize);
            match a.op {
                Op::Const => w[i0] = T::from_f64(a.literal()),
                Op::Input => w[i0] = args[i1][i2].clone(),
                Op::Output => res[i0][i2] = w[i1].clone(),
                op => w[i0] = T::apply(op, &w[i1], &w[i2]),
            }
        }
        Ok(())
    }

    /// Evaluate the outputs and push one tangent direction through the
    /// tape alongside them
    pub fn forward<T: Scalar>(
        &self,
        args: &[&[T]],
        arg_tangents: &[&[T]],
        res: &mut [&mut [T]],
        res_tangents: &mut [&mut [T]],
        ws: &mut Workspace<T>,
    ) -> Result<()> {
        self.check_args(args)?;
        self.check_args(arg_tangents)?;
        self.check_res("outputs", res)?;
        self.check_res("output tangents", res_tangents)?;
        ws.fit(self);
        let Workspace { work: w, seeds: t, .. } = ws;

        for a in self.ops() {
            let (i1, i2) = a.slots();
            let (i0, i1, i2) = (a.i0 as usize, i1 as usize, i2 as usize);
            match a.op {
                Op::Const => {
                    w[i0] = T::from_f64(a.literal());
                    t[i0] = T::zero();
                }
                Op::Input => {
                    w[i0] = args[i1][i2].clone();
                    t[i0] = arg_tangents[i1][i2].clone();
                }
                Op::Output => {
                    res[i0][i2] = w[i1].clone();
                    res_tangents[i0][i2] = t[i1].clone();
                }
                op => {
                    // i0 may alias an operand, so read everything first
                    let f = T::apply(op, &w[i1], &w[i2]);
                    let [d0, d1] = derivatives(op, &w[i1], &w[i2], &f);
                    let dx = chain(&d0, &t[i1]);
                    let dy = if op.arity() == 2 {
                        chain(&d1, &t[i2])
                    } else {
                        None
                    };
                    t[i0] = match (dx, dy) {
                        (Some(a), Some(b)) => add(&a, &b),
                        (Some(a), None) | (None, Some(a)) => a,
                        (None, None) => T::zero(),
                    };
                    w[i0] = f;
                }
            }
        }
        Ok(())
    }

    /// Evaluate the outputs, then pull the output seeds back to the inputs.
    ///
    /// `arg_adjoints` is overwritten with the vector-Jacobian product.
    pub fn reverse<T: Scalar>(
        &self,
        args: &[&[T]],
        res: &mut [&mut [T]],
        res_seeds: &[&[T]],
        arg_adjoints: &mut [&mut [T]],
        ws: &mut Workspace<T>,
    ) -> Result<()> {
        self.check_args(args)?;
        self.check_res("outputs", res)?;
        check_shape(
            "output seeds",
            self.output_sizes(),
            res_seeds.iter().map(|s| s.len()),
        )?;
        check_shape(
            "input adjoints",
            self.input_sizes(),
            arg_adjoints.iter().map(|s| s.len()),
        )?;
        ws.fit(self);
        let Workspace {
            work: w,
            seeds: adj,
            trace,
        } = ws;

        // Primal sweep, keeping every intermediate since slots get reused
        trace.clear();
        for a in self.ops() {
            let (i1, i2) = a.slots();
            let (i0, i1, i2) = (a.i0 as usize, i1 as usize, i2 as usize);
            let v = match a.op {
                Op::Const => T::from_f64(a.literal()),
                Op::Input => args[i1][i2].clone(),
                Op::Output => {
                    res[i0][i2] = w[i1].clone();
                    trace.push(w[i1].clone());
                    continue;
                }
                op => T::apply(op, &w[i1], &w[i2]),
            };
            w[i0] = v.clone();
            trace.push(v);
        }

        for a in adj.iter_mut() {
            *a = T::zero();
        }
        for arg in arg_adjoints.iter_mut() {
            for a in arg.iter_mut() {
                *a = T::zero();
            }
        }

        for (k, a) in self.ops().iter().enumerate().rev() {
            let (i1, i2) = a.slots();
            let (i0, i1, i2) = (a.i0 as usize, i1 as usize, i2 as usize);
            match a.op {
                Op::Output => {
                    let seed = &res_seeds[i0][i2];
                    if !seed.is_structural_zero() {
                        accumulate(&mut adj[i1], seed.clone());
                    }
                }
                Op::Input => {
                    let s = std::mem::replace(&mut adj[i0], T::zero());
                    if !s.is_structural_zero() {
                        accumulate(&mut arg_adjoints[i1][i2], s);
                    }
                }
                Op::Const => adj[i0] = T::zero(),
                op => {
                    let s = std::mem::replace(&mut adj[i0], T::zero());
                    if s.is_structural_zero() {
                        continue;
                    }
                    let [dx, dy] = self.defs(k);
                    let (x, y, f) = (&trace[dx], &trace[dy], &trace[k]);
                    let [d0, d1] = derivatives(op, x, y, f);
                    if let Some(term) = chain(&d0, &s) {
                        accumulate(&mut adj[i1], term);
                    }
                    if op.arity() == 2 {
                        if let Some(term) = chain(&d1, &s) {
                            accumulate(&mut adj[i2], term);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
