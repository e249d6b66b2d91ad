use approx::assert_relative_eq;
use proptest::prelude::*;
use sxtape_symbolic::{if_else, treewalk_eval, SxElem};
use sxtape_vm::{compile, Algorithm, CompileOptions, Dual, Workspace};

/// f(x0, x1, x2) = [x0 x1 + sin(x2) exp(x0), atan2(x1, x2) + x0^2 / (1 + x1^2)]
fn model() -> (Vec<SxElem>, Vec<SxElem>) {
    let x = SxElem::sym_vec("x", 3);
    let f0 = &x[0] * &x[1] + x[2].sin() * x[0].exp();
    let f1 = x[1].atan2(&x[2]) + x[0].sq() / (1.0 + x[1].sq());
    (x, vec![f0, f1])
}

/// One output per operator family, over inputs `a` in (-0.8, 0.8),
/// `b` in (1.2, 3) and `c` in (-2, 2), where every operator is smooth
/// almost everywhere.
fn operator_table() -> (Vec<SxElem>, Vec<SxElem>) {
    let x = SxElem::sym_vec("x", 3);
    let (a, b, c) = (&x[0], &x[1], &x[2]);
    let f = vec![
        a.tan() + a.atan(),
        a.asin() * b + a.acos() * c,
        b.acosh() * a.atanh(),
        b.pow(c),
        b.powf(2.5) + b.log() * b.sqrt(),
        c.fmod(b) + c.copysign(a),
        (a * c).erf(),
        a.fmin(c) * b.fmax(c),
        c.sinh() - c.cosh() * c.tanh() + c.asinh(),
        c.fabs() + b.inv() + a.exp(),
        if_else(&c.lt(a), &(a * b), &c.sq()),
    ];
    (x, f)
}

fn arb_table_point() -> impl Strategy<Value = [f64; 3]> {
    (-0.8..0.8f64, 1.2..3.0f64, -2.0..2.0f64).prop_map(|(a, b, c)| [a, b, c])
}

fn compiled(options: CompileOptions) -> (Vec<SxElem>, Vec<SxElem>, Algorithm) {
    let (x, f) = model();
    let alg = compile(&[x.clone()], &[f.clone()], &options).unwrap();
    (x, f, alg)
}

fn eval(alg: &Algorithm, x: &[f64]) -> Vec<f64> {
    let mut ws = Workspace::new(alg);
    let mut out = vec![0.0; alg.nnz_out()];
    alg.eval(&[x], &mut [out.as_mut_slice()], &mut ws).unwrap();
    out
}

fn arb_point() -> impl Strategy<Value = [f64; 3]> {
    (-2.0..2.0f64, -2.0..2.0f64, 0.5..3.0f64).prop_map(|(a, b, c)| [a, b, c])
}

proptest! {
    #[test]
    fn forward_and_reverse_agree(x in arb_point(), v in arb_point(), w in (-1.0..1.0f64, -1.0..1.0f64)) {
        let (_, _, alg) = compiled(CompileOptions::default());
        let mut ws = Workspace::new(&alg);

        let mut out = [0.0; 2];
        let mut jv = [0.0; 2];
        alg.forward(&[&x[..]], &[&v[..]], &mut [&mut out], &mut [&mut jv], &mut ws).unwrap();

        let seeds = [w.0, w.1];
        let mut jtw = [0.0; 3];
        alg.reverse(&[&x[..]], &mut [&mut out], &[&seeds[..]], &mut [&mut jtw], &mut ws).unwrap();

        let lhs = seeds[0] * jv[0] + seeds[1] * jv[1];
        let rhs: f64 = jtw.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
        prop_assert!((lhs - rhs).abs() <= 1e-10 * (1.0 + lhs.abs()));
    }

    #[test]
    fn forward_and_reverse_agree_over_operator_table(
        x in arb_table_point(),
        v in arb_point(),
        w in proptest::collection::vec(-1.0..1.0f64, 11),
    ) {
        let (syms, f) = operator_table();
        for cse in [true, false] {
            let options = CompileOptions { cse, live_variables: true };
            let alg = compile(&[syms.clone()], &[f.clone()], &options).unwrap();
            let mut ws = Workspace::new(&alg);

            let mut out = vec![0.0; f.len()];
            let mut jv = vec![0.0; f.len()];
            alg.forward(&[&x[..]], &[&v[..]], &mut [&mut out[..]], &mut [&mut jv[..]], &mut ws).unwrap();

            let mut jtw = [0.0; 3];
            alg.reverse(&[&x[..]], &mut [&mut out[..]], &[&w[..]], &mut [&mut jtw[..]], &mut ws).unwrap();

            let lhs: f64 = w.iter().zip(&jv).map(|(a, b)| a * b).sum();
            let rhs: f64 = jtw.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            let scale: f64 = 1.0 + jv.iter().map(|t| t.abs()).sum::<f64>();
            prop_assert!((lhs - rhs).abs() <= 1e-9 * scale, "cse={} lhs={} rhs={}", cse, lhs, rhs);
        }
    }

    #[test]
    fn tape_matches_graph_evaluation(x in arb_point()) {
        let (syms, f, alg) = compiled(CompileOptions::default());
        let bindings: Vec<(SxElem, f64)> = syms.into_iter().zip(x).collect();
        let expected = treewalk_eval(&f, &bindings).unwrap();
        let got = eval(&alg, &x);
        for (a, b) in got.iter().zip(&expected) {
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn compile_options_do_not_change_values(x in arb_point()) {
        let reference = eval(&compiled(CompileOptions::default()).2, &x);
        for (cse, live_variables) in [(false, true), (true, false), (false, false)] {
            let (_, _, alg) = compiled(CompileOptions { cse, live_variables });
            prop_assert_eq!(eval(&alg, &x), reference.clone());
        }
    }
}

#[test]
fn compile_is_deterministic_across_rebuilt_graphs() {
    let a = compiled(CompileOptions::default()).2;
    let b = compiled(CompileOptions::default()).2;
    assert_eq!(a.to_bytes(), b.to_bytes());
    assert_eq!(a.work_size(), b.work_size());
}

#[test]
fn tree_expansion_never_shrinks_the_tape() {
    let with_cse = compiled(CompileOptions::default()).2;
    let without = compiled(CompileOptions {
        cse: false,
        live_variables: true,
    })
    .2;
    assert!(without.len() >= with_cse.len());
}

#[test]
fn dual_reverse_gives_hessian_vector_product() {
    // f = x0^2 x1 + exp(x1), H = [[2 x1, 2 x0], [2 x0, exp(x1)]]
    let x = SxElem::sym_vec("x", 2);
    let f = x[0].sq() * &x[1] + x[1].exp();
    let alg = compile(&[x], &[vec![f]], &CompileOptions::default()).unwrap();

    let (x0, x1) = (1.5, -0.5);
    let (v0, v1) = (0.3, 2.0);
    let args = [Dual::new(x0, v0), Dual::new(x1, v1)];
    let mut ws = Workspace::new(&alg);
    let mut out = [Dual::default()];
    let mut adj = [Dual::default(); 2];
    alg.reverse(
        &[&args[..]],
        &mut [&mut out[..]],
        &[&[Dual::new(1.0, 0.0)][..]],
        &mut [&mut adj[..]],
        &mut ws,
    )
    .unwrap();

    assert_relative_eq!(adj[0].value, 2.0 * x0 * x1, epsilon = 1e-12);
    assert_relative_eq!(adj[1].value, x0 * x0 + x1.exp(), epsilon = 1e-12);
    assert_relative_eq!(adj[0].tangent, 2.0 * x1 * v0 + 2.0 * x0 * v1, epsilon = 1e-12);
    assert_relative_eq!(adj[1].tangent, 2.0 * x0 * v0 + x1.exp() * v1, epsilon = 1e-12);
}

#[test]
fn deep_chain_compiles_and_evaluates() {
    let x = SxElem::sym("x");
    let mut f = x.clone();
    for _ in 0..100_000 {
        f = f * 0.5 + 0.25;
    }
    let alg = compile(&[vec![x]], &[vec![f]], &CompileOptions::default()).unwrap();
    // the running value plus the two shared constants
    assert_eq!(alg.work_size(), 3);
    let out = eval(&alg, &[0.5]);
    assert_relative_eq!(out[0], 0.5, epsilon = 1e-12);
}
