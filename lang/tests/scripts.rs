//! Whole-script scenarios: compile, run and inspect complete programs
//! through the public API.

use approx::assert_relative_eq;
use qscript_lang::{compile, Engine, Host, NullHost, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct ConsoleSpy {
    prints: Rc<RefCell<Vec<String>>>,
}

impl Host for ConsoleSpy {
    fn print(&mut self, text: &str) {
        self.prints.borrow_mut().push(text.to_string());
    }
}

fn run_script(source: &str, seed: u64) -> Engine {
    let program = compile(source);
    assert!(program.errors.is_empty(), "errors: {:?}", program.errors);
    let mut engine = Engine::with_seed(program, Box::new(NullHost), seed).unwrap();
    let mut guard = 0;
    while engine.run_step() {
        guard += 1;
        assert!(guard < 1_000_000, "runaway script");
    }
    engine
}

#[test]
fn bell_pair_measurement_statistics() {
    let source = "VectorSize 6\nHadamard 0\nCNot 0, 1";
    let engine = run_script(source, 7);
    let state = engine.state().unwrap();
    assert_relative_eq!(state.probability(0), 0.5, epsilon = 1e-4);
    assert_relative_eq!(state.probability(3), 0.5, epsilon = 1e-4);
    assert_relative_eq!(state.probability(1), 0.0, epsilon = 1e-6);
    assert_relative_eq!(state.probability(2), 0.0, epsilon = 1e-6);

    // Full measurement peeks without collapsing, so sampling repeatedly
    // from the same engine state is meaningful.
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let mut counts = [0usize; 64];
    for _ in 0..10_000 {
        counts[state.measure(&mut rng)] += 1;
    }
    assert!((counts[0] as i64 - 5000).abs() < 200, "counts: {}", counts[0]);
    assert!((counts[3] as i64 - 5000).abs() < 200, "counts: {}", counts[3]);
    assert_eq!(counts[1], 0);
    assert_eq!(counts[2], 0);
}

#[test]
fn qft_inverse_round_trip() {
    let engine = run_script("VectorSize 6\nHadamard 0\nQFT 0, 6\nInvQFT 0, 6", 1);
    let state = engine.state().unwrap();
    let h = std::f64::consts::FRAC_1_SQRT_2;
    assert_relative_eq!(state.amplitude(0).re as f64, h, epsilon = 1e-4);
    assert_relative_eq!(state.amplitude(1).re as f64, h, epsilon = 1e-4);
    for i in 2..state.dimension() {
        assert!(state.probability(i) < 1e-6, "leak at index {i}");
    }
}

#[test]
fn for_loop_scoping_in_proc() {
    let spy = ConsoleSpy::default();
    let prints = spy.prints.clone();
    let source = "proc f a\nfor i=0; i<3; i=i+1\nPrint i\nendfor\nendproc\nf 0";
    let program = compile(source);
    assert!(program.errors.is_empty());
    let mut engine = Engine::with_seed(program, Box::new(spy), 3).unwrap();
    while engine.run_step() {}

    assert_eq!(*prints.borrow(), vec!["0", "1", "2"]);
    // After the call returns, i lives in f's scope, not __main__'s.
    assert_eq!(engine.cell("f_i"), Some(&Value::Int(3)));
    assert_eq!(engine.cell("__main___i"), None);
}

#[test]
fn step_back_reversibility() {
    let program = compile("VectorSize 6\nHadamard 0\nHadamard 1");
    let mut engine = Engine::with_seed(program, Box::new(NullHost), 5).unwrap();
    while engine.run_step() {}

    engine.step_back();
    engine.step_back();
    let state = engine.state().unwrap();
    assert_relative_eq!(state.probability(0), 1.0, epsilon = 1e-6);
    for i in 1..state.dimension() {
        assert!(state.probability(i) < 1e-10);
    }

    engine.step_back();
    assert!(engine.is_start());
}

#[test]
fn exp_mod_n_spreads_into_high_register() {
    // Prepare a uniform 4-bit argument register, then map |j⟩|0⟩ to
    // |j⟩|7^j mod 15⟩. Each surviving amplitude has magnitude 1/4.
    let source = "VectorSize 8\nfor i=0; i<4; i=i+1\nHadamard i\nendfor\nExpModN 7, 15, 4";
    let engine = run_script(source, 2);
    let state = engine.state().unwrap();

    let mut expected = [0usize; 16];
    let mut power = 1usize;
    for (j, slot) in expected.iter_mut().enumerate() {
        *slot = (power << 4) + j;
        power = (power * 7) % 15;
    }
    for &index in expected.iter() {
        assert_relative_eq!(state.probability(index), 1.0 / 16.0, epsilon = 1e-4);
    }
    assert_relative_eq!(state.norm_sqr(), 1.0, epsilon = 1e-3);
}

#[test]
fn qubit_range_errors_do_not_stop_the_run() {
    // Hadamards past the register width are skipped with an error; the
    // rest of the script still executes.
    let source = "VectorSize 6\nfor i=0; i<16; i=i+1\nHadamard i\nendfor\nSigmaX 0";
    let program = compile(source);
    assert!(program.errors.is_empty());
    let mut engine = Engine::with_seed(program, Box::new(NullHost), 4).unwrap();
    let mut range_errors = 0;
    while engine.run_step() {
        if engine
            .errors()
            .iter()
            .any(|e| e.starts_with("Qubit number out of range"))
        {
            range_errors += 1;
        }
    }
    assert_eq!(range_errors, 10);
    assert!(engine.is_done());
}

#[test]
fn shor_period_finding_post_processing() {
    // The quantum half of period finding followed by the classical
    // continued-fraction step: factor 15 with base 7 (period 4).
    let source = "\
VectorSize 8
for i=0; i<4; i=i+1
Hadamard i
endfor
ExpModN 7, 15, 4
InvQFT 0, 4
Measure
";
    let engine = run_script(source, 11);
    let state = engine.state().unwrap();

    // The argument register interferes to multiples of 2^w / r = 4,
    // delivered in bit-reversed order because the Fourier window carries
    // no swap layer: reversed readings {0,4,8,12} appear as {0,1,2,3}.
    let reverse4 = |i: usize| {
        (0..4).fold(0usize, |acc, bit| acc | (((i >> bit) & 1) << (3 - bit)))
    };
    let mut support: Vec<usize> = (0..state.dimension())
        .filter(|&i| state.probability(i) / state.norm_sqr() > 1e-3)
        .map(|i| i & 0xF)
        .collect();
    support.sort_unstable();
    support.dedup();
    assert_eq!(support, vec![0, 1, 2, 3]);
    let mut peaks: Vec<usize> = support.iter().map(|&m| reverse4(m)).collect();
    peaks.sort_unstable();
    assert_eq!(peaks, vec![0, 4, 8, 12]);

    // A nonzero reading recovers the period denominator.
    let (_, q) = qscript_sim::numeric::frac_approx(4, 16, 4);
    assert_eq!(q, 4);
    assert_eq!(qscript_sim::numeric::exp_mod(7, 4, 15), 1);
}

#[test]
fn nested_procs_and_globals() {
    let source = "\
_count = 0
proc outer
proc inner
_count = _count + 1
endproc
inner
inner
endproc
outer
outer
";
    let engine = run_script(source, 1);
    assert_eq!(engine.cell("__count"), Some(&Value::Int(4)));
}

#[test]
fn measured_value_drives_classical_control() {
    let source = "\
VectorSize 6
SigmaX 2
Measure
if measured_value == 4
hit = 1
else
hit = 0
endif
";
    let engine = run_script(source, 6);
    assert_eq!(engine.cell("__main___hit"), Some(&Value::Int(1)));
}

#[test]
fn decoherence_keeps_running() {
    let engine = run_script("VectorSize 6\nHadamard 0\nDecoherence 0.25\nMeasure", 13);
    let outcome = engine.measured_value();
    assert!(outcome == 0 || outcome == 1);
}

#[test]
fn shift_left_then_right_restores_low_register() {
    let engine = run_script("VectorSize 6\nSigmaX 0\nShiftLeft 2\nShiftRight 2", 1);
    let state = engine.state().unwrap();
    assert_relative_eq!(state.probability(1), 1.0, epsilon = 1e-6);
}

#[test]
fn compile_errors_are_reported_with_lines() {
    let program = compile("Hadamard 0\nFrobnicate 1\nCNot 0\nendif");
    assert_eq!(
        program.errors,
        vec![
            "Unknown command in line 2".to_string(),
            "Wrong number of arguments in line 3".to_string(),
            "Syntax error in line 4".to_string(),
        ]
    );
}
