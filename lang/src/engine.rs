//! Opcode interpreter with a call stack, a reversible history and host
//! callbacks.
//!
//! One call to [`Engine::run_step`] executes exactly one opcode. Every
//! step pushes an undo record (position, call stack, touched cells, the
//! evaluated arguments of a builtin call) so [`Engine::step_back`] can
//! restore the classical state exactly and roll the quantum state back by
//! applying the reverse gate.
//!
//! The engine never stops on its own: breakpoints are exposed through
//! [`Engine::at_breakpoint`] and the driving loop decides when to pause.

use crate::builtins::{self, Builtin, Reverse};
use crate::compiler::{Command, FuncId, Program};
use crate::error::{LangError, Result};
use crate::expr::{self, Env, EvalContext, Expr, Value};
use qscript_sim::{QState, SimError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace, warn};

const NO_REGISTER: &str = "VectorSize must be called before quantum operations";

/// Callbacks surfaced to the embedding host. All methods default to
/// no-ops; implement the ones the host cares about.
pub trait Host {
    fn print(&mut self, _text: &str) {}
    fn breakpoint(&mut self) {}
    fn delay(&mut self, _ms: u64) {}
    fn display(&mut self, _content: &str) {}
    fn set_view_angle(&mut self, _radians: f64) {}
    fn set_view_mode(&mut self, _mode: u32) {}
}

/// Host that ignores every callback.
#[derive(Debug, Default)]
pub struct NullHost;

impl Host for NullHost {}

/// A pending return location plus its display string for the debugger.
#[derive(Debug, Clone)]
pub struct Frame {
    pub func: FuncId,
    pub return_step: usize,
    pub display: String,
}

/// Undo record for one executed step.
#[derive(Debug, Clone)]
struct StepData {
    func: FuncId,
    step: usize,
    stack: Vec<Frame>,
    saved: Vec<(String, Option<Value>)>,
    measured: i64,
    builtin_args: Option<Vec<f64>>,
}

/// The stepping interpreter.
pub struct Engine {
    program: Program,
    host: Box<dyn Host>,
    state: Option<QState>,
    env: Env,
    current_func: FuncId,
    current_step: usize,
    call_stack: Vec<Frame>,
    history: VecDeque<StepData>,
    history_limit: Option<usize>,
    measured_value: i64,
    errors: Vec<String>,
    breakpoints: HashSet<usize>,
    running: bool,
    rng: StdRng,
}

impl Engine {
    /// Build an engine for a compiled program. Programs carrying compile
    /// errors are rejected.
    pub fn new(program: Program, host: Box<dyn Host>) -> Result<Self> {
        Self::with_rng(program, host, StdRng::from_entropy())
    }

    /// Deterministic variant for reproducible runs and tests.
    pub fn with_seed(program: Program, host: Box<dyn Host>, seed: u64) -> Result<Self> {
        Self::with_rng(program, host, StdRng::seed_from_u64(seed))
    }

    fn with_rng(program: Program, host: Box<dyn Host>, rng: StdRng) -> Result<Self> {
        if !program.errors.is_empty() {
            return Err(LangError::CompileErrors(program.errors.len()));
        }
        let main = program.main;
        Ok(Self {
            program,
            host,
            state: None,
            env: Env::new(),
            current_func: main,
            current_step: 0,
            call_stack: Vec::new(),
            history: VecDeque::new(),
            history_limit: None,
            measured_value: 0,
            errors: Vec::new(),
            breakpoints: HashSet::new(),
            running: false,
            rng,
        })
    }

    /// Bound the undo history; the oldest record is dropped once full.
    pub fn set_history_limit(&mut self, limit: Option<usize>) {
        self.history_limit = limit;
    }

    // ==================== Stepping ====================

    /// Execute one opcode. Returns false once the program has finished.
    pub fn run_step(&mut self) -> bool {
        loop {
            let len = self.program.func(self.current_func).code.len();
            if self.current_step < len {
                break;
            }
            match self.call_stack.pop() {
                Some(frame) => {
                    self.current_func = frame.func;
                    self.current_step = frame.return_step;
                }
                None => return false,
            }
        }

        self.errors.clear();
        self.env.begin_step();

        let func = self.current_func;
        let step = self.current_step;
        let stack = self.call_stack.clone();
        let measured = self.measured_value;
        let op = self.program.func(func).code[step].clone();
        trace!(line = op.line, command = ?op.command, "step");

        let mut builtin_args = None;
        match op.command {
            Command::ForInit => {
                if let Some(init) = op.args.first() {
                    self.eval_discard(init, op.line);
                }
                if self.eval_truthy(op.args.get(1), op.line) {
                    self.current_step = step + 2;
                } else {
                    self.current_step = op.target.unwrap_or(step + 1) + 1;
                }
            }
            Command::ForLoop => {
                if let Some(step_expr) = op.args.get(1) {
                    self.eval_discard(step_expr, op.line);
                }
                if self.eval_truthy(op.args.first(), op.line) {
                    self.current_step = step + 1;
                } else {
                    self.current_step = op.target.unwrap_or(step) + 1;
                }
            }
            Command::ForEnd => {
                self.current_step = op.target.unwrap_or(step + 1);
            }
            Command::If => {
                if self.eval_truthy(op.args.first(), op.line) {
                    if let Some(side) = op.args.get(1) {
                        self.eval_discard(side, op.line);
                    }
                    self.current_step = step + 1;
                } else {
                    self.current_step = op.target.unwrap_or(step) + 1;
                }
            }
            Command::Else => {
                self.current_step = op.target.unwrap_or(step) + 1;
            }
            Command::EndIf => {
                self.current_step = step + 1;
            }
            Command::Return => {
                self.current_step = self.program.func(func).code.len();
            }
            Command::Break => {
                // Dereference the loop end through the enclosing ForInit.
                let end = op
                    .target
                    .and_then(|for_init| self.program.func(func).code[for_init].target);
                self.current_step = end.map(|e| e + 1).unwrap_or(step + 1);
            }
            Command::Continue => {
                self.current_step = op.target.map(|t| t + 1).unwrap_or(step + 1);
            }
            Command::Expression => {
                if let Some(e) = op.args.first() {
                    self.eval_discard(e, op.line);
                }
                self.current_step = step + 1;
            }
            Command::CallUser(callee) => {
                let callee_name = self.program.func(callee).name.clone();
                let params = self.program.func(callee).params.clone();
                let mut argv = Vec::with_capacity(params.len());
                for (i, param) in params.iter().enumerate() {
                    let value = match op.args.get(i) {
                        Some(arg) => self.eval_value(arg, op.line),
                        None => Value::Int(0),
                    };
                    let cell = format!("{callee_name}_{param}");
                    self.env.set(&cell, value.clone());
                    argv.push(value.to_string());
                }
                let display = format!("{callee_name}({})", argv.join(", "));
                self.call_stack.push(Frame {
                    func,
                    return_step: step + 1,
                    display,
                });
                self.current_func = callee;
                self.current_step = 0;
            }
            Command::CallBuiltin(builtin) => {
                let values: Vec<Value> =
                    op.args.iter().map(|a| self.eval_value(a, op.line)).collect();
                // Only numeric argument lists can drive a reverse replay;
                // a faulted argument skipped the gate going forward too.
                builtin_args = values.iter().map(|v| v.as_f64().ok()).collect();
                self.exec_builtin(builtin, &values);
                self.current_step = step + 1;
            }
        }

        // Pop call frames as soon as the function runs past its end, so
        // the position always rests on the next opcode to execute.
        loop {
            let len = self.program.func(self.current_func).code.len();
            if self.current_step < len {
                break;
            }
            match self.call_stack.pop() {
                Some(frame) => {
                    self.current_func = frame.func;
                    self.current_step = frame.return_step;
                }
                None => break,
            }
        }

        let saved = self.env.take_touched();
        self.push_history(StepData {
            func,
            step,
            stack,
            saved,
            measured,
            builtin_args,
        });
        true
    }

    /// Execute up to `steps` opcodes; returns how many actually ran.
    pub fn run_steps(&mut self, steps: usize) -> usize {
        let mut executed = 0;
        for _ in 0..steps {
            if !self.run_step() {
                break;
            }
            executed += 1;
        }
        executed
    }

    /// Execute one step; if it entered a user proc, keep going until the
    /// call returns (or the program ends).
    pub fn step_over(&mut self) -> bool {
        let depth = self.call_stack.len();
        if !self.run_step() {
            return false;
        }
        while self.call_stack.len() > depth {
            if !self.run_step() {
                break;
            }
        }
        true
    }

    /// Undo the most recent step: restore position, call stack and
    /// touched cells, and roll the quantum state back by applying the
    /// reverse gate. Irreversible gates leave the state as-is.
    pub fn step_back(&mut self) -> bool {
        let Some(record) = self.history.pop_back() else {
            return false;
        };
        self.errors.clear();

        let command = self.program.func(record.func).code[record.step].command;
        if let (Command::CallBuiltin(builtin), Some(args)) = (command, &record.builtin_args) {
            if self.state.is_some() {
                match builtins::reverse(builtin, args) {
                    Reverse::Apply(reverse_builtin, reverse_args) => {
                        self.apply_gate(reverse_builtin, &reverse_args);
                    }
                    Reverse::SelfInverse => self.apply_gate(builtin, args),
                    Reverse::Skip => {}
                    Reverse::Warn => {
                        warn!("stepping back over an irreversible measurement");
                        self.errors.push(
                            "Cannot reverse Measure; quantum state left unchanged".to_string(),
                        );
                    }
                }
            }
        }

        for (name, previous) in record.saved {
            self.env.restore(&name, previous);
        }
        self.call_stack = record.stack;
        self.current_func = record.func;
        self.current_step = record.step;
        self.measured_value = record.measured;
        true
    }

    /// Forget everything: position, variables, history and the register.
    pub fn reset(&mut self) {
        self.current_func = self.program.main;
        self.current_step = 0;
        self.call_stack.clear();
        self.history.clear();
        self.env.clear();
        self.measured_value = 0;
        self.errors.clear();
        self.state = None;
        self.running = false;
    }

    fn push_history(&mut self, record: StepData) {
        if let Some(limit) = self.history_limit {
            while self.history.len() >= limit.max(1) {
                self.history.pop_front();
            }
        }
        self.history.push_back(record);
    }

    // ==================== Evaluation plumbing ====================

    fn eval_value(&mut self, expr: &Expr, line: usize) -> Value {
        let mut ctx = EvalContext {
            env: &mut self.env,
            measured_value: self.measured_value,
        };
        match expr::eval(expr, &mut ctx) {
            Ok(value) => value,
            Err(fault) => {
                self.errors
                    .push(format!("Runtime fault in line {line}: {fault}"));
                Value::Null
            }
        }
    }

    fn eval_discard(&mut self, expr: &Expr, line: usize) {
        let _ = self.eval_value(expr, line);
    }

    fn eval_truthy(&mut self, expr: Option<&Expr>, line: usize) -> bool {
        expr.map(|e| self.eval_value(e, line).truthy())
            .unwrap_or(false)
    }

    // ==================== Builtin dispatch ====================

    fn exec_builtin(&mut self, builtin: Builtin, values: &[Value]) {
        match builtin {
            Builtin::Print => {
                let text = values.first().map(|v| v.to_string()).unwrap_or_default();
                self.host.print(&text);
            }
            Builtin::Breakpoint => self.host.breakpoint(),
            Builtin::Display => {
                let content = values.first().map(|v| v.to_string()).unwrap_or_default();
                self.host.display(&content);
            }
            Builtin::Delay => {
                if let Some(ms) = self.numeric_arg(values, 0) {
                    let ms = ms as i64;
                    if (1..=10_000).contains(&ms) {
                        self.host.delay(ms as u64);
                    } else {
                        self.errors.push(format!("Delay out of range: {ms}"));
                    }
                }
            }
            Builtin::SetViewAngle => {
                if let Some(radians) = self.numeric_arg(values, 0) {
                    self.host.set_view_angle(radians);
                }
            }
            Builtin::SetViewMode => {
                if let Some(mode) = self.numeric_arg(values, 0) {
                    let mode = mode as i64;
                    if (0..=2).contains(&mode) {
                        self.host.set_view_mode(mode as u32);
                    } else {
                        self.errors.push(format!("View mode out of range: {mode}"));
                    }
                }
            }
            Builtin::VectorSize => {
                let Some(bits) = self.numeric_arg(values, 0) else {
                    return;
                };
                let bits = bits as i64;
                if !(6..=22).contains(&bits) || bits % 2 != 0 {
                    self.errors.push(format!("Vector size out of range: {bits}"));
                    return;
                }
                debug!(qubits = bits, "resetting quantum register");
                match QState::new(bits as usize) {
                    Ok(state) => self.state = Some(state),
                    Err(e) => self.errors.push(e.to_string()),
                }
            }
            Builtin::Measure => {
                let Some(state) = self.state.as_ref() else {
                    self.errors.push(NO_REGISTER.to_string());
                    return;
                };
                self.measured_value = state.measure(&mut self.rng) as i64;
            }
            Builtin::MeasureBit => {
                let Some(qubit) = self.qubit_arg(values, 0) else {
                    return;
                };
                let Some(state) = self.state.as_mut() else {
                    self.errors.push(NO_REGISTER.to_string());
                    return;
                };
                let outcome = state.measure_bit(qubit, &mut self.rng);
                match outcome {
                    Ok(bit) => self.measured_value = bit as i64,
                    Err(e) => self.errors.push(e.to_string()),
                }
            }
            gate => {
                let mut args = Vec::with_capacity(values.len());
                for value in values {
                    match value.as_f64() {
                        Ok(f) => args.push(f),
                        Err(fault) => {
                            self.errors.push(format!("Runtime fault: {fault}"));
                            return;
                        }
                    }
                }
                self.apply_gate(gate, &args);
            }
        }
    }

    fn numeric_arg(&mut self, values: &[Value], index: usize) -> Option<f64> {
        match values.get(index).map(|v| v.as_f64()) {
            Some(Ok(f)) => Some(f),
            Some(Err(fault)) => {
                self.errors.push(format!("Runtime fault: {fault}"));
                None
            }
            None => None,
        }
    }

    fn qubit_arg(&mut self, values: &[Value], index: usize) -> Option<usize> {
        let f = self.numeric_arg(values, index)?;
        if f < 0.0 {
            self.errors
                .push(format!("Qubit number out of range: {}", f as i64));
            return None;
        }
        Some(f as usize)
    }

    /// Apply a gate builtin from plain numeric arguments. Shared between
    /// forward execution and the reverse replay in `step_back`.
    fn apply_gate(&mut self, builtin: Builtin, args: &[f64]) {
        fn uq(f: f64) -> Option<usize> {
            (f >= 0.0).then_some(f as usize)
        }

        let Some(state) = self.state.as_mut() else {
            self.errors.push(NO_REGISTER.to_string());
            return;
        };

        let result: Option<std::result::Result<(), SimError>> = match builtin {
            Builtin::Hadamard => uq(args[0]).map(|q| state.hadamard(q)),
            Builtin::SigmaX => uq(args[0]).map(|q| state.sigma_x(q)),
            Builtin::SigmaY => uq(args[0]).map(|q| state.sigma_y(q)),
            Builtin::SigmaZ => uq(args[0]).map(|q| state.sigma_z(q)),
            Builtin::Rx => uq(args[0]).map(|q| state.rx(q, args[1])),
            Builtin::Ry => uq(args[0]).map(|q| state.ry(q, args[1])),
            Builtin::Rz => uq(args[0]).map(|q| state.rz(q, args[1])),
            Builtin::Unitary => uq(args[0]).map(|q| {
                let mut parts = [0.0f64; 8];
                parts.copy_from_slice(&args[1..9]);
                state.apply_unitary_parts(q, &parts)
            }),
            Builtin::CNot => uq(args[0])
                .zip(uq(args[1]))
                .map(|(c, t)| state.cnot(c, t)),
            Builtin::Swap => uq(args[0])
                .zip(uq(args[1]))
                .map(|(a, b)| state.swap(a, b)),
            Builtin::Toffoli => uq(args[0])
                .zip(uq(args[1]))
                .zip(uq(args[2]))
                .map(|((c1, c2), t)| state.toffoli(c1, c2, t)),
            Builtin::Phase => uq(args[0]).map(|q| state.phase(q, args[1])),
            Builtin::CPhase => uq(args[0])
                .zip(uq(args[1]))
                .map(|(c, t)| state.cphase(c, t, args[2])),
            Builtin::QftCPhase => uq(args[0])
                .zip(uq(args[1]))
                .map(|(c, t)| state.phase_shift(c, t, 1)),
            Builtin::InvQftCPhase => uq(args[0])
                .zip(uq(args[1]))
                .map(|(c, t)| state.phase_shift(c, t, -1)),
            Builtin::Qft => uq(args[0])
                .zip(uq(args[1]))
                .map(|(offset, width)| state.qft(offset, width)),
            Builtin::InvQft => uq(args[0])
                .zip(uq(args[1]))
                .map(|(offset, width)| state.inv_qft(offset, width)),
            Builtin::ShiftLeft => uq(args[0]).map(|bits| state.shift_left(bits)),
            Builtin::ShiftRight => uq(args[0]).map(|bits| state.shift_right(bits)),
            Builtin::ExpModN => uq(args[0])
                .zip(uq(args[1]))
                .zip(uq(args[2]))
                .map(|((x, n), w)| state.exp_mod_n(x as u64, n as u64, w)),
            Builtin::RevExpModN => uq(args[0])
                .zip(uq(args[1]))
                .zip(uq(args[2]))
                .map(|((x, n), w)| state.rev_exp_mod_n(x as u64, n as u64, w)),
            Builtin::Decoherence => Some(state.decoherence(args[0], &mut self.rng)),
            // Everything else never routes through here.
            _ => Some(Ok(())),
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(e)) => self.errors.push(e.to_string()),
            None => {
                let bad = args.iter().find(|a| **a < 0.0).copied().unwrap_or(-1.0);
                self.errors
                    .push(format!("Qubit number out of range: {}", bad as i64));
            }
        }
    }

    // ==================== Snapshots ====================

    pub fn is_done(&self) -> bool {
        self.call_stack.is_empty()
            && self.current_func == self.program.main
            && self.current_step >= self.program.func(self.program.main).code.len()
    }

    pub fn is_start(&self) -> bool {
        self.history.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Source line of the current opcode, or of the last opcode once the
    /// function has run past its end.
    pub fn current_line(&self) -> usize {
        let code = &self.program.func(self.current_func).code;
        if code.is_empty() {
            return 0;
        }
        if self.current_step < code.len() {
            code[self.current_step].line
        } else {
            code[code.len() - 1].line
        }
    }

    pub fn call_stack_display(&self) -> Vec<String> {
        self.call_stack.iter().map(|f| f.display.clone()).collect()
    }

    /// Locals of the current function as (name, value) pairs; cells that
    /// were never written read as zero.
    pub fn locals(&self) -> Vec<(String, Value)> {
        let func = self.program.func(self.current_func);
        func.locals
            .iter()
            .map(|name| {
                let value = self
                    .env
                    .peek(&func.cell(name))
                    .cloned()
                    .unwrap_or(Value::Int(0));
                (name.clone(), value)
            })
            .collect()
    }

    /// Errors and warnings produced by the most recent step.
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn measured_value(&self) -> i64 {
        self.measured_value
    }

    pub fn state(&self) -> Option<&QState> {
        self.state.as_ref()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn add_breakpoint(&mut self, line: usize) {
        self.breakpoints.insert(line);
    }

    pub fn remove_breakpoint(&mut self, line: usize) {
        self.breakpoints.remove(&line);
    }

    pub fn at_breakpoint(&self) -> bool {
        self.breakpoints.contains(&self.current_line())
    }

    /// Read a variable by its scoped cell name (debug helper).
    pub fn cell(&self, name: &str) -> Option<&Value> {
        self.env.peek(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use approx::assert_relative_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingHost {
        prints: Rc<RefCell<Vec<String>>>,
        delays: Rc<RefCell<Vec<u64>>>,
    }

    impl Host for RecordingHost {
        fn print(&mut self, text: &str) {
            self.prints.borrow_mut().push(text.to_string());
        }
        fn delay(&mut self, ms: u64) {
            self.delays.borrow_mut().push(ms);
        }
    }

    fn engine_for(source: &str) -> Engine {
        Engine::with_seed(compile(source), Box::new(NullHost), 99).expect("engine")
    }

    fn run_to_end(engine: &mut Engine) {
        let mut guard = 0;
        while engine.run_step() {
            guard += 1;
            assert!(guard < 100_000, "runaway script");
        }
    }

    #[test]
    fn test_rejects_programs_with_errors() {
        let program = compile("Frobnicate");
        assert!(Engine::new(program, Box::new(NullHost)).is_err());
    }

    #[test]
    fn test_expression_steps_and_locals() {
        let mut engine = engine_for("x = 1\nx = x + 1");
        run_to_end(&mut engine);
        assert!(engine.is_done());
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(2)));
        let locals = engine.locals();
        assert_eq!(locals, vec![("x".to_string(), Value::Int(2))]);
    }

    #[test]
    fn test_for_loop_prints_each_iteration() {
        let host = RecordingHost::default();
        let prints = host.prints.clone();
        let program = compile("proc f a\nfor i=0; i<3; i=i+1\nPrint i\nendfor\nendproc\nf 0");
        let mut engine = Engine::with_seed(program, Box::new(host), 1).unwrap();
        run_to_end(&mut engine);
        assert_eq!(*prints.borrow(), vec!["0", "1", "2"]);
        // The loop variable belongs to f, not __main__.
        assert_eq!(engine.cell("f_i"), Some(&Value::Int(3)));
        assert_eq!(engine.cell("__main___i"), None);
    }

    #[test]
    fn test_two_clause_for() {
        let mut engine = engine_for("x = 0\nfor i=0; i<3\ni = i + 1\nx = x + 1\nendfor");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_break() {
        let mut engine =
            engine_for("x = 0\nfor i=0; i<10; i=i+1\nif i == 3\nbreak\nendif\nx = x + 1\nendfor");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(3)));
        assert_eq!(engine.cell("__main___i"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_continue() {
        let mut engine =
            engine_for("x = 0\nfor i=0; i<5; i=i+1\nif i % 2 == 0\ncontinue\nendif\nx = x + 1\nendfor");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_if_else_branches() {
        let mut engine = engine_for("x = 1\nif x == 1\ny = 10\nelse\ny = 20\nendif");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___y"), Some(&Value::Int(10)));

        let mut engine = engine_for("x = 2\nif x == 1\ny = 10\nelse\ny = 20\nendif");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___y"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_if_side_effect_expression() {
        let mut engine = engine_for("x = 1\nif x == 1; x = 5\nendif");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_return_leaves_proc() {
        let mut engine = engine_for("proc f\nx = 1\nreturn\nx = 2\nendproc\nf");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("f_x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_globals_shared_across_procs() {
        let mut engine = engine_for("_g = 1\nproc f\n_g = _g + 1\nendproc\nf\nf");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__g"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_param_binding_and_call_stack() {
        let mut engine = engine_for("proc f a b\nx = a + b\nendproc\nf 2, 3");
        // Step until we are inside f.
        while engine.call_stack_display().is_empty() {
            assert!(engine.run_step());
        }
        assert_eq!(engine.call_stack_display(), vec!["f(2, 3)".to_string()]);
        run_to_end(&mut engine);
        assert_eq!(engine.cell("f_x"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_bell_script() {
        let mut engine = engine_for("VectorSize 6\nHadamard 0\nCNot 0, 1\nMeasure");
        run_to_end(&mut engine);
        let outcome = engine.measured_value();
        assert!(outcome == 0 || outcome == 3, "got {outcome}");
        // Measure peeks without collapsing.
        let state = engine.state().unwrap();
        assert_relative_eq!(state.probability(0), 0.5, epsilon = 1e-4);
        assert_relative_eq!(state.probability(3), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_qft_round_trip_script() {
        let mut engine = engine_for("VectorSize 6\nHadamard 0\nQFT 0, 6\nInvQFT 0, 6");
        run_to_end(&mut engine);
        let state = engine.state().unwrap();
        assert_relative_eq!(state.probability(0), 0.5, epsilon = 1e-4);
        assert_relative_eq!(state.probability(1), 0.5, epsilon = 1e-4);
        for i in 2..state.dimension() {
            assert!(state.probability(i) < 1e-6);
        }
    }

    #[test]
    fn test_measured_value_substitution() {
        let mut engine = engine_for("VectorSize 6\nSigmaX 0\nMeasureBit 0\nx = measured_value");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_vector_size_validation() {
        let mut engine = engine_for("VectorSize 7");
        engine.run_step();
        assert_eq!(engine.errors(), &["Vector size out of range: 7".to_string()]);
        assert!(engine.state().is_none());

        let mut engine = engine_for("VectorSize 4");
        engine.run_step();
        assert!(!engine.errors().is_empty());
    }

    #[test]
    fn test_qubit_range_error_is_non_fatal() {
        let mut engine = engine_for("VectorSize 6\nHadamard 99\nSigmaX 0");
        engine.run_step();
        engine.run_step();
        assert_eq!(engine.errors(), &["Qubit number out of range: 99".to_string()]);
        // Execution continues past the failed gate.
        assert!(engine.run_step());
        run_to_end(&mut engine);
        let state = engine.state().unwrap();
        assert_relative_eq!(state.probability(1), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_delay_validation() {
        let host = RecordingHost::default();
        let delays = host.delays.clone();
        let program = compile("Delay 5\nDelay 0\nDelay 20000");
        let mut engine = Engine::with_seed(program, Box::new(host), 1).unwrap();
        engine.run_step();
        assert!(engine.errors().is_empty());
        engine.run_step();
        assert_eq!(engine.errors(), &["Delay out of range: 0".to_string()]);
        engine.run_step();
        assert_eq!(engine.errors(), &["Delay out of range: 20000".to_string()]);
        assert_eq!(*delays.borrow(), vec![5]);
    }

    #[test]
    fn test_runtime_fault_is_caught() {
        let mut engine = engine_for("x = 1 / 0");
        assert!(engine.run_step());
        assert_eq!(
            engine.errors(),
            &["Runtime fault in line 1: division by zero".to_string()]
        );
        // The step still counts as executed.
        assert!(!engine.is_start());
    }

    #[test]
    fn test_step_back_restores_classical_state() {
        let mut engine = engine_for("x = 1\nx = x + 1");
        engine.run_step();
        engine.run_step();
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(2)));

        assert!(engine.step_back());
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(1)));
        assert!(engine.step_back());
        assert_eq!(engine.cell("__main___x"), None);
        assert!(engine.is_start());
        assert!(!engine.step_back());

        // Re-running reproduces the same result.
        engine.run_step();
        engine.run_step();
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_step_back_rolls_back_quantum_state() {
        let mut engine = engine_for("VectorSize 6\nHadamard 0\nHadamard 1");
        run_to_end(&mut engine);
        let state = engine.state().unwrap();
        assert_relative_eq!(state.probability(0), 0.25, epsilon = 1e-4);

        assert!(engine.step_back());
        assert!(engine.step_back());
        let state = engine.state().unwrap();
        assert_relative_eq!(state.probability(0), 1.0, epsilon = 1e-6);
        // One record (VectorSize) remains.
        assert!(!engine.is_start());
        assert!(engine.step_back());
        assert!(engine.is_start());
    }

    #[test]
    fn test_step_back_negates_rotations_and_phases() {
        let mut engine = engine_for("VectorSize 6\nHadamard 0\nPhase 0, 1.25\nRx 1, 0.5");
        run_to_end(&mut engine);
        engine.step_back();
        engine.step_back();
        let state = engine.state().unwrap();
        // Back to H|0...0⟩.
        assert_relative_eq!(
            state.amplitude(1).re as f64,
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-4
        );
        assert_relative_eq!(state.amplitude(1).im as f64, 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_step_back_over_measure_warns() {
        let mut engine = engine_for("VectorSize 6\nHadamard 0\nMeasure");
        run_to_end(&mut engine);
        assert!(engine.step_back());
        assert_eq!(
            engine.errors(),
            &["Cannot reverse Measure; quantum state left unchanged".to_string()]
        );
        // measured_value is restored classically.
        assert_eq!(engine.measured_value(), 0);
    }

    #[test]
    fn test_step_back_through_call_frames() {
        let mut engine = engine_for("proc f\nx = 1\nendproc\nf\ny = 2");
        run_to_end(&mut engine);
        assert_eq!(engine.cell("__main___y"), Some(&Value::Int(2)));
        // Undo everything.
        while engine.step_back() {}
        assert!(engine.is_start());
        assert_eq!(engine.cell("f_x"), None);
        assert_eq!(engine.cell("__main___y"), None);
        // Replay.
        run_to_end(&mut engine);
        assert_eq!(engine.cell("f_x"), Some(&Value::Int(1)));
        assert_eq!(engine.cell("__main___y"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_step_over_runs_calls_atomically() {
        let mut engine = engine_for("proc f\nx = 1\ny = 2\nendproc\nf\nz = 3");
        assert!(engine.step_over());
        // The whole call ran in one step-over.
        assert_eq!(engine.cell("f_y"), Some(&Value::Int(2)));
        assert_eq!(engine.cell("__main___z"), None);
    }

    #[test]
    fn test_history_limit() {
        let mut engine = engine_for("x = 1\nx = 2\nx = 3\nx = 4");
        engine.set_history_limit(Some(2));
        run_to_end(&mut engine);
        assert!(engine.step_back());
        assert!(engine.step_back());
        // Older records were dropped.
        assert!(!engine.step_back());
        assert_eq!(engine.cell("__main___x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_breakpoints() {
        let mut engine = engine_for("x = 1\ny = 2\nz = 3");
        engine.add_breakpoint(2);
        assert!(!engine.at_breakpoint());
        engine.run_step();
        assert!(engine.at_breakpoint());
        engine.remove_breakpoint(2);
        assert!(!engine.at_breakpoint());
    }

    #[test]
    fn test_current_line_tracking() {
        let mut engine = engine_for("x = 1\n\ny = 2");
        assert_eq!(engine.current_line(), 1);
        engine.run_step();
        assert_eq!(engine.current_line(), 3);
        engine.run_step();
        // Past the end: the last line is reported.
        assert_eq!(engine.current_line(), 3);
        assert!(engine.is_done());
    }

    #[test]
    fn test_reset() {
        let mut engine = engine_for("VectorSize 6\nx = 1");
        run_to_end(&mut engine);
        engine.reset();
        assert!(engine.is_start());
        assert!(!engine.is_done());
        assert!(engine.state().is_none());
        assert_eq!(engine.cell("__main___x"), None);
    }

    #[test]
    fn test_recursion() {
        let mut engine = engine_for(
            "proc countdown n\nif n > 0\ncountdown n - 1\nendif\nendproc\ncountdown 3",
        );
        run_to_end(&mut engine);
        assert!(engine.is_done());
        assert_eq!(engine.cell("countdown_n"), Some(&Value::Int(0)));
    }
}
