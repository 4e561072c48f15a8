//! QScript CLI - compile, run and inspect QScript programs
//!
//! The run loop follows the engine's cooperative model: batches of steps
//! separated by a tunable delay, with a stop flag polled between batches.
//! Script `Delay` calls retune the tick; `Breakpoint` (and any line
//! breakpoint set with `--break-at`) stops the run and dumps state.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use qscript_lang::{compile, Engine, Host};
use qscript_sim::QState;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// QScript - scripting language and quantum computer simulator
#[derive(Parser)]
#[command(name = "qscript")]
#[command(version)]
#[command(about = "Run QScript programs on a state-vector quantum simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a script
    Run(RunArgs),

    /// Compile only and report errors
    Check(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Script file to execute
    script: PathBuf,

    /// Seed for the measurement and decoherence RNG
    #[arg(long)]
    seed: Option<u64>,

    /// Opcodes executed per tick
    #[arg(long, default_value_t = 20)]
    steps_per_tick: usize,

    /// Milliseconds between ticks (scripts may retune this via Delay)
    #[arg(long, default_value_t = 1)]
    delay_ms: u64,

    /// Abort after this many opcodes
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: usize,

    /// Undo-history bound
    #[arg(long, default_value_t = 100_000)]
    history_limit: usize,

    /// Stop when execution reaches this source line (repeatable)
    #[arg(long = "break-at")]
    break_at: Vec<usize>,

    /// How many of the largest amplitudes to show
    #[arg(long, default_value_t = 8)]
    top: usize,

    /// Emit a JSON report instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CheckArgs {
    /// Script file to compile
    script: PathBuf,
}

/// Mutable knobs shared between the console host and the run loop.
#[derive(Debug)]
struct HostControls {
    delay_ms: u64,
    stop: bool,
}

/// Host that surfaces callbacks on the console.
struct ConsoleHost {
    controls: Rc<RefCell<HostControls>>,
}

impl Host for ConsoleHost {
    fn print(&mut self, text: &str) {
        println!("{}", text.green());
    }

    fn breakpoint(&mut self) {
        self.controls.borrow_mut().stop = true;
    }

    fn delay(&mut self, ms: u64) {
        self.controls.borrow_mut().delay_ms = ms;
    }

    fn display(&mut self, content: &str) {
        println!("{}", content.cyan());
    }

    fn set_view_angle(&mut self, radians: f64) {
        info!(radians, "view angle");
    }

    fn set_view_mode(&mut self, mode: u32) {
        info!(mode, "view mode");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Check(args) => check(args),
    }
}

fn check(args: CheckArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let program = compile(&source);
    if program.errors.is_empty() {
        println!("{}", "OK".green().bold());
        return Ok(());
    }
    for error in &program.errors {
        eprintln!("{} {error}", "error:".red().bold());
    }
    bail!("{} compile error(s)", program.errors.len());
}

fn run(args: RunArgs) -> Result<()> {
    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let program = compile(&source);
    if !program.errors.is_empty() {
        for error in &program.errors {
            eprintln!("{} {error}", "error:".red().bold());
        }
        bail!("{} compile error(s)", program.errors.len());
    }

    let controls = Rc::new(RefCell::new(HostControls {
        delay_ms: args.delay_ms,
        stop: false,
    }));
    let host = ConsoleHost {
        controls: controls.clone(),
    };

    let mut engine = match args.seed {
        Some(seed) => Engine::with_seed(program, Box::new(host), seed),
        None => Engine::new(program, Box::new(host)),
    }?;
    engine.set_history_limit(Some(args.history_limit.max(1)));
    for line in &args.break_at {
        engine.add_breakpoint(*line);
    }

    let mut steps = 0usize;
    let mut runtime_errors: Vec<String> = Vec::new();
    let mut stopped_at: Option<usize> = None;

    engine.set_running(true);
    'ticks: while !engine.is_done() {
        for _ in 0..args.steps_per_tick.max(1) {
            if !engine.run_step() {
                break 'ticks;
            }
            steps += 1;
            for error in engine.errors() {
                runtime_errors.push(format!("line {}: {error}", engine.current_line()));
            }
            if engine.at_breakpoint() || controls.borrow().stop {
                stopped_at = Some(engine.current_line());
                break 'ticks;
            }
            if steps >= args.max_steps {
                runtime_errors.push(format!("aborted after {} steps", args.max_steps));
                break 'ticks;
            }
        }
        let delay = controls.borrow().delay_ms;
        if delay > 0 && !engine.is_done() {
            std::thread::sleep(Duration::from_millis(delay));
        }
    }
    engine.set_running(false);

    if args.json {
        report_json(&engine, steps, &runtime_errors, stopped_at, args.top);
    } else {
        report_text(&engine, steps, &runtime_errors, stopped_at, args.top);
    }

    if runtime_errors.is_empty() {
        Ok(())
    } else {
        bail!("{} runtime error(s)", runtime_errors.len())
    }
}

/// Indices of the `top` largest-probability basis states, descending.
fn top_amplitudes(state: &QState, top: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..state.dimension())
        .filter(|&i| state.probability(i) > 1e-10)
        .collect();
    indices.sort_by(|&a, &b| {
        state
            .probability(b)
            .partial_cmp(&state.probability(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices.truncate(top);
    indices
}

fn report_text(
    engine: &Engine,
    steps: usize,
    runtime_errors: &[String],
    stopped_at: Option<usize>,
    top: usize,
) {
    if let Some(line) = stopped_at {
        println!("{} line {line}", "stopped at".yellow().bold());
        for frame in engine.call_stack_display() {
            println!("  {}", frame.yellow());
        }
        for (name, value) in engine.locals() {
            println!("  {name} = {value}");
        }
    }

    println!("{} {steps} steps", "executed".bold());
    if let Some(state) = engine.state() {
        println!(
            "{} {} qubits, measured value {}",
            "register".bold(),
            state.num_qubits(),
            engine.measured_value()
        );
        for index in top_amplitudes(state, top) {
            let amp = state.amplitude(index);
            let basis: String = (0..state.num_qubits())
                .rev()
                .map(|b| if (index >> b) & 1 == 1 { '1' } else { '0' })
                .collect();
            println!(
                "  |{basis}⟩  {:+.4}{:+.4}i  p={:.4}",
                amp.re,
                amp.im,
                state.probability(index)
            );
        }
    }

    for error in runtime_errors {
        eprintln!("{} {error}", "error:".red().bold());
    }
}

fn report_json(
    engine: &Engine,
    steps: usize,
    runtime_errors: &[String],
    stopped_at: Option<usize>,
    top: usize,
) {
    let amplitudes: Vec<serde_json::Value> = engine
        .state()
        .map(|state| {
            top_amplitudes(state, top)
                .into_iter()
                .map(|index| {
                    let amp = state.amplitude(index);
                    serde_json::json!({
                        "index": index,
                        "re": amp.re,
                        "im": amp.im,
                        "probability": state.probability(index),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let report = serde_json::json!({
        "steps": steps,
        "done": engine.is_done(),
        "stopped_at": stopped_at,
        "measured_value": engine.measured_value(),
        "qubits": engine.state().map(|s| s.num_qubits()),
        "amplitudes": amplitudes,
        "errors": runtime_errors,
    });
    println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
}
