use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::command::CommandExpr;
use crate::cpu::Cpu;
use crate::event::StopEvent;
use crate::memory::GuestMemory;
use crate::watchpoint::WatchpointManager;

mod command;
mod cpu;
mod eval;
mod event;
mod lexer;
mod memory;
mod registers;
mod watchpoint;

/// Machine word of the simulated target.
pub type Word = u32;
pub type SWord = i32;

#[derive(Parser, Debug)]
#[command(version, about = "Interactive debugger for a simulated RV32I machine")]
struct Args {
    /// Raw binary image loaded at the start of guest memory. A small built-in program runs without one.
    image: Option<PathBuf>,

    /// Run until the program ends instead of prompting for commands
    #[arg(short, long)]
    batch: bool,

    /// Guest memory size in bytes
    #[arg(long, default_value_t = memory::MSIZE, value_parser = parse_size)]
    memory_size: usize,

    /// Log filter directive, e.g. "debug" or "sdbrs::lexer=trace"
    #[arg(long, default_value = "warn")]
    log: String,
}

fn parse_size(text: &str) -> Result<usize, String> {
    let parsed = match text.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid size '{}': {}", text, e))
}

fn load_machine(args: &Args) -> Result<Cpu> {
    let mut memory = GuestMemory::new(memory::MBASE, args.memory_size);
    let image = match &args.image {
        Some(path) => std::fs::read(path).with_context(|| format!("Could not read image {}", path.display()))?,
        None => cpu::DEFAULT_IMAGE.iter().flat_map(|w| w.to_le_bytes()).collect(),
    };
    memory.load_image(&image)?;
    println!(
        "Loaded {} bytes at {:#010x}{}",
        image.len(),
        memory::MBASE,
        if args.image.is_none() { " (built-in image)" } else { "" }
    );
    Ok(Cpu::new(memory))
}

fn step(cpu: &mut Cpu, watchpoints: &mut WatchpointManager, steps: u64) {
    let event = cpu.exec(Some(steps), watchpoints);
    event::report(&event);
    if matches!(event, StopEvent::StepsDone | StopEvent::Watchpoint(_)) {
        println!("{:#010x}", cpu.regs.pc);
    }
}

fn main_debugger_loop(cpu: &mut Cpu, watchpoints: &mut WatchpointManager) -> Result<()> {
    loop {
        let cmd = command::read_command()?;

        match cmd {
            CommandExpr::Help(_) => command::display_help(None),
            CommandExpr::HelpTopic(_, topic) => command::display_help(Some(&topic)),
            CommandExpr::Go(_) => {
                let event = cpu.exec(None, watchpoints);
                event::report(&event);
            }
            CommandExpr::StepInto(_) => step(cpu, watchpoints, 1),
            CommandExpr::StepCount(_, steps) => step(cpu, watchpoints, steps),
            CommandExpr::DisplayRegisters(..) => registers::display_all(&cpu.regs),
            CommandExpr::DisplaySpecificRegister(_, _, name) => registers::display_named(&cpu.regs, &name),
            CommandExpr::ListWatchpoints(..) => watchpoints.display(),
            CommandExpr::DisplayMemory(_, count, expr) => {
                match eval::evaluate_expression(&expr, &cpu.context()) {
                    Ok(addr) => cpu.memory.display_words(addr, count as usize),
                    Err(e) => command::report_expression_error(&expr, &e),
                }
            }
            CommandExpr::Evaluate(_, expr) => match eval::evaluate_expression(&expr, &cpu.context()) {
                Ok(val) => println!("{} ({:#x})", val, val),
                Err(e) => command::report_expression_error(&expr, &e),
            },
            CommandExpr::SetWatchpoint(_, expr) => match watchpoints.watch(&expr, &cpu.context()) {
                Ok(wp) => {
                    println!("Watchpoint {}: {}", wp.id(), wp.expr());
                    println!("Initial value = {} ({:#x})", wp.value(), wp.value());
                }
                Err(watchpoint::WatchError::InvalidExpression(e)) => {
                    command::report_expression_error(&expr, &e)
                }
                Err(e) => println!("{}", e),
            },
            CommandExpr::ClearWatchpoint(_, id) => match watchpoints.delete(id) {
                Ok(expr) => println!("Watchpoint {}: {} deleted.", id, expr),
                Err(e) => println!("{}", e),
            },
            CommandExpr::Quit(_) => return Ok(()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let mut cpu = load_machine(&args)?;
    let mut watchpoints = WatchpointManager::new();

    let interrupt = cpu.interrupt_flag();
    ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst))
        .context("Could not install the Ctrl-C handler")?;

    if args.batch {
        let event = cpu.exec(None, &mut watchpoints);
        event::report(&event);
        return Ok(());
    }

    main_debugger_loop(&mut cpu, &mut watchpoints)
}
