use crate::watchpoint::WatchHit;
use crate::Word;

/// Why `Cpu::exec` handed control back to the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopEvent {
    StepsDone,
    Watchpoint(Vec<WatchHit>),
    Trap { pc: Word, code: Word },
    Abort { pc: Word, reason: String },
    Interrupted,
    AlreadyEnded,
}

pub fn report(event: &StopEvent) {
    match event {
        StopEvent::StepsDone => {}
        StopEvent::Watchpoint(hits) => {
            for hit in hits {
                println!("Watchpoint {}: {}", hit.id, hit.expr);
                println!("Old value = {} ({:#010x})", hit.old_value, hit.old_value);
                println!("New value = {} ({:#010x})", hit.new_value, hit.new_value);
            }
        }
        StopEvent::Trap { pc, code } => {
            let verdict = if *code == 0 { "HIT GOOD TRAP" } else { "HIT BAD TRAP" };
            println!("{} at pc = {:#010x} (exit code {})", verdict, pc, code);
        }
        StopEvent::Abort { pc, reason } => println!("ABORT at pc = {:#010x}: {}", pc, reason),
        StopEvent::Interrupted => println!("Interrupted"),
        StopEvent::AlreadyEnded => {
            println!("Program execution has ended. To restart the program, exit and run again.")
        }
    }
}
