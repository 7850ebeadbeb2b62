use crate::Word;

pub const REGISTER_NAMES: [&str; 32] = [
    "$0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
    "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

/// Resolves a register name (sigil already stripped) to its current value.
pub trait RegisterSource {
    fn lookup_register(&self, name: &str) -> Option<Word>;
}

#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    gpr: [Word; 32],
    pub pc: Word,
}

impl RegisterFile {
    pub fn new(pc: Word) -> RegisterFile {
        RegisterFile { gpr: [0; 32], pc }
    }

    pub fn read(&self, index: usize) -> Word {
        self.gpr[index]
    }

    // x0 is hard-wired to zero
    pub fn write(&mut self, index: usize, value: Word) {
        if index != 0 {
            self.gpr[index] = value;
        }
    }
}

fn register_index(reg_name: &str) -> Option<usize> {
    match reg_name {
        "0" | "zero" => return Some(0),
        "fp" => return Some(8),
        _ => {}
    }
    if let Some(pos) = REGISTER_NAMES.iter().position(|&name| name == reg_name) {
        return Some(pos);
    }
    let num = reg_name.strip_prefix('x')?;
    if num.is_empty() || !num.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    num.parse::<usize>().ok().filter(|&index| index < 32)
}

impl RegisterSource for RegisterFile {
    fn lookup_register(&self, name: &str) -> Option<Word> {
        get_register(self, name).ok()
    }
}

pub fn get_register(regs: &RegisterFile, reg_name: &str) -> Result<Word, String> {
    let reg_name = reg_name.to_lowercase();
    if reg_name == "pc" {
        return Ok(regs.pc);
    }
    match register_index(&reg_name) {
        Some(index) => Ok(regs.read(index)),
        None => Err(format!("Unrecognized register: {}", reg_name)),
    }
}

pub fn display_all(regs: &RegisterFile) {
    for (index, name) in REGISTER_NAMES.iter().enumerate() {
        let value = regs.read(index);
        print!("{:>4}={:#010x} ", name, value);
        if index % 4 == 3 {
            println!();
        }
    }
    println!("  pc={:#010x}", regs.pc);
}

pub fn display_named(regs: &RegisterFile, reg_name: &str) {
    match get_register(regs, reg_name) {
        Ok(val) => println!("{}={:#010x}", reg_name.to_lowercase(), val),
        Err(_) => println!("Unrecognized register name: {}", reg_name),
    }
}
