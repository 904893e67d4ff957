use std::fmt;

use serde::Deserialize;

use crate::cpu::LatencyTable;
use crate::cpu::RegisterFile;
use crate::instructions::instructions::Operand::{Immediate, Register};

/// A register or operand value. Integer arithmetic stays exact and is checked
/// for overflow; as soon as one side is a float the operation is done in f64.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Word {
    Int(i64),
    Float(f64),
}

impl Word {
    pub fn as_f64(self) -> f64 {
        match self {
            Word::Int(v) => v as f64,
            Word::Float(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Word::Int(v) => v == 0,
            Word::Float(v) => v == 0.0,
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Word::Int(v) => write!(f, "{}", v),
            // keeps the fraction visible, so 3.0 is not printed as 3
            Word::Float(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    ADD,
    SUB,
    MUL,
    DIV,
}

/// The kind of functional unit an opcode needs.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitClass {
    Any,
    Adder,
    Multiplier,
}

impl UnitClass {
    pub fn accepts(self, needed: UnitClass) -> bool {
        self == UnitClass::Any || self == needed
    }
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitClass::Any => write!(f, "any"),
            UnitClass::Adder => write!(f, "adder"),
            UnitClass::Multiplier => write!(f, "multiplier"),
        }
    }
}

/// Why evaluating an operation did not produce a value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FaultKind {
    DivideByZero,
    Overflow,
    // one of the operands was never resolved because an earlier producer faulted
    UnresolvedOperand,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::DivideByZero => write!(f, "division by zero"),
            FaultKind::Overflow => write!(f, "arithmetic overflow"),
            FaultKind::UnresolvedOperand => write!(f, "unresolved operand"),
        }
    }
}

impl Opcode {
    pub const ALL: [Opcode; 4] = [Opcode::ADD, Opcode::SUB, Opcode::MUL, Opcode::DIV];

    pub fn unit_class(self) -> UnitClass {
        match self {
            Opcode::ADD | Opcode::SUB => UnitClass::Adder,
            Opcode::MUL | Opcode::DIV => UnitClass::Multiplier,
        }
    }

    pub fn latency(self, table: &LatencyTable) -> u8 {
        match self {
            Opcode::ADD => table.add,
            Opcode::SUB => table.sub,
            Opcode::MUL => table.mul,
            Opcode::DIV => table.div,
        }
    }

    /// Computes the result of the operation. Division is a true division and
    /// always yields a float, so `7 / 2` is `3.5`.
    pub fn evaluate(self, a: Word, b: Word) -> Result<Word, FaultKind> {
        if self == Opcode::DIV {
            if b.is_zero() {
                return Err(FaultKind::DivideByZero);
            }
            return finite(a.as_f64() / b.as_f64());
        }

        if let (Word::Int(a), Word::Int(b)) = (a, b) {
            let result = match self {
                Opcode::ADD => a.checked_add(b),
                Opcode::SUB => a.checked_sub(b),
                _ => a.checked_mul(b),
            };
            return result.map(Word::Int).ok_or(FaultKind::Overflow);
        }

        let (a, b) = (a.as_f64(), b.as_f64());
        match self {
            Opcode::ADD => finite(a + b),
            Opcode::SUB => finite(a - b),
            _ => finite(a * b),
        }
    }
}

fn finite(value: f64) -> Result<Word, FaultKind> {
    if value.is_finite() {
        Ok(Word::Float(value))
    } else {
        Err(FaultKind::Overflow)
    }
}

pub fn mnemonic(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::ADD => "ADD",
        Opcode::SUB => "SUB",
        Opcode::MUL => "MUL",
        Opcode::DIV => "DIV",
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", mnemonic(*self))
    }
}

pub fn get_opcode(mnemonic: &str) -> Option<Opcode> {
    let string = mnemonic.to_uppercase();

    match string.as_str() {
        "ADD" => Some(Opcode::ADD),
        "SUB" => Some(Opcode::SUB),
        "MUL" => Some(Opcode::MUL),
        "DIV" | "SDIV" => Some(Opcode::DIV),
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Register(String),
    // The operand is directly specified in the instruction itself.
    Immediate(Word),
}

impl Operand {
    pub fn reg(name: &str) -> Operand {
        Register(name.to_string())
    }

    pub fn imm(value: i64) -> Operand {
        Immediate(Word::Int(value))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register(name) => write!(f, "{}", name),
            Immediate(val) => write!(f, "#{}", val),
        }
    }
}

/// A pre-decoded instruction: `sink = source[0] <opcode> source[1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    pub opcode: Opcode,
    pub source: [Operand; 2],
    pub sink: String,
    pub loc: Option<SourceLocation>,
}

impl Instr {
    pub fn new(opcode: Opcode, sink: &str, src1: Operand, src2: Operand) -> Instr {
        Instr {
            opcode,
            source: [src1, src2],
            sink: sink.to_string(),
            loc: None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {},{},{}", mnemonic(self.opcode), self.sink, self.source[0], self.source[1])?;

        if let Some(loc) = self.loc {
            write!(f, " ; {}", loc)?;
        }

        Ok(())
    }
}

/// The input of a simulation: the instructions in program order and the
/// initial contents of the register file.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub code: Vec<Instr>,
    pub registers: RegisterFile,
}

impl Program {
    pub fn new(code: Vec<Instr>, registers: RegisterFile) -> Program {
        Program { code, registers }
    }

    pub fn get_instr(&self, pos: usize) -> &Instr {
        &self.code[pos]
    }
}
