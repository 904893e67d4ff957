use std::fmt;

use thiserror::Error;

use crate::backend::reservation_station::RSTag;
use crate::instructions::instructions::{FaultKind, Opcode, UnitClass};

/// Top-level error type of a simulation run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Arithmetic fault: {0}")]
    Arithmetic(#[from] ArithmeticFault),

    #[error("Deadlock: {0}")]
    Deadlock(#[from] DeadlockReport),
}

/// Configuration problems, detected before the first cycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rs_count must be at least 1")]
    NoReservationStations,

    #[error("eu_count must be at least 1")]
    NoExecutionUnits,

    #[error("cdb_count must be at least 1")]
    NoCommonDataBus,

    #[error("max_cycles must be at least 1")]
    NoCycleBound,

    #[error("latency of {0} must be at least 1")]
    ZeroLatency(Opcode),

    #[error("eu_classes has {actual} entries, but eu_count is {expected}")]
    UnitClassCount { expected: u8, actual: usize },

    #[error("instruction {index} ({opcode}) needs a {class} unit, but none is configured")]
    NoCapableUnit { index: usize, opcode: Opcode, class: UnitClass },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} in instruction {index} [{instr}] at cycle {cycle}")]
pub struct ArithmeticFault {
    // position of the instruction in program order
    pub index: usize,
    pub instr: String,
    pub kind: FaultKind,
    pub cycle: u64,
}

/// The resource an unfinished instruction is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedOn {
    ReservationStation,
    Operand(RSTag),
    FunctionalUnit(UnitClass),
    Executing(u8),
    CommonDataBus,
}

impl fmt::Display for BlockedOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedOn::ReservationStation => write!(f, "no free reservation station"),
            BlockedOn::Operand(tag) => write!(f, "waiting for RS{}", tag),
            BlockedOn::FunctionalUnit(class) => write!(f, "no free {} unit", class),
            BlockedOn::Executing(eu) => write!(f, "executing on EU{}", eu),
            BlockedOn::CommonDataBus => write!(f, "waiting for the common data bus"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckInstr {
    pub index: usize,
    pub instr: String,
    pub blocked_on: BlockedOn,
}

impl fmt::Display for StuckInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} [{}]: {}", self.index, self.instr, self.blocked_on)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no termination after {cycle} cycles, {} instruction(s) outstanding", .stuck.len())]
pub struct DeadlockReport {
    pub cycle: u64,
    pub stuck: Vec<StuckInstr>,
}
