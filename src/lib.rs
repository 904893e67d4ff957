//! A cycle-level simulator of Tomasulo's algorithm: reservation stations with
//! tag based register renaming, timed execution units and a common data bus
//! that broadcasts results to the register file and to waiting stations.

pub mod backend;
pub mod cpu;
pub mod error;
pub mod instructions;
pub mod loader;
