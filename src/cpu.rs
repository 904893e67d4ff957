use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;

use log::{debug, info, log, Level};
use serde::Deserialize;

use crate::backend::backend::Backend;
use crate::backend::execution_unit::EUState;
use crate::backend::register_status::RegisterStatus;
use crate::backend::reservation_station::{RSState, RSTag, Source};
use crate::error::{ArithmeticFault, ConfigError, DeadlockReport, SimError};
use crate::instructions::instructions::{Opcode, Program, UnitClass, Word};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerfCounters {
    pub cycle_cnt: u64,
    pub issue_cnt: u64,
    pub dispatch_cnt: u64,
    pub execute_cnt: u64,
    pub broadcast_cnt: u64,
    // cycles in which issue stalled on a full set of reservation stations
    pub rs_stall_cnt: u64,
    // completed results that had to wait another cycle for a bus
    pub cdb_stall_cnt: u64,
}

#[derive(Clone, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Trace {
    pub issue: bool,
    pub dispatch: bool,
    pub execute: bool,
    pub write_back: bool,
    pub cycle: bool,
}

/// Number of cycles each opcode occupies an execution unit.
#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LatencyTable {
    pub add: u8,
    pub sub: u8,
    pub mul: u8,
    pub div: u8,
}

impl Default for LatencyTable {
    fn default() -> Self {
        LatencyTable { add: 1, sub: 1, mul: 1, div: 1 }
    }
}

/// What happens when an instruction faults during write-back.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FaultPolicy {
    // stop the simulation with the fault
    #[default]
    Halt,
    // record the fault, leave the destination unresolved and keep going
    Continue,
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct CPUConfig {
    // the number of reservation stations
    pub rs_count: u16,
    // the number of execution units
    pub eu_count: u8,
    // the class of every execution unit; when absent every unit executes every opcode
    pub eu_classes: Option<Vec<UnitClass>>,
    // the number of cycles per opcode
    pub latency: LatencyTable,
    // the number of common data buses; 1 means a single shared bus
    pub cdb_count: u8,
    pub fault_policy: FaultPolicy,
    // the simulation is aborted as deadlocked when it runs longer than this
    pub max_cycles: u64,
    // if processing of a single instruction should be traced (logged at info)
    pub trace: Trace,
}

impl Default for CPUConfig {
    fn default() -> Self {
        CPUConfig {
            rs_count: 3,
            eu_count: 2,
            eu_classes: None,
            latency: LatencyTable::default(),
            cdb_count: 1,
            fault_policy: FaultPolicy::Halt,
            max_cycles: 10_000,
            trace: Trace::default(),
        }
    }
}

impl CPUConfig {
    pub fn eu_class(&self, eu_index: u8) -> UnitClass {
        self.eu_classes
            .as_ref()
            .and_then(|classes| classes.get(eu_index as usize).copied())
            .unwrap_or(UnitClass::Any)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rs_count == 0 {
            return Err(ConfigError::NoReservationStations);
        }
        if self.eu_count == 0 {
            return Err(ConfigError::NoExecutionUnits);
        }
        if self.cdb_count == 0 {
            return Err(ConfigError::NoCommonDataBus);
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::NoCycleBound);
        }
        if let Some(opcode) = Opcode::ALL.iter().find(|opcode| opcode.latency(&self.latency) == 0) {
            return Err(ConfigError::ZeroLatency(*opcode));
        }
        if let Some(classes) = &self.eu_classes {
            if classes.len() != self.eu_count as usize {
                return Err(ConfigError::UnitClassCount { expected: self.eu_count, actual: classes.len() });
            }
        }
        Ok(())
    }
}

pub fn load_cpu_config(file_path: &str) -> Result<CPUConfig, Box<dyn Error>> {
    let file = File::open(file_path)?;
    let config = serde_yaml::from_reader(file)?;
    Ok(config)
}

/// Committed register values by register name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegisterFile {
    entries: BTreeMap<String, Word>,
}

impl RegisterFile {
    pub fn new() -> RegisterFile {
        RegisterFile { entries: BTreeMap::new() }
    }

    pub fn get_value(&self, reg: &str) -> Option<Word> {
        self.entries.get(reg).copied()
    }

    pub fn set_value(&mut self, reg: &str, value: Word) {
        self.entries.insert(reg.to_string(), value);
    }

    // The register no longer holds a valid value.
    pub fn invalidate(&mut self, reg: &str) {
        self.entries.remove(reg);
    }

    pub fn contains(&self, reg: &str) -> bool {
        self.entries.contains_key(reg)
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, Word)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InstrState {
    #[default]
    Waiting,
    Issued,
    Executing,
    WrittenBack,
    Faulted,
}

/// Stage timestamps of a single instruction. Cycles are numbered from 1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrTiming {
    pub state: InstrState,
    pub issue: Option<u64>,
    pub exec_start: Option<u64>,
    pub exec_end: Option<u64>,
    pub write_back: Option<u64>,
    // the reservation station the instruction was issued to
    pub rs_tag: Option<RSTag>,
    pub eu_index: Option<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Running,
    Terminated,
}

/// The result of a simulation that reached termination.
#[derive(Clone, Debug)]
pub struct SimReport {
    pub cycles: u64,
    pub registers: RegisterFile,
    pub timings: Vec<InstrTiming>,
    // faults recorded under FaultPolicy::Continue
    pub faults: Vec<ArithmeticFault>,
    pub perf: PerfCounters,
}

/// The clock. Owns the complete state of one simulation run and advances it
/// one cycle at a time.
pub struct CPU {
    pub(crate) backend: Backend,
    cycle: u64,
    max_cycles: u64,
    trace: Trace,
    failure: Option<SimError>,
}

impl CPU {
    pub fn new(cpu_config: &CPUConfig, program: Program) -> Result<CPU, SimError> {
        cpu_config.validate()?;

        let backend = Backend::new(cpu_config, program);
        for (index, instr) in backend.program.code.iter().enumerate() {
            let class = instr.opcode.unit_class();
            if !backend.eu_table.has_capable(class) {
                return Err(ConfigError::NoCapableUnit { index, opcode: instr.opcode, class }.into());
            }
        }

        debug!("CPU created with {} reservation stations, {} execution units and {} common data bus(es)",
            cpu_config.rs_count, cpu_config.eu_count, cpu_config.cdb_count);

        Ok(CPU {
            backend,
            cycle: 0,
            max_cycles: cpu_config.max_cycles,
            trace: cpu_config.trace.clone(),
            failure: None,
        })
    }

    /// Simulates a single cycle. Once the CPU has terminated, or failed, the
    /// clock no longer advances and the same outcome is returned again.
    pub fn step(&mut self) -> Result<CycleState, SimError> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        if self.backend.is_done() {
            return Ok(CycleState::Terminated);
        }

        self.cycle += 1;
        self.backend.perf_counters.cycle_cnt = self.cycle;

        if let Err(err) = self.backend.do_cycle(self.cycle) {
            self.failure = Some(err.clone());
            return Err(err);
        }

        if self.trace.cycle {
            let perf_counters = &self.backend.perf_counters;
            info!("[Cycles:{}][Issued={}][Dispatched={}][Executed={}][Broadcast={}][IPC={:.2}]",
                perf_counters.cycle_cnt,
                perf_counters.issue_cnt,
                perf_counters.dispatch_cnt,
                perf_counters.execute_cnt,
                perf_counters.broadcast_cnt,
                perf_counters.broadcast_cnt as f32 / perf_counters.cycle_cnt as f32);
        }

        if self.backend.is_done() {
            debug_assert!(self.backend.reg_status.is_empty());
            log!(if self.trace.cycle { Level::Info } else { Level::Debug },
                "Program complete after {} cycles", self.cycle);
            return Ok(CycleState::Terminated);
        }

        if self.cycle >= self.max_cycles {
            let report = DeadlockReport { cycle: self.cycle, stuck: self.backend.stuck_instructions() };
            let err = SimError::Deadlock(report);
            self.failure = Some(err.clone());
            return Err(err);
        }

        Ok(CycleState::Running)
    }

    pub fn run(&mut self) -> Result<SimReport, SimError> {
        while self.step()? == CycleState::Running {}
        Ok(self.report())
    }

    pub fn report(&self) -> SimReport {
        SimReport {
            cycles: self.cycle,
            registers: self.backend.reg_file.clone(),
            timings: self.backend.timings.clone(),
            faults: self.backend.faults.clone(),
            perf: self.backend.perf_counters.clone(),
        }
    }

    /// The last simulated cycle; 0 before the first step.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.backend.reg_file
    }

    pub fn timing(&self, index: usize) -> Option<&InstrTiming> {
        self.backend.timings.get(index)
    }

    pub fn register_status(&self, reg: &str) -> RegisterStatus {
        self.backend.reg_status.lookup(reg)
    }

    /// The renamed operands held by a reservation station, or None if it is idle.
    pub fn station_sources(&self, tag: RSTag) -> Option<[Source; 2]> {
        if tag >= self.backend.rs_table.capacity {
            return None;
        }
        let rs = self.backend.rs_table.get(tag);
        if rs.state == RSState::IDLE {
            None
        } else {
            Some(rs.source)
        }
    }

    pub fn busy_stations(&self) -> usize {
        self.backend.rs_table.iter().filter(|rs| rs.state != RSState::IDLE).count()
    }

    pub fn busy_units(&self) -> usize {
        self.backend.eu_table.iter().filter(|eu| eu.state != EUState::IDLE).count()
    }
}
