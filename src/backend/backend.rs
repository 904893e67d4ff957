use log::{debug, log, warn, Level};

use crate::backend::common_data_bus::CommonDataBus;
use crate::backend::execution_unit::{EUState, EUTable};
use crate::backend::register_status::{RegisterStatus, RegisterStatusTable};
use crate::backend::reservation_station::{RSTable, Source};
use crate::cpu::{CPUConfig, FaultPolicy, InstrState, InstrTiming, LatencyTable, PerfCounters, RegisterFile, Trace};
use crate::error::{ArithmeticFault, BlockedOn, SimError, StuckInstr};
use crate::instructions::instructions::{Operand, Program};

fn level(traced: bool) -> Level {
    if traced { Level::Info } else { Level::Debug }
}

/// Register renaming of a single source operand.
fn rename(operand: &Operand, reg_status: &RegisterStatusTable, reg_file: &RegisterFile) -> Source {
    match operand {
        Operand::Immediate(value) => Source::Value(*value),
        Operand::Register(reg) => match reg_status.lookup(reg) {
            RegisterStatus::Pending(tag) => Source::Pending(tag),
            RegisterStatus::Committed => match reg_file.get_value(reg) {
                Some(value) => Source::Value(value),
                None => Source::Unresolved,
            },
        },
    }
}

/// The scheduling engine: reservation stations, execution units, the register
/// status table and the common data bus, plus the register file they commit to.
pub(crate) struct Backend {
    pub(crate) program: Program,
    pub(crate) timings: Vec<InstrTiming>,
    // index of the next instruction to issue, in program order
    pub(crate) next_issue: usize,
    pub(crate) rs_table: RSTable,
    pub(crate) eu_table: EUTable,
    pub(crate) reg_status: RegisterStatusTable,
    pub(crate) reg_file: RegisterFile,
    cdb: CommonDataBus,
    latency: LatencyTable,
    fault_policy: FaultPolicy,
    trace: Trace,
    pub(crate) faults: Vec<ArithmeticFault>,
    pub(crate) perf_counters: PerfCounters,
}

impl Backend {
    pub(crate) fn new(cpu_config: &CPUConfig, mut program: Program) -> Backend {
        let reg_file = std::mem::take(&mut program.registers);
        Backend {
            timings: vec![InstrTiming::default(); program.code.len()],
            program,
            next_issue: 0,
            rs_table: RSTable::new(cpu_config.rs_count),
            eu_table: EUTable::new(cpu_config),
            reg_status: RegisterStatusTable::new(),
            reg_file,
            cdb: CommonDataBus::new(cpu_config.cdb_count),
            latency: cpu_config.latency.clone(),
            fault_policy: cpu_config.fault_policy,
            trace: cpu_config.trace.clone(),
            faults: Vec::new(),
            perf_counters: PerfCounters::default(),
        }
    }

    /// Runs the stages of a single cycle. Write-back happens first so a result
    /// broadcast in this cycle can be picked up by dispatch and issue in the
    /// same cycle.
    pub(crate) fn do_cycle(&mut self, cycle: u64) -> Result<(), SimError> {
        self.cycle_write_back(cycle)?;
        self.cycle_dispatch(cycle);
        self.cycle_issue(cycle);
        self.cycle_execute(cycle);
        Ok(())
    }

    pub(crate) fn is_done(&self) -> bool {
        self.next_issue == self.program.code.len()
            && self.rs_table.all_idle()
            && self.eu_table.all_idle()
    }

    fn cycle_write_back(&mut self, cycle: u64) -> Result<(), SimError> {
        let (granted, deferred) = self.cdb.arbitrate(self.eu_table.completing());

        for (eu_index, rs_tag) in &deferred {
            debug!("[{}] EU{} (RS{}) waits for the common data bus", cycle, eu_index, rs_tag);
        }
        self.perf_counters.cdb_stall_cnt += deferred.len() as u64;

        for (eu_index, rs_tag) in granted {
            let index = self.rs_table.get(rs_tag).instr_index;
            let instr = &self.program.code[index];

            let broadcast = self.cdb.broadcast(
                eu_index,
                rs_tag,
                instr,
                &mut self.rs_table,
                &mut self.eu_table,
                &mut self.reg_status,
                &mut self.reg_file);

            let timing = &mut self.timings[index];
            timing.write_back = Some(cycle);
            timing.eu_index = None;
            self.perf_counters.broadcast_cnt += 1;

            match broadcast.value {
                Ok(value) => {
                    timing.state = InstrState::WrittenBack;
                    if broadcast.committed {
                        log!(level(self.trace.write_back), "[{}] Write back [{}] {}={} from RS{} on EU{}, woke {:?}",
                            cycle, instr, instr.sink, value, broadcast.rs_tag, broadcast.eu_index, broadcast.woken);
                    } else {
                        log!(level(self.trace.write_back), "[{}] Broadcast [{}] {} from RS{} on EU{}, {} already renamed, woke {:?}",
                            cycle, instr, value, broadcast.rs_tag, broadcast.eu_index, instr.sink, broadcast.woken);
                    }
                }
                Err(kind) => {
                    timing.state = InstrState::Faulted;
                    let fault = ArithmeticFault { index, instr: instr.to_string(), kind, cycle };
                    warn!("[{}] {}", cycle, fault);
                    match self.fault_policy {
                        FaultPolicy::Halt => return Err(SimError::Arithmetic(fault)),
                        FaultPolicy::Continue => self.faults.push(fault),
                    }
                }
            }
        }
        Ok(())
    }

    // Ready stations are offered to the execution units in ascending tag order.
    fn cycle_dispatch(&mut self, cycle: u64) {
        for rs_tag in self.rs_table.ready_stations() {
            let rs = self.rs_table.get(rs_tag);
            let index = rs.instr_index;
            let opcode = rs.opcode;
            let latency = opcode.latency(&self.latency);

            let Some(eu_index) = self.eu_table.try_dispatch(rs_tag, opcode.unit_class(), latency) else {
                debug!("[{}] RS{} ready, but no free {} unit", cycle, rs_tag, opcode.unit_class());
                continue;
            };

            self.rs_table.mark_dispatched(rs_tag);

            let timing = &mut self.timings[index];
            timing.state = InstrState::Executing;
            timing.exec_start = Some(cycle);
            timing.eu_index = Some(eu_index);
            self.perf_counters.dispatch_cnt += 1;

            log!(level(self.trace.dispatch), "[{}] Dispatched [{}] RS{} to EU{}",
                cycle, self.program.code[index], rs_tag, eu_index);
        }
    }

    // Issues at most one instruction per cycle, strictly in program order.
    fn cycle_issue(&mut self, cycle: u64) {
        let index = self.next_issue;
        let Some(instr) = self.program.code.get(index) else {
            return;
        };

        if !self.rs_table.has_idle() {
            // structural hazard; the same instruction is retried next cycle
            self.perf_counters.rs_stall_cnt += 1;
            debug!("[{}] Issue of [{}] stalled, no free reservation station", cycle, instr);
            return;
        }

        // sources are renamed before the sink, so `ADD R1,R1,R2` reads the old R1
        let source = [
            rename(&instr.source[0], &self.reg_status, &self.reg_file),
            rename(&instr.source[1], &self.reg_status, &self.reg_file),
        ];

        let Some(rs_tag) = self.rs_table.allocate(index, instr.opcode, source) else {
            return;
        };
        self.reg_status.mark_pending(&instr.sink, rs_tag);

        let timing = &mut self.timings[index];
        timing.state = InstrState::Issued;
        timing.issue = Some(cycle);
        timing.rs_tag = Some(rs_tag);

        self.next_issue += 1;
        self.perf_counters.issue_cnt += 1;

        log!(level(self.trace.issue), "[{}] Issued [{}] to {}", cycle, instr, self.rs_table.get(rs_tag));
    }

    // Every executing unit spends one cycle on its instruction.
    fn cycle_execute(&mut self, cycle: u64) {
        for (eu_index, rs_tag) in self.eu_table.tick(cycle) {
            let index = self.rs_table.get(rs_tag).instr_index;
            self.timings[index].exec_end = Some(cycle);
            self.perf_counters.execute_cnt += 1;

            log!(level(self.trace.execute), "[{}] Executed [{}] on EU{}",
                cycle, self.program.code[index], eu_index);
        }
    }

    /// Every instruction that has not finished, with what it is waiting for.
    pub(crate) fn stuck_instructions(&self) -> Vec<StuckInstr> {
        let mut stuck = Vec::new();
        for (index, timing) in self.timings.iter().enumerate() {
            let blocked_on = match (timing.state, timing.rs_tag, timing.eu_index) {
                (InstrState::WrittenBack, _, _) | (InstrState::Faulted, _, _) => continue,
                (InstrState::Waiting, _, _) => BlockedOn::ReservationStation,
                (InstrState::Issued, Some(rs_tag), _) => {
                    let rs = self.rs_table.get(rs_tag);
                    match rs.qj().or(rs.qk()) {
                        Some(producer) => BlockedOn::Operand(producer),
                        None => BlockedOn::FunctionalUnit(rs.opcode.unit_class()),
                    }
                }
                (InstrState::Executing, _, Some(eu_index)) => {
                    if self.eu_table.get(eu_index).state == EUState::COMPLETED {
                        BlockedOn::CommonDataBus
                    } else {
                        BlockedOn::Executing(eu_index)
                    }
                }
                _ => unreachable!("inconsistent timing for instruction {}: {:?}", index, timing),
            };

            stuck.push(StuckInstr {
                index,
                instr: self.program.code[index].to_string(),
                blocked_on,
            });
        }
        stuck
    }
}
