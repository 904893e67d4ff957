use log::debug;

use crate::backend::execution_unit::EUTable;
use crate::backend::register_status::RegisterStatusTable;
use crate::backend::reservation_station::{RSTable, RSTag, Source};
use crate::cpu::RegisterFile;
use crate::instructions::instructions::{FaultKind, Instr, Word};

/// The outcome of a single broadcast on the common data bus.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CDBBroadcast {
    pub(crate) eu_index: u8,
    pub(crate) rs_tag: RSTag,
    pub(crate) value: Result<Word, FaultKind>,
    // stations that became ready because of this broadcast
    pub(crate) woken: Vec<RSTag>,
    // false when a younger instruction already claimed the destination register
    pub(crate) committed: bool,
}

/// The common data bus. With a single bus only one result is written back per
/// cycle; the remaining completed units keep their result until a later cycle.
/// Older results are served first: units are granted a bus by the cycle in
/// which they completed, and by unit index among units that completed in the
/// same cycle.
pub(crate) struct CommonDataBus {
    pub(crate) count: u8,
}

impl CommonDataBus {
    pub(crate) fn new(count: u8) -> Self {
        Self { count }
    }

    /// Splits the completed units into the ones that get a bus this cycle and
    /// the ones that have to wait. `completing` must already be in priority order.
    pub(crate) fn arbitrate(&self, mut completing: Vec<(u8, RSTag)>) -> (Vec<(u8, RSTag)>, Vec<(u8, RSTag)>) {
        let granted_cnt = completing.len().min(self.count as usize);
        let deferred = completing.split_off(granted_cnt);
        (completing, deferred)
    }

    /// Computes the result of the station bound to `eu_index`, commits it to the
    /// register file, wakes the waiting stations and frees both the unit and the
    /// station.
    pub(crate) fn broadcast(&self,
                            eu_index: u8,
                            rs_tag: RSTag,
                            instr: &Instr,
                            rs_table: &mut RSTable,
                            eu_table: &mut EUTable,
                            reg_status: &mut RegisterStatusTable,
                            reg_file: &mut RegisterFile) -> CDBBroadcast {
        let rs = rs_table.get(rs_tag);
        let value = match rs.source {
            [Source::Value(a), Source::Value(b)] => rs.opcode.evaluate(a, b),
            _ => Err(FaultKind::UnresolvedOperand),
        };

        let committed = reg_status.clear_if_matches(&instr.sink, rs_tag);
        if committed {
            match value {
                Ok(v) => reg_file.set_value(&instr.sink, v),
                Err(_) => reg_file.invalidate(&instr.sink),
            }
        } else {
            debug!("RS{} result for {} is stale, register file untouched", rs_tag, instr.sink);
        }

        let woken = rs_table.on_broadcast(rs_tag, value.ok());

        eu_table.deallocate(eu_index);
        rs_table.release(rs_tag);

        CDBBroadcast { eu_index, rs_tag, value, woken, committed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn val(value: i64) -> Source {
        Source::Value(Word::Int(value))
    }
    use crate::backend::register_status::RegisterStatus;
    use crate::cpu::CPUConfig;
    use crate::instructions::instructions::{Opcode, Operand, UnitClass};

    struct Fixture {
        rs_table: RSTable,
        eu_table: EUTable,
        reg_status: RegisterStatusTable,
        reg_file: RegisterFile,
    }

    impl Fixture {
        fn new() -> Fixture {
            Fixture {
                rs_table: RSTable::new(4),
                eu_table: EUTable::new(&CPUConfig::default()),
                reg_status: RegisterStatusTable::new(),
                reg_file: RegisterFile::new(),
            }
        }

        // allocates and dispatches a station producing `instr.sink`
        fn start(&mut self, index: usize, instr: &Instr, source: [Source; 2]) -> (u8, RSTag) {
            let tag = self.rs_table.allocate(index, instr.opcode, source).unwrap();
            self.reg_status.mark_pending(&instr.sink, tag);
            self.rs_table.mark_dispatched(tag);
            let eu_index = self.eu_table.try_dispatch(tag, UnitClass::Any, 1).unwrap();
            self.eu_table.tick(1);
            (eu_index, tag)
        }

        fn broadcast(&mut self, cdb: &CommonDataBus, eu_index: u8, tag: RSTag, instr: &Instr) -> CDBBroadcast {
            cdb.broadcast(eu_index, tag, instr,
                          &mut self.rs_table, &mut self.eu_table, &mut self.reg_status, &mut self.reg_file)
        }
    }

    #[test]
    fn test_arbitrate_single_bus() {
        let cdb = CommonDataBus::new(1);
        let (granted, deferred) = cdb.arbitrate(vec![(0, 2), (1, 0)]);
        assert_eq!(granted, vec![(0, 2)]);
        assert_eq!(deferred, vec![(1, 0)]);
    }

    #[test]
    fn test_arbitrate_multi_bus() {
        let cdb = CommonDataBus::new(4);
        let (granted, deferred) = cdb.arbitrate(vec![(0, 2), (1, 0)]);
        assert_eq!(granted.len(), 2);
        assert!(deferred.is_empty());
    }

    #[test]
    fn test_broadcast_commits_and_wakes() {
        let mut fixture = Fixture::new();
        let cdb = CommonDataBus::new(1);
        let add = Instr::new(Opcode::ADD, "R1", Operand::reg("R1"), Operand::reg("R2"));

        let (eu_index, tag) = fixture.start(0, &add, [val(10), val(20)]);
        let consumer = fixture.rs_table.allocate(1, Opcode::MUL, [Source::Pending(tag), val(30)]).unwrap();

        let broadcast = fixture.broadcast(&cdb, eu_index, tag, &add);
        assert_eq!(broadcast.value, Ok(Word::Int(30)));
        assert!(broadcast.committed);
        assert_eq!(broadcast.woken, vec![consumer]);
        assert_eq!(fixture.reg_file.get_value("R1"), Some(Word::Int(30)));
        assert_eq!(fixture.rs_table.get(consumer).source, [val(30), val(30)]);
        assert!(fixture.eu_table.all_idle());
    }

    #[test]
    fn test_stale_broadcast_keeps_newer_producer() {
        let mut fixture = Fixture::new();
        let cdb = CommonDataBus::new(1);
        let first = Instr::new(Opcode::ADD, "R3", Operand::imm(1), Operand::imm(1));

        let (eu_index, tag) = fixture.start(0, &first, [val(1), val(1)]);
        let newer = fixture.rs_table.allocate(1, Opcode::SUB, [val(9), val(1)]).unwrap();
        fixture.reg_status.mark_pending("R3", newer);

        let broadcast = fixture.broadcast(&cdb, eu_index, tag, &first);
        assert!(!broadcast.committed);
        assert_eq!(fixture.reg_file.get_value("R3"), None);
        assert_eq!(fixture.reg_status.lookup("R3"),
                   RegisterStatus::Pending(newer));
    }

    #[test]
    fn test_broadcast_divide_by_zero() {
        let mut fixture = Fixture::new();
        let cdb = CommonDataBus::new(1);
        let div = Instr::new(Opcode::DIV, "R4", Operand::imm(1), Operand::imm(0));
        fixture.reg_file.set_value("R4", Word::Int(5));

        let (eu_index, tag) = fixture.start(0, &div, [val(1), val(0)]);
        let broadcast = fixture.broadcast(&cdb, eu_index, tag, &div);

        assert_eq!(broadcast.value, Err(FaultKind::DivideByZero));
        assert_eq!(fixture.reg_file.get_value("R4"), None);
        assert!(fixture.rs_table.all_idle());
    }
}
