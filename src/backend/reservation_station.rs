use std::fmt;
use std::fmt::Display;

use crate::instructions::instructions::{mnemonic, Opcode, Word};

/// The identity of a reservation station. Consumers wait on this tag, never on
/// a register name or an opcode.
pub type RSTag = u16;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RSState {
    IDLE,
    // allocated; operands may still be pending
    BUSY,
    // bound to a functional unit, kept alive until its result is broadcast
    DISPATCHED,
}

/// A renamed source operand of a reservation station. `Value` is Vj/Vk with an
/// empty Qj/Qk, `Pending` is a non-empty Qj/Qk.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Source {
    Value(Word),
    Pending(RSTag),
    // the producer faulted, or the register never had a value
    Unresolved,
}

impl Source {
    pub fn is_pending(&self) -> bool {
        matches!(self, Source::Pending(_))
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Value(v) => write!(f, "{}", v),
            Source::Pending(tag) => write!(f, "RS{}", tag),
            Source::Unresolved => write!(f, "?"),
        }
    }
}

// A single reservation station
pub(crate) struct RS {
    pub(crate) tag: RSTag,
    pub(crate) state: RSState,
    pub(crate) opcode: Opcode,
    pub(crate) source: [Source; 2],
    // position of the instruction in program order
    pub(crate) instr_index: usize,
}

impl RS {
    fn new(tag: RSTag) -> Self {
        Self {
            tag,
            state: RSState::IDLE,
            opcode: Opcode::ADD,
            source: [Source::Unresolved, Source::Unresolved],
            instr_index: 0,
        }
    }

    fn reset(&mut self) {
        self.state = RSState::IDLE;
        self.source = [Source::Unresolved, Source::Unresolved];
        self.instr_index = 0;
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == RSState::BUSY && !self.source.iter().any(Source::is_pending)
    }

    pub(crate) fn qj(&self) -> Option<RSTag> {
        match self.source[0] {
            Source::Pending(tag) => Some(tag),
            _ => None,
        }
    }

    pub(crate) fn qk(&self) -> Option<RSTag> {
        match self.source[1] {
            Source::Pending(tag) => Some(tag),
            _ => None,
        }
    }
}

impl Display for RS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RS{} {} {} {}", self.tag, mnemonic(self.opcode), self.source[0], self.source[1])
    }
}

pub(crate) struct RSTable {
    pub(crate) capacity: u16,
    array: Vec<RS>,
}

impl RSTable {
    pub(crate) fn new(capacity: u16) -> Self {
        let array = (0..capacity).map(RS::new).collect();
        RSTable { capacity, array }
    }

    pub(crate) fn get(&self, tag: RSTag) -> &RS {
        &self.array[tag as usize]
    }

    pub(crate) fn get_mut(&mut self, tag: RSTag) -> &mut RS {
        &mut self.array[tag as usize]
    }

    pub(crate) fn has_idle(&self) -> bool {
        self.array.iter().any(|rs| rs.state == RSState::IDLE)
    }

    pub(crate) fn all_idle(&self) -> bool {
        self.array.iter().all(|rs| rs.state == RSState::IDLE)
    }

    /// Claims the lowest numbered idle station. Returns None when every station
    /// is busy; that is a structural stall, the caller retries next cycle.
    pub(crate) fn allocate(&mut self, instr_index: usize, opcode: Opcode, source: [Source; 2]) -> Option<RSTag> {
        let rs = self.array.iter_mut().find(|rs| rs.state == RSState::IDLE)?;
        rs.state = RSState::BUSY;
        rs.opcode = opcode;
        rs.source = source;
        rs.instr_index = instr_index;
        Some(rs.tag)
    }

    /// All stations that can be dispatched, in ascending tag order.
    pub(crate) fn ready_stations(&self) -> Vec<RSTag> {
        self.array.iter()
            .filter(|rs| rs.is_ready())
            .map(|rs| rs.tag)
            .collect()
    }

    pub(crate) fn mark_dispatched(&mut self, tag: RSTag) {
        let rs = self.get_mut(tag);
        debug_assert!(rs.is_ready(), "RS{} dispatched while not ready", tag);
        rs.state = RSState::DISPATCHED;
    }

    /// Delivers the result of `producer` to every waiting station. A `None`
    /// value means the producer faulted. Returns the stations that became ready.
    pub(crate) fn on_broadcast(&mut self, producer: RSTag, value: Option<Word>) -> Vec<RSTag> {
        let mut woken = Vec::new();
        for rs in self.array.iter_mut() {
            if rs.state != RSState::BUSY {
                continue;
            }

            let mut matched = false;
            for source in rs.source.iter_mut() {
                if *source == Source::Pending(producer) {
                    *source = match value {
                        Some(v) => Source::Value(v),
                        None => Source::Unresolved,
                    };
                    matched = true;
                }
            }

            if matched && rs.is_ready() {
                woken.push(rs.tag);
            }
        }
        woken
    }

    pub(crate) fn release(&mut self, tag: RSTag) {
        let rs = self.get_mut(tag);
        debug_assert!(rs.state != RSState::IDLE, "RS{} released while idle", tag);
        rs.reset();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&RS> {
        self.array.iter()
    }
}
