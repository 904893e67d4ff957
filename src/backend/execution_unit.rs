use crate::backend::reservation_station::RSTag;
use crate::cpu::CPUConfig;
use crate::instructions::instructions::UnitClass;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum EUState {
    IDLE,
    EXECUTING,
    // finished executing, waiting for a common data bus
    COMPLETED,
}

/// A single execution unit.
pub(crate) struct EU {
    pub(crate) index: u8,
    pub(crate) class: UnitClass,
    pub(crate) rs_tag: Option<RSTag>,
    pub(crate) cycles_remaining: u8,
    pub(crate) state: EUState,
    // the cycle in which execution finished
    pub(crate) completed_at: Option<u64>,
}

impl EU {
    fn reset(&mut self) {
        self.rs_tag = None;
        self.cycles_remaining = 0;
        self.state = EUState::IDLE;
        self.completed_at = None;
    }
}

/// The table containing all execution units of the core.
pub(crate) struct EUTable {
    array: Vec<EU>,
}

impl EUTable {
    pub(crate) fn new(cpu_config: &CPUConfig) -> EUTable {
        let array = (0..cpu_config.eu_count)
            .map(|i| EU {
                index: i,
                class: cpu_config.eu_class(i),
                cycles_remaining: 0,
                rs_tag: None,
                state: EUState::IDLE,
                completed_at: None,
            })
            .collect();

        EUTable { array }
    }

    pub(crate) fn get(&self, eu_index: u8) -> &EU {
        &self.array[eu_index as usize]
    }

    pub(crate) fn all_idle(&self) -> bool {
        self.array.iter().all(|eu| eu.state == EUState::IDLE)
    }

    pub(crate) fn has_capable(&self, class: UnitClass) -> bool {
        self.array.iter().any(|eu| eu.class.accepts(class))
    }

    /// Binds the station to the lowest numbered idle unit that can execute `class`.
    pub(crate) fn try_dispatch(&mut self, rs_tag: RSTag, class: UnitClass, latency: u8) -> Option<u8> {
        debug_assert!(latency > 0);

        let eu = self.array.iter_mut()
            .find(|eu| eu.state == EUState::IDLE && eu.class.accepts(class))?;

        debug_assert!(eu.rs_tag.is_none());
        eu.state = EUState::EXECUTING;
        eu.rs_tag = Some(rs_tag);
        eu.cycles_remaining = latency;
        Some(eu.index)
    }

    /// Advances every executing unit by one cycle. Returns the units that
    /// finished in this cycle together with their stations.
    pub(crate) fn tick(&mut self, cycle: u64) -> Vec<(u8, RSTag)> {
        let mut finished = Vec::new();
        for eu in self.array.iter_mut() {
            if eu.state != EUState::EXECUTING {
                continue;
            }

            eu.cycles_remaining -= 1;
            if eu.cycles_remaining > 0 {
                // the execution unit isn't finished with its work
                continue;
            }

            eu.state = EUState::COMPLETED;
            eu.completed_at = Some(cycle);
            if let Some(tag) = eu.rs_tag {
                finished.push((eu.index, tag));
            }
        }
        finished
    }

    /// Units holding a result that still needs to be broadcast, oldest
    /// completion first and by unit index within the same cycle.
    pub(crate) fn completing(&self) -> Vec<(u8, RSTag)> {
        let mut completed: Vec<&EU> = self.array.iter()
            .filter(|eu| eu.state == EUState::COMPLETED)
            .collect();
        completed.sort_by_key(|eu| (eu.completed_at, eu.index));

        completed.iter()
            .filter_map(|eu| eu.rs_tag.map(|tag| (eu.index, tag)))
            .collect()
    }

    pub(crate) fn deallocate(&mut self, eu_index: u8) {
        let eu = &mut self.array[eu_index as usize];
        debug_assert!(eu.state == EUState::COMPLETED);
        debug_assert!(eu.rs_tag.is_some());
        eu.reset();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item=&EU> {
        self.array.iter()
    }
}
