/// Duty-cycled slot scheduler.
///
/// Time is divided into fixed-length slots that repeat in cycles. In each
/// slot the node either keeps its radio off or wakes, broadcasts a short
/// burst of announcements and listens. Which slots are active comes from one
/// of two schemes, both guaranteeing that two nodes with independent
/// parameters overlap at least once per cycle:
///
/// - **Coprime**: active when either of two coprime periods divides the slot
///   index. Cycle length `p1 * p2`, `p1 + p2 - 1` active slots.
/// - **Grid**: the cycle is a `dim x dim` matrix; a node picks a row and a
///   column and is active on every slot in either. Cycle length `dim²`,
///   `2 * dim - 1` active slots, and any two grids intersect.
///
/// The scheduler holds no peer state and never blocks.
use crate::config::{ConfigError, ScheduleConfig};
use crate::packet::{AnnouncePacket, NodeId};
use crate::time::Tick;

/// Active-slot predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotScheme {
    /// Active iff `slot % p1 == 0 || slot % p2 == 0`.
    Coprime { p1: u16, p2: u16 },
    /// Active iff `slot / dim == row || slot % dim == col`.
    Grid { dim: u16, row: u16, col: u16 },
}

impl SlotScheme {
    /// Grid scheme with coordinates drawn from a random seed.
    pub fn grid_from_seed(dim: u16, seed: u32) -> Self {
        let d = dim.max(1) as u32;
        Self::Grid {
            dim,
            row: (seed % d) as u16,
            col: ((seed / d) % d) as u16,
        }
    }

    /// Slots per cycle. The slot counter wraps at this value.
    pub fn cycle_len(&self) -> u32 {
        let len = match *self {
            SlotScheme::Coprime { p1, p2 } => p1 as u32 * p2 as u32,
            SlotScheme::Grid { dim, .. } => dim as u32 * dim as u32,
        };
        len.max(1)
    }

    /// Whether the radio is active in `slot`. The index is reduced modulo
    /// the cycle length first.
    pub fn is_active(&self, slot: u32) -> bool {
        let s = slot % self.cycle_len();
        match *self {
            SlotScheme::Coprime { p1, p2 } => {
                if p1 == 0 || p2 == 0 {
                    return false;
                }
                s % p1 as u32 == 0 || s % p2 as u32 == 0
            }
            SlotScheme::Grid { dim, row, col } => {
                if dim == 0 {
                    return false;
                }
                let d = dim as u32;
                s / d == row as u32 || s % d == col as u32
            }
        }
    }

    /// Number of active slots in one full cycle.
    pub fn active_per_cycle(&self) -> u32 {
        (0..self.cycle_len()).filter(|&s| self.is_active(s)).count() as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            SlotScheme::Coprime { p1, p2 } => {
                if p1 == 0 || p2 == 0 {
                    return Err(ConfigError::ZeroPeriod);
                }
                if gcd(p1, p2) != 1 {
                    return Err(ConfigError::NotCoprime { p1, p2 });
                }
                Ok(())
            }
            SlotScheme::Grid { dim, row, col } => {
                if dim == 0 {
                    return Err(ConfigError::ZeroDim);
                }
                if row >= dim || col >= dim {
                    return Err(ConfigError::Coordinate { dim, row, col });
                }
                Ok(())
            }
        }
    }
}

fn gcd(mut a: u16, mut b: u16) -> u16 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// What the host should do with the radio in the slot just started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotAction {
    /// Inactive slot; the radio is (and stays) off.
    Idle,
    /// Active slot: send `frames` announcements one slot apart.
    ActiveTransmit {
        frames: u8,
        /// Radio must be switched on first. False when the previous active
        /// slot left it on.
        power_on: bool,
        /// Next slot is also active; leave the radio on after the burst.
        keep_radio_on: bool,
    },
}

/// Per-node slot state machine.
#[derive(Debug, Clone)]
pub struct Scheduler {
    node_id: NodeId,
    scheme: SlotScheme,
    burst: u8,
    slot: u32,
    cycles: u32,
    sequence: u32,
    radio_held: bool,
}

impl Scheduler {
    pub fn new(node_id: NodeId, config: &ScheduleConfig) -> Self {
        Self {
            node_id,
            scheme: config.scheme,
            burst: config.burst,
            slot: 0,
            cycles: 0,
            sequence: 0,
            radio_held: false,
        }
    }

    /// Start the next slot. Called once per slot duration; the only place
    /// the slot counter moves.
    pub fn advance_slot(&mut self) -> SlotAction {
        let current = self.slot;
        let next = (current + 1) % self.scheme.cycle_len();
        self.slot = next;
        if next == 0 {
            self.cycles = self.cycles.wrapping_add(1);
        }

        if !self.scheme.is_active(current) {
            self.radio_held = false;
            return SlotAction::Idle;
        }

        let power_on = !self.radio_held;
        let keep_radio_on = self.scheme.is_active(next);
        self.radio_held = keep_radio_on;

        SlotAction::ActiveTransmit {
            frames: self.burst,
            power_on,
            keep_radio_on,
        }
    }

    /// Build the next outgoing frame. Call immediately before each send so
    /// the timestamp reflects transmit time.
    pub fn stamp(&mut self, now: Tick) -> AnnouncePacket {
        self.sequence = self.sequence.wrapping_add(1);
        AnnouncePacket {
            source_id: self.node_id,
            sequence: self.sequence,
            timestamp: now,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn scheme(&self) -> SlotScheme {
        self.scheme
    }

    /// Index of the slot the next `advance_slot` call will start.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Completed cycles since boot.
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Forget that the radio was left on. Call whenever the host switches
    /// the radio off outside the schedule, so the next active slot powers
    /// it back up.
    pub fn release_radio(&mut self) {
        self.radio_held = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(scheme: SlotScheme) -> Scheduler {
        let config = ScheduleConfig {
            scheme,
            ..ScheduleConfig::new()
        };
        Scheduler::new(7, &config)
    }

    // ── Scheme fairness ─────────────────────────────────────────────

    #[test]
    fn coprime_active_fraction() {
        let scheme = SlotScheme::Coprime { p1: 11, p2: 13 };
        assert_eq!(scheme.cycle_len(), 143);
        assert_eq!(scheme.active_per_cycle(), 11 + 13 - 1);
    }

    #[test]
    fn grid_active_count_for_every_coordinate() {
        for row in 0..8 {
            for col in 0..8 {
                let scheme = SlotScheme::Grid { dim: 8, row, col };
                assert_eq!(scheme.active_per_cycle(), 2 * 8 - 1, "row {row} col {col}");
            }
        }
    }

    #[test]
    fn any_two_grids_overlap_within_a_cycle() {
        let a = SlotScheme::Grid { dim: 8, row: 1, col: 6 };
        for row in 0..8 {
            for col in 0..8 {
                let b = SlotScheme::Grid { dim: 8, row, col };
                let shared = (0..64).any(|s| a.is_active(s) && b.is_active(s));
                assert!(shared, "no overlap with row {row} col {col}");
            }
        }
    }

    #[test]
    fn grid_index_reduced_modulo_cycle() {
        let scheme = SlotScheme::Grid { dim: 4, row: 1, col: 2 };
        for s in 0..16 {
            assert_eq!(scheme.is_active(s), scheme.is_active(s + 16));
        }
    }

    #[test]
    fn grid_from_seed_stays_in_range() {
        for seed in [0u32, 1, 63, 64, 12345, u32::MAX] {
            match SlotScheme::grid_from_seed(8, seed) {
                SlotScheme::Grid { dim, row, col } => {
                    assert_eq!(dim, 8);
                    assert!(row < 8 && col < 8);
                }
                other => panic!("unexpected scheme {other:?}"),
            }
        }
    }

    #[test]
    fn validate_rejects_shared_factor() {
        let scheme = SlotScheme::Coprime { p1: 6, p2: 9 };
        assert_eq!(scheme.validate(), Err(ConfigError::NotCoprime { p1: 6, p2: 9 }));
    }

    #[test]
    fn validate_rejects_out_of_grid_coordinate() {
        let scheme = SlotScheme::Grid { dim: 4, row: 4, col: 0 };
        assert!(scheme.validate().is_err());
    }

    // ── Scheduler ───────────────────────────────────────────────────

    #[test]
    fn first_slot_of_coprime_cycle_is_active() {
        let mut s = scheduler(SlotScheme::Coprime { p1: 11, p2: 13 });
        assert_eq!(
            s.advance_slot(),
            SlotAction::ActiveTransmit {
                frames: 2,
                power_on: true,
                keep_radio_on: false
            }
        );
        assert_eq!(s.advance_slot(), SlotAction::Idle);
    }

    #[test]
    fn counter_wraps_and_counts_cycles() {
        let mut s = scheduler(SlotScheme::Coprime { p1: 11, p2: 13 });
        let mut active = 0;
        for _ in 0..143 {
            if s.advance_slot() != SlotAction::Idle {
                active += 1;
            }
        }
        assert_eq!(active, 23);
        assert_eq!(s.slot(), 0);
        assert_eq!(s.cycles(), 1);
    }

    #[test]
    fn consecutive_active_slots_hold_radio_on() {
        // Row 0 makes slots 0..4 active back to back.
        let mut s = scheduler(SlotScheme::Grid { dim: 4, row: 0, col: 3 });
        let mut actions = heapless::Vec::<SlotAction, 4>::new();
        for _ in 0..4 {
            actions.push(s.advance_slot()).unwrap();
        }
        let flags: heapless::Vec<(bool, bool), 4> = actions
            .iter()
            .map(|a| match *a {
                SlotAction::ActiveTransmit {
                    power_on,
                    keep_radio_on,
                    ..
                } => (power_on, keep_radio_on),
                SlotAction::Idle => panic!("row slots must be active"),
            })
            .collect();
        assert_eq!(
            flags.as_slice(),
            &[(true, true), (false, true), (false, true), (false, false)]
        );
    }

    #[test]
    fn stamp_pre_increments_sequence() {
        let mut s = scheduler(SlotScheme::Coprime { p1: 11, p2: 13 });
        let first = s.stamp(5);
        let second = s.stamp(6);
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.source_id, 7);
        assert_eq!(second.timestamp, 6);
    }

    #[test]
    fn released_radio_is_powered_on_next_active_slot() {
        let mut s = scheduler(SlotScheme::Grid { dim: 4, row: 0, col: 3 });
        s.advance_slot();
        s.release_radio();
        assert_eq!(
            s.advance_slot(),
            SlotAction::ActiveTransmit {
                frames: 2,
                power_on: true,
                keep_radio_on: true
            }
        );
    }
}
