/// Startup configuration for a proximity node.
///
/// All values are fixed when the node boots. The only runtime adjustment is
/// the RSSI threshold, which the companion can move via a host command
/// without reflashing.
use core::fmt;

use crate::defaults;
use crate::schedule::SlotScheme;

/// Thresholds driving the per-neighbor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityConfig {
    /// Seconds of qualifying reception before `Detect` fires.
    pub detect_after: u32,
    /// Seconds of silence before a present peer is declared absent.
    pub absent_after: u32,
    /// Seconds of silence before a nearing peer is silently dropped.
    pub short_timeout: u32,
    /// Seconds of silence before a present peer is marked as leaving.
    pub leave_grace: u32,
    /// Minimum RSSI for a packet to qualify. Weaker packets are ignored.
    pub min_rssi: i16,
}

impl ProximityConfig {
    pub const fn new() -> Self {
        Self {
            detect_after: defaults::DETECT_SECONDS,
            absent_after: defaults::ABSENT_SECONDS,
            short_timeout: defaults::SHORT_TIMEOUT_SECONDS,
            leave_grace: defaults::LEAVE_GRACE_SECONDS,
            min_rssi: defaults::RSSI_THRESHOLD,
        }
    }

    /// Whether a reception at `rssi` counts toward proximity.
    #[inline]
    pub fn qualifies(&self, rssi: i16) -> bool {
        rssi >= self.min_rssi
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.short_timeout == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.leave_grace > self.absent_after {
            return Err(ConfigError::LeaveAfterAbsent {
                leave_grace: self.leave_grace,
                absent_after: self.absent_after,
            });
        }
        Ok(())
    }
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot timing and transmit behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Slot duration in microseconds.
    pub slot_us: u32,
    /// Frames per active slot.
    pub burst: u8,
    /// Active-slot predicate.
    pub scheme: SlotScheme,
}

impl ScheduleConfig {
    pub const fn new() -> Self {
        Self {
            slot_us: defaults::SLOT_US,
            burst: defaults::BURST_FRAMES,
            scheme: SlotScheme::Coprime {
                p1: defaults::COPRIME_P1,
                p2: defaults::COPRIME_P2,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slot_us == 0 {
            return Err(ConfigError::ZeroSlot);
        }
        if self.burst == 0 || self.burst > defaults::MAX_BURST_FRAMES {
            return Err(ConfigError::Burst(self.burst));
        }
        self.scheme.validate()
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeConfig {
    pub schedule: ScheduleConfig,
    pub proximity: ProximityConfig,
}

impl NodeConfig {
    pub const fn new() -> Self {
        Self {
            schedule: ScheduleConfig::new(),
            proximity: ProximityConfig::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;
        self.proximity.validate()
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Slot duration of zero.
    ZeroSlot,
    /// Burst size outside `1..=MAX_BURST_FRAMES`.
    Burst(u8),
    /// A coprime-scheme period of zero.
    ZeroPeriod,
    /// Coprime-scheme periods sharing a factor.
    NotCoprime { p1: u16, p2: u16 },
    /// Grid side of zero.
    ZeroDim,
    /// Grid coordinate outside the grid.
    Coordinate { dim: u16, row: u16, col: u16 },
    /// Short timeout of zero.
    ZeroTimeout,
    /// Leaving grace longer than the absence threshold.
    LeaveAfterAbsent { leave_grace: u32, absent_after: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroSlot => write!(f, "slot duration must be non-zero"),
            ConfigError::Burst(n) => write!(
                f,
                "burst size {} outside 1..={}",
                n,
                defaults::MAX_BURST_FRAMES
            ),
            ConfigError::ZeroPeriod => write!(f, "slot periods must be non-zero"),
            ConfigError::NotCoprime { p1, p2 } => {
                write!(f, "slot periods {} and {} are not coprime", p1, p2)
            }
            ConfigError::ZeroDim => write!(f, "grid dimension must be non-zero"),
            ConfigError::Coordinate { dim, row, col } => {
                write!(f, "grid coordinate ({}, {}) outside {}x{}", row, col, dim, dim)
            }
            ConfigError::ZeroTimeout => write!(f, "short timeout must be non-zero"),
            ConfigError::LeaveAfterAbsent {
                leave_grace,
                absent_after,
            } => write!(
                f,
                "leave grace {}s exceeds absence threshold {}s",
                leave_grace, absent_after
            ),
        }
    }
}

impl core::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(NodeConfig::new().validate(), Ok(()));
        assert_eq!(NodeConfig::default(), NodeConfig::new());
    }

    #[test]
    fn qualifies_is_inclusive() {
        let config = ProximityConfig::new();
        assert!(config.qualifies(-65));
        assert!(config.qualifies(-40));
        assert!(!config.qualifies(-66));
    }

    #[test]
    fn zero_burst_rejected() {
        let mut config = ScheduleConfig::new();
        config.burst = 0;
        assert_eq!(config.validate(), Err(ConfigError::Burst(0)));
    }

    #[test]
    fn oversized_burst_rejected() {
        let mut config = ScheduleConfig::new();
        config.burst = defaults::MAX_BURST_FRAMES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_slot_rejected() {
        let mut config = ScheduleConfig::new();
        config.slot_us = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroSlot));
    }

    #[test]
    fn leave_grace_must_not_exceed_absence() {
        let mut config = ProximityConfig::new();
        config.leave_grace = 31;
        assert_eq!(
            config.validate(),
            Err(ConfigError::LeaveAfterAbsent {
                leave_grace: 31,
                absent_after: 30
            })
        );
    }

    #[test]
    fn error_display_mentions_values() {
        let mut buf = heapless::String::<64>::new();
        let err = ConfigError::NotCoprime { p1: 4, p2: 6 };
        core::fmt::write(&mut buf, format_args!("{}", err)).unwrap();
        assert_eq!(buf.as_str(), "slot periods 4 and 6 are not coprime");
    }
}
