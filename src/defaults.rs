/// Default protocol parameters.
///
/// Timing and threshold values carried over from the CC2650 field trials
/// (Contiki `rtimer` at 80 slots per second, two-frame bursts). Everything
/// here is startup configuration; see [`crate::config`].

// ── Slot schedule ───────────────────────────────────────────────────

/// Slot duration in microseconds (1/80 s).
pub const SLOT_US: u32 = 12_500;

/// Announcement frames sent per active slot.
pub const BURST_FRAMES: u8 = 2;

/// Upper bound on `BURST_FRAMES` accepted by config validation.
pub const MAX_BURST_FRAMES: u8 = 8;

/// Coprime periods for the "either period divides the slot" scheme.
/// Duty cycle over a full cycle is (P1 + P2 - 1) / (P1 * P2).
pub const COPRIME_P1: u16 = 11;
pub const COPRIME_P2: u16 = 13;

/// Side of the row/column grid scheme. Each node is active in
/// 2 * GRID_DIM - 1 of every GRID_DIM² slots.
pub const GRID_DIM: u16 = 8;

// ── Proximity thresholds (seconds / dBm) ────────────────────────────

/// Continuous qualifying reception needed before a peer counts as present.
pub const DETECT_SECONDS: u32 = 15;

/// Silence after which a present peer is declared absent.
pub const ABSENT_SECONDS: u32 = 30;

/// Silence after which a not-yet-present peer is forgotten.
pub const SHORT_TIMEOUT_SECONDS: u32 = 3;

/// Silence after which a present peer is marked as leaving.
pub const LEAVE_GRACE_SECONDS: u32 = 4;

/// Weakest RSSI that still counts as "nearby".
pub const RSSI_THRESHOLD: i16 = -65;

// ── Neighbor table sizing ───────────────────────────────────────────

/// Buckets in the open-addressed id index.
pub const TABLE_BUCKETS: usize = 16;

/// Proximity records in the arena. May be smaller than `TABLE_BUCKETS`.
pub const ARENA_RECORDS: usize = 8;
