/// Per-neighbor presence state machine with hysteresis.
///
/// A peer is **detected** only after a sustained run of qualifying
/// announcements (`detect_after`) and declared **absent** only after a
/// sustained silence (`absent_after`). The two thresholds differ, so a peer
/// hovering around the edge of range produces one `Detect` / `Absent` pair
/// rather than a stream of flapping events.
///
/// ```text
///   (no record) ──qualifying pkt──▶ Nearing ──dwell ≥ detect_after──▶ Present
///        ▲                            │                                │  ▲
///        └──silence ≥ short_timeout───┘          silence ≥ leave_grace ▼  │ qualifying pkt
///        ▲                                               (emits Leave) Leaving
///        └──────────────silence ≥ absent_after (emits Absent)──────────┘
/// ```
///
/// Receptions can only move a peer toward `Present`; silence cannot be
/// received, so every transition away from presence happens in [`Tracker::sweep`].
use heapless::Vec;

use crate::config::ProximityConfig;
use crate::packet::{NodeId, EMPTY_ID};
use crate::table::NeighborTable;
use crate::time::{elapsed, reached, Tick};

/// Presence classification of a tracked peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    /// Freshly claimed record, not yet classified.
    Unseen,
    /// Qualifying packets arriving, dwell time accumulating.
    Nearing,
    /// Dwell threshold met; `Detect` has fired.
    Present,
    /// Present peer gone quiet; absence time accumulating.
    Leaving,
}

/// Mutable tracking state for one peer. Lives in the neighbor table arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityRecord {
    /// Owning key; always equals the table key mapping to this record.
    pub id: NodeId,
    pub state: PresenceState,
    /// Start of the window counting toward the next transition (dwell while
    /// nearing, silence while leaving). `None` when no window is open.
    pub first_seen_in_state: Option<Tick>,
    /// Most recent qualifying reception.
    pub last_seen: Option<Tick>,
    /// When `Detect` fired for the current presence interval.
    pub detected_at: Option<Tick>,
}

impl ProximityRecord {
    pub const fn new(id: NodeId) -> Self {
        Self {
            id,
            state: PresenceState::Unseen,
            first_seen_in_state: None,
            last_seen: None,
            detected_at: None,
        }
    }

    /// Contents of an unclaimed arena slot.
    pub const fn vacant() -> Self {
        Self::new(EMPTY_ID)
    }

    /// Present or leaving: `Detect` has fired and `Absent` has not.
    pub fn is_detected(&self) -> bool {
        matches!(self.state, PresenceState::Present | PresenceState::Leaving)
    }
}

/// Discrete output of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityEvent {
    /// Peer confirmed nearby; `since` is when its dwell window opened.
    Detect { id: NodeId, since: Tick },
    /// Present peer has gone quiet for the leave grace; `since` is its last
    /// qualifying reception. May still come back without a new `Detect`.
    Leave { id: NodeId, since: Tick },
    /// Peer confirmed gone; `since` is its last qualifying reception and
    /// `dwell` the seconds between detection and that reception.
    Absent { id: NodeId, since: Tick, dwell: u32 },
}

impl ProximityEvent {
    pub fn id(&self) -> NodeId {
        match *self {
            ProximityEvent::Detect { id, .. }
            | ProximityEvent::Leave { id, .. }
            | ProximityEvent::Absent { id, .. } => id,
        }
    }
}

/// Neighbor table plus the transition rules applied to it.
pub struct Tracker<const BUCKETS: usize, const RECORDS: usize> {
    table: NeighborTable<BUCKETS, RECORDS>,
    config: ProximityConfig,
}

impl<const BUCKETS: usize, const RECORDS: usize> Tracker<BUCKETS, RECORDS> {
    pub fn new(config: ProximityConfig) -> Self {
        Self {
            table: NeighborTable::new(),
            config,
        }
    }

    pub fn config(&self) -> &ProximityConfig {
        &self.config
    }

    pub fn set_min_rssi(&mut self, min_rssi: i16) {
        self.config.min_rssi = min_rssi;
    }

    pub fn table(&self) -> &NeighborTable<BUCKETS, RECORDS> {
        &self.table
    }

    pub fn state_of(&self, id: NodeId) -> Option<PresenceState> {
        self.table.get_ref(id).map(|r| r.state)
    }

    /// Peers currently detected (present or leaving).
    pub fn detected_count(&self) -> usize {
        self.table
            .ids()
            .filter_map(|id| self.table.get_ref(id))
            .filter(|r| r.is_detected())
            .count()
    }

    /// Apply one inbound announcement from `id` received at `at` with
    /// signal strength `rssi`.
    ///
    /// Weak packets are ignored outright. Returns `Detect` when this packet
    /// completes the dwell window.
    pub fn on_packet(&mut self, id: NodeId, rssi: i16, at: Tick) -> Option<ProximityEvent> {
        if !self.config.qualifies(rssi) {
            return None;
        }

        if !self.table.contains(id) {
            // Table full: peer goes untracked this time round.
            let record = self.table.insert_new(id)?;
            record.state = PresenceState::Nearing;
            record.first_seen_in_state = Some(at);
            record.last_seen = Some(at);
            log::debug!("Node {} nearing at {}", id, at);
        }

        let detect_after = self.config.detect_after;
        let record = self.table.get(id)?;
        let last_seen = latest(record.last_seen, at);
        record.last_seen = Some(last_seen);

        match record.state {
            PresenceState::Unseen | PresenceState::Nearing => {
                record.state = PresenceState::Nearing;
                let start = *record.first_seen_in_state.get_or_insert(at);
                if !reached(last_seen, start, detect_after) {
                    return None;
                }
                record.state = PresenceState::Present;
                record.first_seen_in_state = None;
                record.detected_at = Some(last_seen);
                log::info!("{} DETECT {}", start, id);
                Some(ProximityEvent::Detect { id, since: start })
            }
            PresenceState::Present => None,
            PresenceState::Leaving => {
                record.state = PresenceState::Present;
                record.first_seen_in_state = None;
                log::debug!("Node {} back in range at {}", id, at);
                None
            }
        }
    }

    /// Age every tracked peer against `now`, releasing records whose
    /// silence has run out. Events come back in bucket order, at most one
    /// per peer. A sweep that finds a present peer already past
    /// `absent_after` reports only `Absent`.
    pub fn sweep(&mut self, now: Tick) -> Vec<ProximityEvent, RECORDS> {
        let config = self.config;
        let mut expired: Vec<NodeId, RECORDS> = Vec::new();
        let mut events: Vec<ProximityEvent, RECORDS> = Vec::new();

        self.table.for_each_mut(|record| {
            let Some(last_seen) = record.last_seen else {
                // Claimed but never classified.
                let _ = expired.push(record.id);
                return;
            };
            let silent = elapsed(now, last_seen);

            match record.state {
                PresenceState::Unseen => {
                    let _ = expired.push(record.id);
                }
                PresenceState::Nearing => {
                    if silent >= config.short_timeout {
                        log::debug!("Node {} faded before detection", record.id);
                        let _ = expired.push(record.id);
                    }
                }
                PresenceState::Present | PresenceState::Leaving => {
                    if silent >= config.absent_after {
                        let dwell = record
                            .detected_at
                            .map_or(0, |detected| elapsed(last_seen, detected));
                        log::info!("{} ABSENT {}", last_seen, record.id);
                        let _ = events.push(ProximityEvent::Absent {
                            id: record.id,
                            since: last_seen,
                            dwell,
                        });
                        let _ = expired.push(record.id);
                    } else if record.state == PresenceState::Present
                        && silent >= config.leave_grace
                    {
                        record.state = PresenceState::Leaving;
                        record.first_seen_in_state = Some(now);
                        log::info!("{} LEAVE {}", last_seen, record.id);
                        let _ = events.push(ProximityEvent::Leave {
                            id: record.id,
                            since: last_seen,
                        });
                    }
                }
            }
        });

        for id in expired {
            self.table.remove(id);
        }
        events
    }
}

/// Later of the stored and the new reception time.
fn latest(previous: Option<Tick>, at: Tick) -> Tick {
    match previous {
        Some(prev) if elapsed(at, prev) == 0 => prev,
        _ => at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG: i16 = -50;
    const WEAK: i16 = -80;

    type TestTracker = Tracker<16, 8>;

    fn tracker() -> TestTracker {
        Tracker::new(ProximityConfig::new())
    }

    /// Feed one strong packet per second from `id` over `from..=to`,
    /// collecting any events.
    fn feed(t: &mut TestTracker, id: NodeId, from: Tick, to: Tick) -> std::vec::Vec<(Tick, ProximityEvent)> {
        (from..=to)
            .filter_map(|at| t.on_packet(id, STRONG, at).map(|e| (at, e)))
            .collect()
    }

    // ── Inbound rules ───────────────────────────────────────────────

    #[test]
    fn first_packet_starts_nearing() {
        let mut t = tracker();
        assert_eq!(t.on_packet(3, STRONG, 100), None);
        let record = t.table().get_ref(3).unwrap();
        assert_eq!(record.state, PresenceState::Nearing);
        assert_eq!(record.first_seen_in_state, Some(100));
        assert_eq!(record.last_seen, Some(100));
    }

    #[test]
    fn weak_packet_is_ignored() {
        let mut t = tracker();
        assert_eq!(t.on_packet(3, WEAK, 0), None);
        assert!(t.table().is_empty());
    }

    #[test]
    fn threshold_packet_qualifies() {
        let mut t = tracker();
        t.on_packet(3, -65, 0);
        assert_eq!(t.state_of(3), Some(PresenceState::Nearing));
    }

    #[test]
    fn detect_fires_exactly_at_threshold() {
        let mut t = tracker();
        let t0 = 100;
        let events = feed(&mut t, 8, t0, t0 + 14);
        assert!(events.is_empty());
        assert_eq!(
            t.on_packet(8, STRONG, t0 + 15),
            Some(ProximityEvent::Detect { id: 8, since: t0 })
        );
        let record = t.table().get_ref(8).unwrap();
        assert_eq!(record.state, PresenceState::Present);
        assert_eq!(record.first_seen_in_state, None);
    }

    #[test]
    fn detect_fires_once_per_presence() {
        let mut t = tracker();
        let events = feed(&mut t, 8, 0, 120);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], (15, ProximityEvent::Detect { id: 8, since: 0 }));
    }

    #[test]
    fn sparse_packets_detect_on_first_late_enough() {
        let mut t = tracker();
        for at in [0, 2, 4, 6, 8, 10, 12, 14] {
            assert_eq!(t.on_packet(1, STRONG, at), None);
        }
        assert_eq!(
            t.on_packet(1, STRONG, 16),
            Some(ProximityEvent::Detect { id: 1, since: 0 })
        );
    }

    #[test]
    fn zero_dwell_detects_on_first_packet() {
        let config = ProximityConfig {
            detect_after: 0,
            ..ProximityConfig::new()
        };
        let mut t: TestTracker = Tracker::new(config);
        assert_eq!(
            t.on_packet(5, STRONG, 7),
            Some(ProximityEvent::Detect { id: 5, since: 7 })
        );
    }

    #[test]
    fn out_of_order_packet_keeps_latest_last_seen() {
        let mut t = tracker();
        t.on_packet(2, STRONG, 10);
        t.on_packet(2, STRONG, 9);
        assert_eq!(t.table().get_ref(2).unwrap().last_seen, Some(10));
    }

    #[test]
    fn raised_threshold_filters_packets() {
        let mut t = tracker();
        t.set_min_rssi(-40);
        assert_eq!(t.on_packet(2, STRONG, 0), None);
        assert!(t.table().is_empty());
        assert_eq!(t.config().min_rssi, -40);
    }

    // ── Sweep rules ─────────────────────────────────────────────────

    #[test]
    fn nearing_peer_dropped_after_short_timeout() {
        let mut t = tracker();
        feed(&mut t, 4, 0, 5);
        assert!(t.sweep(7).is_empty());
        assert!(t.table().contains(4));
        assert!(t.sweep(8).is_empty());
        assert!(!t.table().contains(4));
    }

    #[test]
    fn nearing_dwell_restarts_after_drop() {
        let mut t = tracker();
        feed(&mut t, 4, 0, 10);
        t.sweep(20);
        let events = feed(&mut t, 4, 21, 36);
        assert_eq!(events, vec![(36, ProximityEvent::Detect { id: 4, since: 21 })]);
    }

    #[test]
    fn absence_fires_exactly_at_threshold() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        let t1 = 20;
        assert_eq!(
            t.sweep(t1 + 29).as_slice(),
            &[ProximityEvent::Leave { id: 6, since: t1 }]
        );
        let events = t.sweep(t1 + 30);
        assert_eq!(
            events.as_slice(),
            &[ProximityEvent::Absent {
                id: 6,
                since: t1,
                dwell: 5
            }]
        );
        assert!(!t.table().contains(6));
    }

    #[test]
    fn absence_fires_once() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        assert_eq!(t.sweep(50).len(), 1);
        assert!(t.sweep(51).is_empty());
        assert!(t.sweep(500).is_empty());
    }

    #[test]
    fn present_peer_enters_leaving_after_grace() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        assert!(t.sweep(23).is_empty());
        assert_eq!(t.state_of(6), Some(PresenceState::Present));
        assert_eq!(
            t.sweep(24).as_slice(),
            &[ProximityEvent::Leave { id: 6, since: 20 }]
        );
        let record = t.table().get_ref(6).unwrap();
        assert_eq!(record.state, PresenceState::Leaving);
        assert_eq!(record.first_seen_in_state, Some(24));
        assert_eq!(t.detected_count(), 1);
    }

    #[test]
    fn leave_fires_once_while_leaving() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        assert_eq!(t.sweep(25).len(), 1);
        for now in 26..50 {
            assert!(t.sweep(now).is_empty(), "repeated leave at {now}");
        }
        assert!(matches!(
            t.sweep(50).as_slice(),
            &[ProximityEvent::Absent { id: 6, .. }]
        ));
    }

    #[test]
    fn late_sweep_reports_absent_without_leave() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        let events = t.sweep(55);
        assert!(matches!(events.as_slice(), &[ProximityEvent::Absent { id: 6, since: 20, .. }]));
    }

    #[test]
    fn nearing_peer_never_leaves() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 5);
        assert!(t.sweep(8).is_empty());
        assert_eq!(t.state_of(6), None);
    }

    #[test]
    fn leaving_peer_returns_without_second_detect() {
        let mut t = tracker();
        feed(&mut t, 6, 0, 20);
        assert_eq!(
            t.sweep(30).as_slice(),
            &[ProximityEvent::Leave { id: 6, since: 20 }]
        );
        assert_eq!(t.state_of(6), Some(PresenceState::Leaving));
        assert_eq!(t.on_packet(6, STRONG, 31), None);
        let record = t.table().get_ref(6).unwrap();
        assert_eq!(record.state, PresenceState::Present);
        assert_eq!(record.first_seen_in_state, None);
        // Absence clock restarts from the new reception; a second quiet
        // spell reports a second leave.
        assert_eq!(
            t.sweep(60).as_slice(),
            &[ProximityEvent::Leave { id: 6, since: 31 }]
        );
        assert!(matches!(
            t.sweep(61).as_slice(),
            &[ProximityEvent::Absent { id: 6, since: 31, .. }]
        ));
    }

    #[test]
    fn peer_detected_again_after_absence() {
        let mut t = tracker();
        feed(&mut t, 9, 0, 15);
        assert_eq!(t.sweep(45).len(), 1);
        let events = feed(&mut t, 9, 100, 115);
        assert_eq!(events, vec![(115, ProximityEvent::Detect { id: 9, since: 100 })]);
    }

    #[test]
    fn sweep_tolerates_now_before_last_seen() {
        let mut t = tracker();
        feed(&mut t, 2, 0, 20);
        assert!(t.sweep(10).is_empty());
        assert_eq!(t.state_of(2), Some(PresenceState::Present));
    }

    #[test]
    fn sweep_handles_many_peers_in_bucket_order() {
        let mut t = tracker();
        for id in [3, 1, 2] {
            feed(&mut t, id, 0, 15);
        }
        let events = t.sweep(45);
        let ids: std::vec::Vec<NodeId> = events.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(t.table().is_empty());
    }

    #[test]
    fn full_table_drops_new_peer_and_keeps_others() {
        let mut t: Tracker<4, 2> = Tracker::new(ProximityConfig::new());
        t.on_packet(1, STRONG, 0);
        t.on_packet(2, STRONG, 0);
        assert_eq!(t.on_packet(3, STRONG, 0), None);
        assert_eq!(t.table().table_full(), 1);
        assert_eq!(t.state_of(1), Some(PresenceState::Nearing));
        assert_eq!(t.state_of(2), Some(PresenceState::Nearing));
        assert_eq!(t.state_of(3), None);
    }

    #[test]
    fn event_accessors() {
        let detect = ProximityEvent::Detect { id: 4, since: 9 };
        let leave = ProximityEvent::Leave { id: 6, since: 30 };
        let absent = ProximityEvent::Absent {
            id: 5,
            since: 40,
            dwell: 12,
        };
        assert_eq!((detect.id(), leave.id(), absent.id()), (4, 6, 5));
    }
}
