/// Per-node protocol state and the host seams it drives.
///
/// `ProtocolState` glues the slot scheduler to the proximity tracker. It owns
/// no radio and no clock: the host hands those in through the [`Radio`] and
/// [`Clock`] traits on every slot tick and feeds receptions in through
/// [`ProtocolState::on_packet`]. All three entry points must be serialized
/// by the host (one task, or one lock); none of them block except through
/// `Clock::wait_slot`.
use heapless::Vec;

use crate::config::NodeConfig;
use crate::defaults::{ARENA_RECORDS, TABLE_BUCKETS};
use crate::packet::{AnnouncePacket, NodeId};
use crate::proximity::{ProximityEvent, Tracker};
use crate::schedule::{Scheduler, SlotAction};
use crate::time::Tick;

// ── Host seams ──────────────────────────────────────────────────────

/// Broadcast radio driven by the slot scheduler.
pub trait Radio {
    fn radio_on(&mut self);
    fn radio_off(&mut self);
    /// Broadcast one announcement. Failures are the radio's to log;
    /// a lost frame is indistinguishable from a missed slot.
    fn send(&mut self, packet: &AnnouncePacket);
}

/// Monotonic time source.
pub trait Clock {
    /// Whole seconds since an arbitrary epoch.
    fn now(&self) -> Tick;
    /// Sleep for one slot duration. Used between burst frames.
    fn wait_slot(&mut self);
}

/// An announcement as delivered by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reception {
    pub packet: AnnouncePacket,
    pub rssi: i16,
    /// Local clock at delivery. All proximity timing uses this, never the
    /// sender's timestamp.
    pub received_at: Tick,
}

/// Running counters for status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Announcements sent.
    pub sent: u32,
    /// Valid announcements received from other nodes.
    pub received: u32,
    /// Received but below the RSSI threshold.
    pub weak: u32,
    /// Sentinel source id or our own id echoed back.
    pub rejected: u32,
    pub detections: u32,
    pub leaves: u32,
    pub absences: u32,
}

impl Stats {
    pub const fn new() -> Self {
        Self {
            sent: 0,
            received: 0,
            weak: 0,
            rejected: 0,
            detections: 0,
            leaves: 0,
            absences: 0,
        }
    }

    fn count(&mut self, event: &ProximityEvent) {
        let counter = match event {
            ProximityEvent::Detect { .. } => &mut self.detections,
            ProximityEvent::Leave { .. } => &mut self.leaves,
            ProximityEvent::Absent { .. } => &mut self.absences,
        };
        *counter = counter.wrapping_add(1);
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Events produced by one tick or sweep.
pub type Events<const RECORDS: usize> = Vec<ProximityEvent, RECORDS>;

// ── Protocol state ──────────────────────────────────────────────────

pub struct ProtocolState<const BUCKETS: usize, const RECORDS: usize> {
    scheduler: Scheduler,
    tracker: Tracker<BUCKETS, RECORDS>,
    stats: Stats,
    swept_cycles: u32,
    idle_swept_at: Option<Tick>,
}

/// Protocol state sized with the stock table dimensions.
pub type DefaultProtocol = ProtocolState<TABLE_BUCKETS, ARENA_RECORDS>;

impl<const BUCKETS: usize, const RECORDS: usize> ProtocolState<BUCKETS, RECORDS> {
    pub fn new(node_id: NodeId, config: &NodeConfig) -> Self {
        Self {
            scheduler: Scheduler::new(node_id, &config.schedule),
            tracker: Tracker::new(config.proximity),
            stats: Stats::new(),
            swept_cycles: 0,
            idle_swept_at: None,
        }
    }

    /// Inbound path: apply one received announcement.
    pub fn on_packet(&mut self, rx: &Reception) -> Option<ProximityEvent> {
        let source = rx.packet.source_id;
        if !rx.packet.has_valid_source() || source == self.scheduler.node_id() {
            self.stats.rejected = self.stats.rejected.wrapping_add(1);
            return None;
        }
        self.stats.received = self.stats.received.wrapping_add(1);
        if !self.tracker.config().qualifies(rx.rssi) {
            self.stats.weak = self.stats.weak.wrapping_add(1);
            return None;
        }

        let event = self.tracker.on_packet(source, rx.rssi, rx.received_at);
        if let Some(event) = &event {
            self.stats.count(event);
        }
        event
    }

    /// Timer path for blocking hosts: run one full slot against `radio`
    /// and `clock`, then sweep if a cycle just completed.
    pub fn on_timer_tick<R: Radio, C: Clock>(&mut self, radio: &mut R, clock: &mut C) -> Events<RECORDS> {
        if let SlotAction::ActiveTransmit {
            frames,
            power_on,
            keep_radio_on,
        } = self.advance_slot()
        {
            if power_on {
                radio.radio_on();
            }
            for frame in 0..frames {
                if frame > 0 {
                    clock.wait_slot();
                }
                let packet = self.stamp(clock.now());
                radio.send(&packet);
            }
            if !keep_radio_on {
                radio.radio_off();
            }
        }
        self.sweep_if_cycle_complete(clock.now())
    }

    /// Start the next slot. Async hosts call this, [`stamp`](Self::stamp)
    /// and [`sweep_if_cycle_complete`](Self::sweep_if_cycle_complete)
    /// themselves in place of [`on_timer_tick`](Self::on_timer_tick).
    pub fn advance_slot(&mut self) -> SlotAction {
        self.scheduler.advance_slot()
    }

    /// Build the next outgoing announcement.
    pub fn stamp(&mut self, now: Tick) -> AnnouncePacket {
        self.stats.sent = self.stats.sent.wrapping_add(1);
        self.scheduler.stamp(now)
    }

    /// Sweep once per completed slot cycle.
    pub fn sweep_if_cycle_complete(&mut self, now: Tick) -> Events<RECORDS> {
        let cycles = self.scheduler.cycles();
        if cycles == self.swept_cycles {
            return Vec::new();
        }
        self.swept_cycles = cycles;
        self.on_sweep(now)
    }

    /// Sweep path: age all tracked peers against `now`.
    pub fn on_sweep(&mut self, now: Tick) -> Events<RECORDS> {
        let events = self.tracker.sweep(now);
        for event in &events {
            self.stats.count(event);
        }
        events
    }

    /// Slot tick while the schedule is stopped. No slot advances, but
    /// tracked peers keep aging: sweeps at most once per second of `now`.
    pub fn on_idle_tick(&mut self, now: Tick) -> Events<RECORDS> {
        if self.idle_swept_at == Some(now) {
            return Vec::new();
        }
        self.idle_swept_at = Some(now);
        self.on_sweep(now)
    }

    /// Pause the schedule. The host switches the radio off; the next
    /// active slot after a restart powers it on again.
    pub fn stop(&mut self) {
        self.scheduler.release_radio();
    }

    pub fn set_min_rssi(&mut self, min_rssi: i16) {
        log::info!("RSSI threshold set to {} dBm", min_rssi);
        self.tracker.set_min_rssi(min_rssi);
    }

    pub fn node_id(&self) -> NodeId {
        self.scheduler.node_id()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn tracker(&self) -> &Tracker<BUCKETS, RECORDS> {
        &self.tracker
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Insertions rejected because the table was full.
    pub fn table_full(&self) -> u32 {
        self.tracker.table().table_full()
    }

    /// Peers currently tracked in any state.
    pub fn tracked(&self) -> usize {
        self.tracker.table().len()
    }

    /// Peers currently detected.
    pub fn present(&self) -> usize {
        self.tracker.detected_count()
    }
}
