//! proxtrace: ESP-IDF std firmware
//!
//! Thread-based implementation using FreeRTOS threads and std::sync::mpsc
//! channels. Feature-equivalent to the no_std Embassy firmware but uses
//! ESP-IDF services (ESP-NOW via esp-idf-svc).

#[cfg(feature = "m5stickc")]
mod buzzer;
#[cfg(feature = "m5stickc")]
mod display;

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, AtomicU8, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use proxtrace::{board, comm, config, defaults, node, packet, protocol, proximity, schedule};

use comm::LineReader;
use config::NodeConfig;
use esp_idf_svc::espnow::{EspNow, PeerInfo, ReceiveInfo, BROADCAST};
use esp_idf_svc::hal::peripherals::Peripherals;
use esp_idf_svc::sys::{
    esp, esp_get_free_heap_size, esp_random, esp_wifi_set_channel, wifi_interface_t_WIFI_IF_STA,
    wifi_second_chan_t_WIFI_SECOND_CHAN_NONE,
};
use esp_idf_svc::wifi::{BlockingWifi, EspWifi};
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use node::{Clock, DefaultProtocol, Radio, Reception, Stats};
use packet::{AnnouncePacket, NodeId};
use protocol::{DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};
use proximity::ProximityEvent;
use schedule::SlotScheme;

// ── Shared state (same atomics as no_std) ────────────────────────────

pub(crate) static RUNNING: AtomicBool = AtomicBool::new(true);
pub(crate) static BUZZER_ENABLED: AtomicBool = AtomicBool::new(true);
pub(crate) static NODE_ID: AtomicU32 = AtomicU32::new(0);
pub(crate) static TRACKED: AtomicU8 = AtomicU8::new(0);
pub(crate) static PRESENT: AtomicU8 = AtomicU8::new(0);
pub(crate) static TABLE_FULL: AtomicU32 = AtomicU32::new(0);
pub(crate) static MIN_RSSI: AtomicI16 = AtomicI16::new(defaults::RSSI_THRESHOLD);

/// Protocol counters published by the protocol thread after every slot.
pub(crate) static STATS: Mutex<Stats> = Mutex::new(Stats::new());

/// Receiver gate: frames are only accepted while the schedule has the
/// radio in an active slot.
static LISTENING: AtomicBool = AtomicBool::new(false);

pub(crate) static LAST_EVENT: Mutex<heapless::String<32>> = Mutex::new(heapless::String::new());

/// Boot time: captured once in main, used for uptime calculation.
static BOOT_INSTANT: Mutex<Option<Instant>> = Mutex::new(None);

pub(crate) fn uptime_secs() -> u32 {
    BOOT_INSTANT
        .lock()
        .ok()
        .and_then(|i| i.map(|boot| boot.elapsed().as_secs() as u32))
        .unwrap_or(0)
}

/// Everything the protocol thread consumes, in arrival order.
enum Inbound {
    Frame(Reception),
    Command(HostCommand),
}

// ── Platform adapters ────────────────────────────────────────────────

/// ESP-NOW broadcast radio. The WiFi driver keeps the RF front end
/// powered, so on/off only gates the receive path.
struct EspNowRadio {
    espnow: EspNow<'static>,
}

impl Radio for EspNowRadio {
    fn radio_on(&mut self) {
        LISTENING.store(true, Ordering::Relaxed);
    }

    fn radio_off(&mut self) {
        LISTENING.store(false, Ordering::Relaxed);
    }

    fn send(&mut self, packet: &AnnouncePacket) {
        if let Err(e) = self.espnow.send(BROADCAST, &packet.encode()) {
            log::warn!("ESP-NOW send failed: {:?}", e);
        }
    }
}

/// Uptime clock; burst spacing sleeps the protocol thread.
struct SlotClock {
    slot: Duration,
}

impl Clock for SlotClock {
    fn now(&self) -> u32 {
        uptime_secs()
    }

    fn wait_slot(&mut self) {
        thread::sleep(self.slot);
    }
}

fn main() -> anyhow::Result<()> {
    // Bind the ESP-IDF logger to the `log` facade
    esp_idf_svc::log::EspLogger::initialize_default();

    // Record boot time
    *BOOT_INSTANT.lock().unwrap() = Some(Instant::now());

    // ── Peripherals ──────────────────────────────────────────────────

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Hold power on (M5StickC Plus2)
    #[cfg(feature = "m5stickc")]
    let _power_hold = {
        use esp_idf_svc::hal::gpio::PinDriver;
        let mut p = PinDriver::output(peripherals.pins.gpio4)?;
        p.set_high()?;
        p
    };

    // ── WiFi in station mode, fixed channel ──────────────────────────

    let mut wifi = BlockingWifi::wrap(
        EspWifi::new(peripherals.modem, sys_loop.clone(), Some(nvs))?,
        sys_loop,
    )?;
    wifi.set_configuration(&esp_idf_svc::wifi::Configuration::Client(Default::default()))?;
    wifi.start()?;
    unsafe {
        esp!(esp_wifi_set_channel(
            board::RADIO_CHANNEL,
            wifi_second_chan_t_WIFI_SECOND_CHAN_NONE
        ))?;
    }

    // ── Node identity and schedule ───────────────────────────────────

    let node_id = packet::node_id_from_mac(&wifi.wifi().sta_netif().get_mac()?);
    NODE_ID.store(node_id, Ordering::Relaxed);

    let mut node_config = NodeConfig::new();
    let seed = unsafe { esp_random() };
    node_config.schedule.scheme = SlotScheme::grid_from_seed(defaults::GRID_DIM, seed);
    node_config.validate()?;

    log::info!("proxtrace v{} starting on {} (std) as node {:08x}", VERSION, board::BOARD_NAME, node_id);
    log::info!("Slot scheme {:?}, {} us slots", node_config.schedule.scheme, node_config.schedule.slot_us);

    // ── Channels ─────────────────────────────────────────────────────

    let (inbound_tx, inbound_rx) = mpsc::sync_channel::<Inbound>(16);
    let (output_tx, output_rx) = mpsc::sync_channel::<MsgBuffer>(8);
    #[cfg(feature = "m5stickc")]
    let (buzzer_tx, buzzer_rx) = mpsc::sync_channel::<ProximityEvent>(1);

    // ── ESP-NOW ──────────────────────────────────────────────────────

    let espnow = EspNow::take()?;
    espnow.add_peer(PeerInfo {
        peer_addr: BROADCAST,
        channel: board::RADIO_CHANNEL,
        ifidx: wifi_interface_t_WIFI_IF_STA,
        encrypt: false,
        ..Default::default()
    })?;

    let frame_tx = inbound_tx.clone();
    espnow.register_recv_cb(move |info: &ReceiveInfo, data: &[u8]| {
        if !LISTENING.load(Ordering::Relaxed) {
            return;
        }
        if let Some(packet) = AnnouncePacket::decode(data) {
            let _ = frame_tx.try_send(Inbound::Frame(Reception {
                packet,
                rssi: info.rx_ctrl.rssi() as i16,
                received_at: uptime_secs(),
            }));
        }
    })?;
    log::info!("ESP-NOW ready on channel {}", board::RADIO_CHANNEL);

    // ── Buzzer thread (M5StickC) ─────────────────────────────────────

    #[cfg(feature = "m5stickc")]
    {
        let ledc_timer = peripherals.ledc.timer0;
        let ledc_channel = peripherals.ledc.channel0;
        let buzzer_pin = peripherals.pins.gpio2;
        thread::Builder::new()
            .name("buzzer".into())
            .stack_size(2048)
            .spawn(move || {
                buzzer::buzzer_thread(buzzer_rx, ledc_timer, ledc_channel, buzzer_pin);
            })?;
        log::info!("Buzzer thread spawned");
    }

    // ── Display thread (M5StickC) ────────────────────────────────────

    #[cfg(feature = "m5stickc")]
    {
        let spi2 = peripherals.spi2;
        let mosi = peripherals.pins.gpio15;
        let clk = peripherals.pins.gpio13;
        let cs_pin = peripherals.pins.gpio5;
        let dc_pin = peripherals.pins.gpio14;
        let rst_pin = peripherals.pins.gpio12;
        let bl_pin = peripherals.pins.gpio27;
        thread::Builder::new()
            .name("display".into())
            .stack_size(4096)
            .spawn(move || {
                display::display_thread(spi2, mosi, clk, cs_pin, dc_pin, rst_pin, bl_pin);
            })?;
        log::info!("Display thread spawned");
    }

    // ── Protocol thread ──────────────────────────────────────────────

    let radio = EspNowRadio { espnow };
    let clock = SlotClock {
        slot: Duration::from_micros(node_config.schedule.slot_us as u64),
    };
    let protocol_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("protocol".into())
        .stack_size(6144)
        .spawn(move || {
            protocol_thread(
                inbound_rx,
                radio,
                clock,
                node_id,
                node_config,
                protocol_output_tx,
                #[cfg(feature = "m5stickc")]
                buzzer_tx,
            );
        })?;
    log::info!("Protocol thread spawned");

    // ── Output thread ────────────────────────────────────────────────

    thread::Builder::new()
        .name("output".into())
        .stack_size(4096)
        .spawn(move || {
            output_thread(output_rx);
        })?;
    log::info!("Output thread spawned");

    // ── Status thread ────────────────────────────────────────────────

    let status_output_tx = output_tx.clone();
    thread::Builder::new()
        .name("status".into())
        .stack_size(4096)
        .spawn(move || {
            status_thread(status_output_tx);
        })?;
    log::info!("Status thread spawned");

    log::info!(
        "Build target: {}",
        if cfg!(feature = "xiao") {
            "xiao (ESP32-S3)"
        } else if cfg!(feature = "m5stickc") {
            "m5stickc (ESP32)"
        } else {
            "unknown"
        }
    );

    // ── Serial commands: runs on main thread, keeps `wifi` alive ────

    command_loop(inbound_tx);
}

// ── Output helpers ───────────────────────────────────────────────────

fn emit(msg: &DeviceMessage, output_tx: &SyncSender<MsgBuffer>) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = output_tx.try_send(buf);
    }
}

fn status_message() -> DeviceMessage {
    let stats = STATS.lock().map(|s| *s).unwrap_or_default();
    DeviceMessage::Status {
        running: RUNNING.load(Ordering::Relaxed),
        uptime: uptime_secs(),
        node: NODE_ID.load(Ordering::Relaxed),
        tracked: TRACKED.load(Ordering::Relaxed),
        present: PRESENT.load(Ordering::Relaxed),
        table_full: TABLE_FULL.load(Ordering::Relaxed),
        sent: stats.sent,
        received: stats.received,
        weak: stats.weak,
        rejected: stats.rejected,
        detections: stats.detections,
        leaves: stats.leaves,
        absences: stats.absences,
        min_rssi: MIN_RSSI.load(Ordering::Relaxed),
        heap_free: unsafe { esp_get_free_heap_size() },
        board: board::BOARD_NAME,
        version: VERSION,
    }
}

// ── Protocol thread ──────────────────────────────────────────────────

fn protocol_thread(
    inbound_rx: mpsc::Receiver<Inbound>,
    mut radio: EspNowRadio,
    mut clock: SlotClock,
    node_id: NodeId,
    node_config: NodeConfig,
    output_tx: SyncSender<MsgBuffer>,
    #[cfg(feature = "m5stickc")] buzzer_tx: SyncSender<ProximityEvent>,
) {
    log::info!("Protocol thread started");

    let mut state = DefaultProtocol::new(node_id, &node_config);
    let mut next_slot = Instant::now();

    let on_event = |event: &ProximityEvent| {
        emit(&DeviceMessage::from_event(event, uptime_secs()), &output_tx);

        if let Ok(mut last) = LAST_EVENT.lock() {
            last.clear();
            let id = event.id();
            let _ = match event {
                ProximityEvent::Detect { .. } => core::fmt::write(&mut *last, format_args!("NEAR {:08x}", id)),
                ProximityEvent::Leave { .. } => core::fmt::write(&mut *last, format_args!("LEAVE {:08x}", id)),
                ProximityEvent::Absent { dwell, .. } => {
                    core::fmt::write(&mut *last, format_args!("GONE {:08x} {}s", id, dwell))
                }
            };
        }

        #[cfg(feature = "m5stickc")]
        let _ = buzzer_tx.try_send(*event);
    };

    loop {
        // Receptions first, so they precede this slot's sweep.
        while let Ok(inbound) = inbound_rx.try_recv() {
            match inbound {
                Inbound::Frame(rx) => {
                    if let Some(event) = state.on_packet(&rx) {
                        on_event(&event);
                    }
                }
                Inbound::Command(cmd) => {
                    let mut running = RUNNING.load(Ordering::Relaxed);
                    if let Some(enabled) = comm::handle_command(&cmd, &mut state, &mut running) {
                        BUZZER_ENABLED.store(enabled, Ordering::Relaxed);
                    }
                    RUNNING.store(running, Ordering::Relaxed);
                    if !running {
                        radio.radio_off();
                    }
                    if matches!(cmd, HostCommand::GetStatus) {
                        publish(&state);
                        emit(&status_message(), &output_tx);
                    }
                }
            }
        }

        if RUNNING.load(Ordering::Relaxed) {
            for event in state.on_timer_tick(&mut radio, &mut clock) {
                on_event(&event);
            }
        } else {
            for event in state.on_idle_tick(uptime_secs()) {
                on_event(&event);
            }
        }
        publish(&state);

        // Hold slot boundaries; a burst that overran restarts the grid.
        next_slot += clock.slot;
        let now = Instant::now();
        if next_slot > now {
            thread::sleep(next_slot - now);
        } else {
            next_slot = now;
        }
    }
}

fn publish(state: &DefaultProtocol) {
    if let Ok(mut stats) = STATS.lock() {
        *stats = state.stats();
    }
    TRACKED.store(state.tracked() as u8, Ordering::Relaxed);
    PRESENT.store(state.present() as u8, Ordering::Relaxed);
    TABLE_FULL.store(state.table_full(), Ordering::Relaxed);
    MIN_RSSI.store(state.tracker().config().min_rssi, Ordering::Relaxed);
}

// ── Output thread ────────────────────────────────────────────────────

fn output_thread(output_rx: mpsc::Receiver<MsgBuffer>) {
    log::info!("Output thread started");

    while let Ok(msg) = output_rx.recv() {
        if let Ok(s) = std::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

// ── Status thread ────────────────────────────────────────────────────

fn status_thread(output_tx: SyncSender<MsgBuffer>) {
    loop {
        thread::sleep(Duration::from_secs(30));
        emit(&status_message(), &output_tx);
    }
}

// ── Serial command loop ──────────────────────────────────────────────

fn command_loop(inbound_tx: SyncSender<Inbound>) -> ! {
    let mut line_reader = LineReader::new();
    let mut stdin = std::io::stdin();
    let mut buf = [0u8; 64];

    loop {
        match stdin.read(&mut buf) {
            Ok(0) | Err(_) => thread::sleep(Duration::from_millis(50)),
            Ok(n) => {
                for &byte in &buf[..n] {
                    if let Some(line) = line_reader.feed(byte) {
                        if let Some(cmd) = comm::parse_command(line) {
                            let _ = inbound_tx.try_send(Inbound::Command(cmd));
                        }
                    }
                }
            }
        }
    }
}
