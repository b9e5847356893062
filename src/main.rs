//! proxtrace: duty-cycled proximity beacon (Embassy firmware)
//!
//! Broadcasts short ESP-NOW announcements in a sparse slot schedule, listens
//! for peers in the same slots, and reports `detect`, `leave` and `absent`
//! events as NDJSON over serial. Host commands arrive on the same serial line.

#![no_std]
#![no_main]

extern crate alloc;

use esp_backtrace as _;

esp_bootloader_esp_idf::esp_app_desc!();

// Hardware-specific modules (binary crate only)
#[cfg(feature = "m5stickc")]
mod buzzer;

// Re-export library modules so binary submodules (buzzer) can use crate::*
pub(crate) use proxtrace::{board, comm, config, defaults, node, packet, protocol, proximity, schedule};

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};
use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Ticker, Timer};
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{Config as UartConfig, UartRx};
use esp_radio::esp_now::{EspNowReceiver, EspNowSender, BROADCAST_ADDRESS};

use comm::LineReader;
use config::NodeConfig;
use node::{DefaultProtocol, Reception, Stats};
use packet::{AnnouncePacket, NodeId};
use protocol::{DeviceMessage, HostCommand, MsgBuffer, MAX_MSG_LEN, VERSION};
use proximity::ProximityEvent;
use schedule::{SlotAction, SlotScheme};

// ── Channel type aliases ──────────────────────────────────────────────

/// Everything the protocol task consumes, in arrival order.
enum Inbound {
    Frame(Reception),
    Command(HostCommand),
}

type InboundChannel = Channel<CriticalSectionRawMutex, Inbound, 16>;
type OutputChannel = Channel<CriticalSectionRawMutex, MsgBuffer, 8>;

// ── Static channels and shared state ─────────────────────────────────

/// Received frames and host commands for the protocol task
static INBOUND_CHANNEL: InboundChannel = Channel::new();

/// Static channel for serialized output messages
static OUTPUT_CHANNEL: OutputChannel = Channel::new();

/// Whether the slot schedule runs (toggled by host Start/Stop commands)
static RUNNING: AtomicBool = AtomicBool::new(true);

/// Receiver gate: frames are only accepted while inside an active slot
static LISTENING: AtomicBool = AtomicBool::new(false);

/// Protocol counters published by the protocol task after every slot,
/// read by the status task.
#[derive(Clone, Copy)]
struct Snapshot {
    node: NodeId,
    stats: Stats,
    tracked: u8,
    present: u8,
    table_full: u32,
    min_rssi: i16,
}

static SNAPSHOT: Mutex<Cell<Snapshot>> = Mutex::new(Cell::new(Snapshot {
    node: 0,
    stats: Stats::new(),
    tracked: 0,
    present: 0,
    table_full: 0,
    min_rssi: defaults::RSSI_THRESHOLD,
}));

/// Whether the buzzer is enabled (M5StickC only)
#[cfg(feature = "m5stickc")]
pub(crate) static BUZZER_ENABLED: AtomicBool = AtomicBool::new(true);

/// Signal channel for buzzer alerts (M5StickC only)
#[cfg(feature = "m5stickc")]
pub(crate) static BUZZER_SIGNAL: Channel<CriticalSectionRawMutex, ProximityEvent, 1> = Channel::new();

fn uptime_secs() -> u32 {
    (Instant::now().as_millis() / 1000) as u32
}

fn snapshot() -> Snapshot {
    critical_section::with(|cs| SNAPSHOT.borrow(cs).get())
}

/// Serialize and queue a message for serial output. Drops if the queue is full.
fn emit(msg: &DeviceMessage) {
    let mut buf = MsgBuffer::new();
    buf.resize_default(MAX_MSG_LEN).ok();
    if let Some(len) = comm::serialize_message(msg, &mut buf) {
        buf.truncate(len);
        let _ = OUTPUT_CHANNEL.try_send(buf);
    }
}

fn emit_status() {
    let snap = snapshot();
    emit(&DeviceMessage::Status {
        running: RUNNING.load(Ordering::Relaxed),
        uptime: uptime_secs(),
        node: snap.node,
        tracked: snap.tracked,
        present: snap.present,
        table_full: snap.table_full,
        sent: snap.stats.sent,
        received: snap.stats.received,
        weak: snap.stats.weak,
        rejected: snap.stats.rejected,
        detections: snap.stats.detections,
        leaves: snap.stats.leaves,
        absences: snap.stats.absences,
        min_rssi: snap.min_rssi,
        heap_free: esp_alloc::HEAP.free() as u32,
        board: board::BOARD_NAME,
        version: VERSION,
    });
}

fn emit_event(event: &ProximityEvent) {
    emit(&DeviceMessage::from_event(event, uptime_secs()));

    #[cfg(feature = "m5stickc")]
    let _ = BUZZER_SIGNAL.try_send(*event);
}

// ── Entry point ──────────────────────────────────────────────────────

#[esp_rtos::main]
async fn main(spawner: embassy_executor::Spawner) {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // ESP-NOW needs the WiFi stack; ESP32 is tighter on DRAM.
    #[cfg(feature = "esp32")]
    {
        esp_alloc::heap_allocator!(size: 64 * 1024);
    }
    #[cfg(not(feature = "esp32"))]
    {
        esp_alloc::heap_allocator!(size: 96 * 1024);
    }

    // Start the RTOS: requires timer + software interrupt
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    // ── Node identity and schedule ───────────────────────────────────

    let node_id = packet::node_id_from_mac(&esp_hal::efuse::Efuse::mac_address());
    let seed = esp_hal::rng::Rng::new().random();

    let mut node_config = NodeConfig::new();
    node_config.schedule.scheme = SlotScheme::grid_from_seed(defaults::GRID_DIM, seed);
    if let Err(e) = node_config.validate() {
        log::error!("Invalid configuration: {}", e);
        loop {
            Timer::after(Duration::from_secs(60)).await;
        }
    }

    log::info!("proxtrace v{} starting on {} as node {:08x}", VERSION, board::BOARD_NAME, node_id);
    log::info!("Slot scheme {:?}, {} us slots", node_config.schedule.scheme, node_config.schedule.slot_us);

    // Hold power on (M5StickC Plus2 needs GPIO4 HIGH to stay powered)
    #[cfg(feature = "m5stickc")]
    let _power_hold = esp_hal::gpio::Output::new(
        peripherals.GPIO4,
        esp_hal::gpio::Level::High,
        esp_hal::gpio::OutputConfig::default(),
    );

    #[cfg(feature = "m5stickc")]
    {
        spawner
            .spawn(buzzer::buzzer_task(peripherals.LEDC, peripherals.GPIO2))
            .unwrap();
        log::info!("Buzzer task spawned");
    }

    // ── Serial command input ─────────────────────────────────────────

    #[cfg(feature = "esp32")]
    let uart_rx_pin = peripherals.GPIO3;
    #[cfg(not(feature = "esp32"))]
    let uart_rx_pin = peripherals.GPIO44;

    let uart_rx = UartRx::new(
        peripherals.UART0,
        UartConfig::default().with_baudrate(comm::SERIAL_BAUD),
    )
    .expect("UART init failed")
    .with_rx(uart_rx_pin)
    .into_async();

    // ── ESP-NOW radio ────────────────────────────────────────────────

    let (mut wifi_controller, wifi_interfaces) =
        esp_radio::wifi::new(peripherals.WIFI, Default::default()).expect("WiFi init failed");
    wifi_controller
        .set_mode(esp_radio::wifi::WifiMode::Sta)
        .expect("WiFi mode failed");
    wifi_controller.start().expect("WiFi start failed");

    let esp_now = wifi_interfaces.esp_now;
    esp_now
        .set_channel(board::RADIO_CHANNEL)
        .expect("ESP-NOW channel failed");
    log::info!("ESP-NOW ready on channel {}", board::RADIO_CHANNEL);

    let (_manager, sender, receiver) = esp_now.split();

    spawner.spawn(output_serial_task()).unwrap();
    spawner.spawn(status_task()).unwrap();
    spawner.spawn(command_task(uart_rx)).unwrap();
    spawner.spawn(receive_task(receiver)).unwrap();
    spawner.spawn(protocol_task(sender, node_id, node_config)).unwrap();

    // Keep the WiFi controller alive for the lifetime of the radio
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

// ── Radio receive ────────────────────────────────────────────────────

/// Receive task: decodes announcements and queues them for the protocol
/// task while the schedule has the radio in an active slot.
#[embassy_executor::task]
async fn receive_task(mut receiver: EspNowReceiver<'static>) {
    log::info!("Receive task started");

    loop {
        let received = receiver.receive_async().await;

        if !LISTENING.load(Ordering::Relaxed) {
            continue;
        }

        let Some(packet) = AnnouncePacket::decode(received.data()) else {
            continue;
        };

        let _ = INBOUND_CHANNEL.try_send(Inbound::Frame(Reception {
            packet,
            rssi: received.info.rx_control.rssi as i16,
            received_at: uptime_secs(),
        }));
    }
}

// ── Protocol ─────────────────────────────────────────────────────────

/// Protocol task: sole owner of the protocol state. Drains inbound frames
/// and commands, then runs one slot per tick.
#[embassy_executor::task]
async fn protocol_task(mut sender: EspNowSender<'static>, node_id: NodeId, node_config: NodeConfig) {
    log::info!("Protocol task started");

    let mut state = DefaultProtocol::new(node_id, &node_config);
    let slot = Duration::from_micros(node_config.schedule.slot_us as u64);
    let mut ticker = Ticker::every(slot);

    loop {
        // Receptions first, so they precede this slot's sweep.
        while let Ok(inbound) = INBOUND_CHANNEL.try_receive() {
            match inbound {
                Inbound::Frame(rx) => {
                    if let Some(event) = state.on_packet(&rx) {
                        emit_event(&event);
                    }
                }
                Inbound::Command(cmd) => {
                    let mut running = RUNNING.load(Ordering::Relaxed);
                    let buzzer_state = comm::handle_command(&cmd, &mut state, &mut running);

                    #[cfg(feature = "m5stickc")]
                    if let Some(enabled) = buzzer_state {
                        BUZZER_ENABLED.store(enabled, Ordering::Relaxed);
                    }

                    // Suppress unused variable warning on boards without buzzer
                    #[cfg(not(feature = "m5stickc"))]
                    let _ = buzzer_state;

                    RUNNING.store(running, Ordering::Relaxed);
                    if !running {
                        LISTENING.store(false, Ordering::Relaxed);
                    }
                    if matches!(cmd, HostCommand::GetStatus) {
                        publish(&state);
                        emit_status();
                    }
                }
            }
        }

        if RUNNING.load(Ordering::Relaxed) {
            if let SlotAction::ActiveTransmit {
                frames,
                keep_radio_on,
                ..
            } = state.advance_slot()
            {
                LISTENING.store(true, Ordering::Relaxed);
                for frame in 0..frames {
                    if frame > 0 {
                        Timer::after(slot).await;
                    }
                    let packet = state.stamp(uptime_secs());
                    if let Err(e) = sender.send_async(&BROADCAST_ADDRESS, &packet.encode()).await {
                        log::warn!("ESP-NOW send failed: {:?}", e);
                    }
                }
                if !keep_radio_on {
                    LISTENING.store(false, Ordering::Relaxed);
                }
            }

            for event in state.sweep_if_cycle_complete(uptime_secs()) {
                emit_event(&event);
            }
        } else {
            for event in state.on_idle_tick(uptime_secs()) {
                emit_event(&event);
            }
        }

        publish(&state);
        ticker.next().await;
    }
}

fn publish(state: &DefaultProtocol) {
    let snap = Snapshot {
        node: state.node_id(),
        stats: state.stats(),
        tracked: state.tracked() as u8,
        present: state.present() as u8,
        table_full: state.table_full(),
        min_rssi: state.tracker().config().min_rssi,
    };
    critical_section::with(|cs| SNAPSHOT.borrow(cs).set(snap));
}

// ── Serial I/O ───────────────────────────────────────────────────────

/// Serial output task: reads from output channel and logs to serial.
#[embassy_executor::task]
async fn output_serial_task() {
    log::info!("Serial output task started");

    let output_rx = OUTPUT_CHANNEL.receiver();

    loop {
        let msg = output_rx.receive().await;

        // Log to serial via esp-println
        if let Ok(s) = core::str::from_utf8(&msg) {
            log::info!("{}", s.trim_end());
        }
    }
}

/// Serial command task: accumulates NDJSON lines and forwards parsed
/// commands to the protocol task.
#[embassy_executor::task]
async fn command_task(mut uart_rx: UartRx<'static, esp_hal::Async>) {
    let mut line_reader = LineReader::new();
    let mut buf = [0u8; 64];

    loop {
        let n = match uart_rx.read_async(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                log::warn!("UART read error: {:?}", e);
                continue;
            }
        };
        for &byte in &buf[..n] {
            if let Some(line) = line_reader.feed(byte) {
                if let Some(cmd) = comm::parse_command(line) {
                    let _ = INBOUND_CHANNEL.try_send(Inbound::Command(cmd));
                }
            }
        }
    }
}

/// Periodic status reporting task
#[embassy_executor::task]
async fn status_task() {
    loop {
        Timer::after(Duration::from_secs(30)).await;
        emit_status();
    }
}
