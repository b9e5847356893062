//! Display driver for M5StickC Plus2 (ST7789V2, 135x240, SPI).
//!
//! Shows the node id, schedule state, neighbor counts and the most recent
//! proximity event. Redraws every 500 ms straight over SPI; there is no
//! framebuffer.

use std::sync::atomic::Ordering;
use std::time::Duration;

use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::{MonoTextStyle, MonoTextStyleBuilder};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{PrimitiveStyle, Rectangle};
use embedded_graphics::text::Text;
use esp_idf_svc::hal::delay::Delay;
use esp_idf_svc::hal::gpio::*;
use esp_idf_svc::hal::peripheral::Peripheral;
use esp_idf_svc::hal::spi::config::Config as SpiConfig;
use esp_idf_svc::hal::spi::config::DriverConfig as SpiDriverConfig;
use esp_idf_svc::hal::spi::{SpiDeviceDriver, SpiDriver};
use esp_idf_svc::hal::units::Hertz;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ST7789;
use mipidsi::options::{ColorInversion, ColorOrder, Orientation, Rotation};
use mipidsi::Builder;

use proxtrace::board;
use proxtrace::protocol::VERSION;

// ── Display geometry ─────────────────────────────────────────────────

// Landscape: the panel is rotated 90 degrees.
const W: i32 = board::DISPLAY_HEIGHT as i32;
const H: i32 = board::DISPLAY_WIDTH as i32;
const ROW_H: i32 = 14;
const LINE_W: usize = (W / 6) as usize;

// ── Color palette ────────────────────────────────────────────────────

const BG: Rgb565 = Rgb565::BLACK;
const HEADER_BG: Rgb565 = Rgb565::new(2, 4, 12);
const FG: Rgb565 = Rgb565::WHITE;
const ACCENT: Rgb565 = Rgb565::new(0, 50, 0);
const DIM: Rgb565 = Rgb565::new(12, 24, 12);

/// Top-down text cursor over the panel.
struct Screen<'a, D> {
    display: &'a mut D,
    y: i32,
    line: heapless::String<40>,
}

impl<'a, D: DrawTarget<Color = Rgb565>> Screen<'a, D> {
    fn new(display: &'a mut D) -> Self {
        Self {
            display,
            y: 0,
            line: heapless::String::new(),
        }
    }

    fn clear(&mut self) {
        let _ = self.display.clear(BG);
        self.y = 0;
    }

    fn skip(&mut self, pixels: i32) {
        self.y += pixels;
    }

    /// Format into the line buffer, then draw it at `x` on `bg`.
    fn text(&mut self, x: i32, fg: Rgb565, bg: Rgb565, args: core::fmt::Arguments<'_>, pad: bool) {
        self.line.clear();
        let _ = core::fmt::write(&mut self.line, args);
        while pad && self.line.len() < LINE_W {
            let _ = self.line.push(' ');
        }
        let _ = Text::new(&self.line, Point::new(x, self.y + 10), style(fg, bg)).draw(self.display);
        self.y += ROW_H;
    }

    fn row(&mut self, color: Rgb565, args: core::fmt::Arguments<'_>) {
        self.text(0, color, BG, args, true);
    }

    fn centered(&mut self, color: Rgb565, args: core::fmt::Arguments<'_>) {
        self.line.clear();
        let _ = core::fmt::write(&mut self.line, args);
        let x = (W - self.line.len() as i32 * 6) / 2;
        self.text(x, color, BG, args, false);
    }

    /// Title bar with a right-aligned state tag.
    fn header(&mut self, title: core::fmt::Arguments<'_>, tag: &str, tag_color: Rgb565) {
        let _ = Rectangle::new(Point::new(0, self.y), Size::new(W as u32, ROW_H as u32))
            .into_styled(PrimitiveStyle::with_fill(HEADER_BG))
            .draw(self.display);
        let x = W - tag.len() as i32 * 6 - 2;
        let _ = Text::new(tag, Point::new(x, self.y + 10), style(tag_color, HEADER_BG)).draw(self.display);
        self.text(0, FG, HEADER_BG, title, false);
    }

    fn divider(&mut self) {
        let _ = Rectangle::new(Point::new(0, self.y), Size::new(W as u32, 1))
            .into_styled(PrimitiveStyle::with_fill(DIM))
            .draw(self.display);
        self.y += 3;
    }
}

fn style(fg: Rgb565, bg: Rgb565) -> MonoTextStyle<'static, Rgb565> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(fg)
        .background_color(bg)
        .build()
}

macro_rules! row {
    ($s:expr, $color:expr, $($arg:tt)*) => {
        $s.row($color, format_args!($($arg)*))
    };
}

// ── Screens ──────────────────────────────────────────────────────────

fn draw_splash(display: &mut impl DrawTarget<Color = Rgb565>) {
    let mut s = Screen::new(display);
    s.clear();
    s.skip(42);
    s.centered(FG, format_args!("PROXTRACE"));
    s.centered(ACCENT, format_args!("v{}", VERSION));
    s.skip(12);
    s.centered(DIM, format_args!("node {:08x}", crate::NODE_ID.load(Ordering::Relaxed)));
}

fn draw_status(display: &mut impl DrawTarget<Color = Rgb565>) {
    let mut s = Screen::new(display);

    let running = crate::RUNNING.load(Ordering::Relaxed);
    s.header(
        format_args!(" {:08x}", crate::NODE_ID.load(Ordering::Relaxed)),
        if running { "[RUN]" } else { "[STOP]" },
        if running { Rgb565::GREEN } else { Rgb565::RED },
    );

    let present = crate::PRESENT.load(Ordering::Relaxed);
    row!(
        s,
        if present > 0 { Rgb565::GREEN } else { FG },
        " Near: {}   Tracked: {}",
        present,
        crate::TRACKED.load(Ordering::Relaxed)
    );

    let last = crate::LAST_EVENT.lock().map(|e| e.clone()).unwrap_or_default();
    if last.is_empty() {
        row!(s, DIM, " Last: ---");
    } else {
        row!(s, ACCENT, " Last: {}", last);
    }

    let stats = crate::STATS.lock().map(|s| *s).unwrap_or_default();
    row!(
        s,
        DIM,
        " In {} Out {} Gone {} Weak {}",
        stats.detections,
        stats.leaves,
        stats.absences,
        stats.weak
    );

    s.divider();

    let table_full = crate::TABLE_FULL.load(Ordering::Relaxed);
    row!(
        s,
        if table_full > 0 { Rgb565::YELLOW } else { DIM },
        " Table full: {}  RSSI >= {}",
        table_full,
        crate::MIN_RSSI.load(Ordering::Relaxed)
    );

    let up = crate::uptime_secs();
    let buzzer = if crate::BUZZER_ENABLED.load(Ordering::Relaxed) {
        "ON"
    } else {
        "OFF"
    };
    row!(
        s,
        DIM,
        " Up: {:02}:{:02}:{:02}  Buzzer: {}",
        up / 3600,
        (up % 3600) / 60,
        up % 60,
        buzzer
    );
}

// ── Display thread ───────────────────────────────────────────────────

pub fn display_thread(
    spi: impl Peripheral<P = impl esp_idf_svc::hal::spi::SpiAnyPins> + 'static,
    mosi: impl Peripheral<P = impl OutputPin> + 'static,
    clk: impl Peripheral<P = impl OutputPin> + 'static,
    cs_pin: impl Peripheral<P = impl OutputPin> + 'static,
    dc_pin: impl Peripheral<P = impl OutputPin> + 'static,
    rst_pin: impl Peripheral<P = impl IOPin> + 'static,
    bl_pin: impl Peripheral<P = impl OutputPin> + 'static,
) {
    if let Err(e) = run_display(spi, mosi, clk, cs_pin, dc_pin, rst_pin, bl_pin) {
        log::error!("Display stopped: {:?}", e);
    }
}

fn run_display(
    spi: impl Peripheral<P = impl esp_idf_svc::hal::spi::SpiAnyPins> + 'static,
    mosi: impl Peripheral<P = impl OutputPin> + 'static,
    clk: impl Peripheral<P = impl OutputPin> + 'static,
    cs_pin: impl Peripheral<P = impl OutputPin> + 'static,
    dc_pin: impl Peripheral<P = impl OutputPin> + 'static,
    rst_pin: impl Peripheral<P = impl IOPin> + 'static,
    bl_pin: impl Peripheral<P = impl OutputPin> + 'static,
) -> anyhow::Result<()> {
    // Manual hardware reset
    let mut rst = PinDriver::output(rst_pin)?;
    rst.set_low()?;
    std::thread::sleep(Duration::from_millis(20));
    rst.set_high()?;
    std::thread::sleep(Duration::from_millis(120));

    let spi_driver = SpiDriver::new(spi, clk, mosi, None::<AnyIOPin>, &SpiDriverConfig::new())?;
    let spi_config = SpiConfig::new()
        .baudrate(Hertz(board::DISPLAY_SPI_FREQ_MHZ * 1_000_000))
        .data_mode(embedded_hal::spi::MODE_0);
    let spi_device = SpiDeviceDriver::new(spi_driver, Some(cs_pin), &spi_config)?;

    let dc = PinDriver::output(dc_pin)?;
    let mut buffer = [0u8; 512];
    let di = SpiInterface::new(spi_device, dc, &mut buffer);

    let mut delay = Delay::new_default();
    let mut display = Builder::new(ST7789, di)
        .display_size(board::DISPLAY_WIDTH, board::DISPLAY_HEIGHT)
        .display_offset(52, 40)
        .invert_colors(ColorInversion::Inverted)
        .color_order(ColorOrder::Bgr)
        .orientation(Orientation::new().rotate(Rotation::Deg90))
        .init(&mut delay)
        .map_err(|e| anyhow::anyhow!("display init: {:?}", e))?;

    log::info!("Display initialized ({}x{} landscape)", W, H);

    let mut bl = PinDriver::output(bl_pin)?;
    bl.set_high()?;

    draw_splash(&mut display);
    std::thread::sleep(Duration::from_secs(2));
    Screen::new(&mut display).clear();

    loop {
        draw_status(&mut display);
        std::thread::sleep(Duration::from_millis(500));
    }
}
