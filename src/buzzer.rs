/// Buzzer driver using LEDC PWM.
///
/// Drives a passive buzzer at the board-configured frequency and GPIO pin.
/// The buzzer task waits for events on `BUZZER_SIGNAL`: one beep when a
/// peer is detected, two when it starts leaving, three when it goes absent.
use core::sync::atomic::Ordering;

use embassy_time::{Duration, Timer};
use esp_hal::gpio::DriveMode;
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, config::Duty, TimerIFace};
use esp_hal::ledc::{Ledc, LowSpeed};
use esp_hal::time::Rate;

use crate::board;
use crate::proximity::ProximityEvent;

#[embassy_executor::task]
pub async fn buzzer_task(
    ledc_peripheral: esp_hal::peripherals::LEDC<'static>,
    buzzer_pin: esp_hal::peripherals::GPIO2<'static>,
) {
    let ledc = Ledc::new(ledc_peripheral);

    let mut lstimer0 = ledc.timer::<LowSpeed>(timer::Number::Timer0);
    if let Err(e) = lstimer0.configure(timer::config::Config {
        duty: Duty::Duty8Bit,
        clock_source: timer::LSClockSource::APBClk,
        frequency: Rate::from_hz(board::BUZZER_FREQ_HZ),
    }) {
        log::error!("Buzzer timer config failed: {:?}", e);
        return;
    }

    let mut channel0 = ledc.channel(channel::Number::Channel0, buzzer_pin);
    if let Err(e) = channel0.configure(channel::config::Config {
        timer: &lstimer0,
        duty_pct: 0,
        drive_mode: DriveMode::PushPull,
    }) {
        log::error!("Buzzer channel config failed: {:?}", e);
        return;
    }

    log::info!("Buzzer ready on GPIO{}", board::BUZZER_PIN);

    let rx = crate::BUZZER_SIGNAL.receiver();

    loop {
        let event = rx.receive().await;

        if !crate::BUZZER_ENABLED.load(Ordering::Relaxed) {
            continue;
        }

        let beeps = match event {
            ProximityEvent::Detect { .. } => 1,
            ProximityEvent::Leave { .. } => 2,
            ProximityEvent::Absent { .. } => 3,
        };
        for beep in 0..beeps {
            if beep > 0 {
                Timer::after(Duration::from_millis(board::BUZZER_BEEP_MS)).await;
            }
            // 50% duty = loudest for passive buzzer
            let _ = channel0.set_duty(50);
            Timer::after(Duration::from_millis(board::BUZZER_BEEP_MS)).await;
            let _ = channel0.set_duty(0);
        }
    }
}
