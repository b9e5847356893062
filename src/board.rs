/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and peripherals
/// selected at compile time via feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(feature = "board-m5stickc")]
mod hw {
    pub const DISPLAY_WIDTH: u16 = 135;
    pub const DISPLAY_HEIGHT: u16 = 240;
    pub const DISPLAY_SPI_FREQ_MHZ: u32 = 40;
    pub const BUZZER_PIN: u8 = 2;
    pub const BUZZER_FREQ_HZ: u32 = 4000;
    /// Length of one beep; leave alerts use two, absence alerts three.
    pub const BUZZER_BEEP_MS: u64 = 80;
    pub const BOARD_NAME: &str = "m5stickc_plus2";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;

/// Radio channel shared by every node. Broadcast peers only hear each
/// other on a common channel.
pub const RADIO_CHANNEL: u8 = 1;
