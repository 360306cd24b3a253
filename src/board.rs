/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments and capabilities
/// selected at compile time via feature flags.

#[cfg(feature = "board-xiao")]
mod hw {
    // PN532 on I2C; main.rs takes the matching GPIO peripherals
    pub const NFC_SDA_PIN: u8 = 8;
    pub const NFC_SCL_PIN: u8 = 9;
    pub const NFC_IRQ_PIN: u8 = 10;
    pub const NFC_RST_PIN: u8 = 11;
    pub const NFC_I2C_KHZ: u32 = 100;
    pub const BOARD_NAME: &str = "xiao_esp32s3";
}

#[cfg(not(feature = "board-xiao"))]
mod hw {
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
