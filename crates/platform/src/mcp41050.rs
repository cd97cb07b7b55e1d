//! MCP41050 single-channel 50 kΩ SPI digital potentiometer.
//!
//! Reference: Microchip MCP41XXX/42XXX datasheet (DS11195C), §5.
//!
//! A write is one chip-select frame carrying two bytes: the command byte
//! followed by the 8-bit wiper code. Code 0 puts the wiper at terminal B.

/// Command byte: write data (C1:C0 = 01) to both potentiometer selects
/// (P1:P0 = 11). Single-pot parts ignore P1.
pub const COMMAND_WRITE_DATA: u8 = 0x1F;
/// Command byte: shutdown (C1:C0 = 10), both selects.
pub const COMMAND_SHUTDOWN: u8 = 0x2F;
/// Nominal end-to-end resistance of the -050 part.
pub const NOMINAL_RESISTANCE_OHMS: u32 = 50_000;
/// Highest wiper code.
pub const WIPER_MAX: u8 = 0xFF;

/// Build the two-byte frame that sets the wiper to `code`.
#[inline]
#[must_use]
pub const fn wiper_frame(code: u8) -> [u8; 2] {
    [COMMAND_WRITE_DATA, code]
}

/// Set the wiper in a single chip-select frame.
///
/// # Errors
/// Returns Err if the SPI transaction fails.
pub fn mcp41050_write_wiper<S>(spi: &mut S, code: u8) -> Result<(), S::Error>
where
    S: embedded_hal::spi::SpiDevice,
{
    spi.write(&wiper_frame(code))
}
