//! PCA9505 40-bit I2C-bus I/O port expander.
//!
//! Reference: NXP PCA9505/06 datasheet (Rev. 4), §6.2 register map.
//!
//! Each chip exposes five 8-bit banks. The switching board chains up to eight
//! chips on one bus at consecutive addresses starting at a configurable base.
//! Register accesses used by the controller are single-byte: a write of
//! `[register, value]`, or a write of `[register]` followed by a one-byte read.
//! The auto-increment bit (0x80) is never set, so a read returns the register
//! the pointer was last set to.

/// Input port register for bank 0 (IP0). Banks 1-4 follow at +1..+4.
pub const INPUT_PORT_REGISTER: u8 = 0x00;
/// Output port register for bank 0 (OP0). Banks 1-4 follow at +1..+4.
pub const OUTPUT_PORT_REGISTER: u8 = 0x08;
/// Polarity inversion register for bank 0 (PI0).
pub const POLARITY_INVERSION_REGISTER: u8 = 0x10;
/// I/O configuration register for bank 0 (IOC0). Bit = 1 → input, 0 → output.
pub const CONFIG_IO_REGISTER: u8 = 0x18;
/// Interrupt mask register for bank 0 (MSK0).
pub const MASK_INTERRUPT_REGISTER: u8 = 0x20;

/// Auto-increment flag in the command byte.
pub const AUTO_INCREMENT: u8 = 0x80;

/// Number of 8-bit banks per chip.
pub const BANKS_PER_CHIP: u8 = 5;
/// Channels (output bits) per chip.
pub const CHANNELS_PER_CHIP: u16 = 40;
/// Hardware address pins A0-A2 allow eight chips on one bus.
pub const MAX_CHIPS: u8 = 8;
/// Upper bound on channels for a full chain.
pub const MAX_CHANNELS: u16 = 320;
/// Bytes needed to hold one bit per channel for a full chain.
pub const MAX_CHANNEL_BYTES: usize = 40;

/// Configuration value marking every pin of a bank as input.
pub const ALL_INPUTS: u8 = 0xFF;
/// Configuration value marking every pin of a bank as output.
pub const ALL_OUTPUTS: u8 = 0x00;

/// Lowest general-call-safe 7-bit address for a chain base.
pub const MIN_BASE_ADDRESS: u8 = 0x08;
/// Highest 7-bit address any chip in the chain may occupy.
pub const MAX_CHIP_ADDRESS: u8 = 0x77;
/// Default base address (A2..A0 tied low on the first board).
pub const DEFAULT_BASE_ADDRESS: u8 = 0x20;

/// Address of chip `index` in a chain starting at `base`.
///
/// Returns `None` when the result would leave the 7-bit address space.
#[inline]
#[must_use]
pub fn chip_address(base: u8, index: u8) -> Option<u8> {
    base.checked_add(index).filter(|addr| *addr <= MAX_CHIP_ADDRESS)
}

/// Register for `bank` of a register group starting at `group`.
#[inline]
#[must_use]
pub const fn bank_register(group: u8, bank: u8) -> u8 {
    group.wrapping_add(bank)
}

/// True when a full chain of [`MAX_CHIPS`] starting at `base` stays within
/// the valid 7-bit range.
#[must_use]
pub fn is_valid_base_address(base: u8) -> bool {
    base >= MIN_BASE_ADDRESS && chip_address(base, MAX_CHIPS.saturating_sub(1)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_addresses_are_consecutive() {
        assert_eq!(chip_address(0x20, 0), Some(0x20));
        assert_eq!(chip_address(0x20, 7), Some(0x27));
        assert_eq!(chip_address(0x77, 1), None);
    }

    #[test]
    fn base_address_must_fit_a_full_chain() {
        assert!(is_valid_base_address(DEFAULT_BASE_ADDRESS));
        assert!(is_valid_base_address(0x70));
        assert!(!is_valid_base_address(0x71));
        assert!(!is_valid_base_address(0x07));
    }

    #[test]
    fn channel_capacity_matches_chip_count() {
        assert_eq!(
            u16::from(MAX_CHIPS) * CHANNELS_PER_CHIP,
            MAX_CHANNELS
        );
        assert_eq!(usize::from(MAX_CHANNELS / 8), MAX_CHANNEL_BYTES);
        assert_eq!(u16::from(BANKS_PER_CHIP) * 8, CHANNELS_PER_CHIP);
    }

    #[test]
    fn bank_registers_offset_from_group() {
        assert_eq!(bank_register(CONFIG_IO_REGISTER, 4), 0x1C);
        assert_eq!(bank_register(OUTPUT_PORT_REGISTER, 0), 0x08);
    }
}
