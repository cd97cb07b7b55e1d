//! Switching fabric: a chain of PCA9505 expanders driving electrode channels
//!
//! Channel `n` lives on chip `n / 40`, bank `(n % 40) / 8`, bit `n % 8`.
//! Channels are active low at the expander pin, so the output register holds
//! the complement of the logical channel byte.
//!
//! # Discovery
//!
//! ```text
//! for chip in 0..8:
//!     IOC0 ← 0xFF, read back           mismatch/NACK → no chip, next index
//!     for bank in 0..5:
//!         IOCn ← 0x00, read back       mismatch → abort discovery
//!         OPn  ← 0xFF                  all channels off, failure logged only
//!     count += 40 only if every lower index was counted
//! ```
//!
//! Chips configured before an abort stay configured; see DESIGN.md.

use core::fmt;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use platform::pca9505::{
    bank_register, chip_address, ALL_INPUTS, ALL_OUTPUTS, BANKS_PER_CHIP, CHANNELS_PER_CHIP,
    CONFIG_IO_REGISTER, MAX_CHANNELS, MAX_CHANNEL_BYTES, MAX_CHIPS, OUTPUT_PORT_REGISTER,
};

/// Settle time between setting the register pointer and reading it.
pub const READ_SETTLE_US: u32 = 100;

/// Settle time after each output register write. Back-to-back writes at
/// 400 kHz can corrupt the bus.
pub const WRITE_SETTLE_US: u32 = 200;

/// Output register value with every channel off.
const ALL_OFF: u8 = 0xFF;

/// Channel fabric failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FabricError {
    /// Channel vector length differs from `number_of_channels / 8`
    LengthMismatch {
        /// Bytes required
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },
    /// An expander did not answer a read; no partial data is returned
    Unavailable {
        /// 7-bit address that failed
        address: u8,
    },
    /// Channel count is not a multiple of 40 up to 320
    InvalidChannelCount {
        /// Rejected value
        requested: u16,
    },
    /// Some output registers could not be written
    Incomplete {
        /// Number of (chip, bank) writes that failed
        failed: u8,
    },
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch { expected, actual } => {
                write!(f, "channel vector is {actual} bytes, expected {expected}")
            }
            Self::Unavailable { address } => write!(f, "expander 0x{address:02x} unavailable"),
            Self::InvalidChannelCount { requested } => {
                write!(f, "{requested} is not a valid channel count")
            }
            Self::Incomplete { failed } => write!(f, "{failed} bank writes failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FabricError {}

/// Where discovery stopped on a bank verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AbortedAt {
    /// Chip index in the chain
    pub chip: u8,
    /// Bank that failed to verify
    pub bank: u8,
}

/// Outcome of [`SwitchingFabric::discover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryReport {
    /// Bit `i` set when chip `i` was found and fully configured
    pub configured: u8,
    /// Channels in the contiguous run from chip 0
    pub number_of_channels: u16,
    /// Set when a bank failed verification and discovery stopped
    pub aborted_at: Option<AbortedAt>,
}

/// Offset of (chip, bank) in a channel vector.
fn byte_index(chip: u8, bank: u8) -> usize {
    usize::from(chip)
        .saturating_mul(usize::from(BANKS_PER_CHIP))
        .saturating_add(usize::from(bank))
}

/// Expander chain on one I2C bus.
#[derive(Debug)]
pub struct SwitchingFabric<I, D> {
    bus: I,
    delay: D,
    base_address: u8,
    number_of_channels: u16,
    /// Last output register value known to be on each (chip, bank).
    written: [Option<u8>; MAX_CHANNEL_BYTES],
    /// Staging buffer for reads; overwritten by every call.
    channels: [u8; MAX_CHANNEL_BYTES],
}

impl<I, D> SwitchingFabric<I, D>
where
    I: I2c,
    D: DelayNs,
{
    /// Fabric with no channels until [`discover`](Self::discover) runs.
    pub fn new(bus: I, delay: D, base_address: u8) -> Self {
        Self {
            bus,
            delay,
            base_address,
            number_of_channels: 0,
            written: [None; MAX_CHANNEL_BYTES],
            channels: [0; MAX_CHANNEL_BYTES],
        }
    }

    /// Address of chip 0
    pub fn base_address(&self) -> u8 {
        self.base_address
    }

    /// Move the chain. Known register contents are forgotten; the channel
    /// count is kept until the next discovery.
    pub fn set_base_address(&mut self, base_address: u8) {
        if base_address != self.base_address {
            self.base_address = base_address;
            self.written = [None; MAX_CHANNEL_BYTES];
        }
    }

    /// Channels currently addressable
    pub fn number_of_channels(&self) -> u16 {
        self.number_of_channels
    }

    /// Override the channel count without probing the bus.
    pub fn set_number_of_channels(&mut self, count: u16) -> Result<(), FabricError> {
        if count > MAX_CHANNELS || count.checked_rem(CHANNELS_PER_CHIP) != Some(0) {
            return Err(FabricError::InvalidChannelCount { requested: count });
        }
        self.number_of_channels = count;
        Ok(())
    }

    /// Bytes in a channel vector
    pub fn vector_len(&self) -> usize {
        usize::from(self.number_of_channels / 8)
    }

    fn chip_count(&self) -> u8 {
        u8::try_from(self.number_of_channels / CHANNELS_PER_CHIP).unwrap_or(MAX_CHIPS)
    }

    fn read_register(&mut self, address: u8) -> Result<u8, I::Error> {
        let mut byte = [0u8];
        self.bus.read(address, &mut byte)?;
        let [value] = byte;
        Ok(value)
    }

    fn write_verified(&mut self, address: u8, register: u8, value: u8) -> bool {
        self.bus.write(address, &[register, value]).is_ok()
            && self.read_register(address).is_ok_and(|readback| readback == value)
    }

    /// An expander answers and holds an all-inputs configuration byte.
    fn probe(&mut self, address: u8) -> bool {
        self.write_verified(address, CONFIG_IO_REGISTER, ALL_INPUTS)
    }

    /// Switch every bank of a present chip to outputs, all channels off.
    /// Returns the first bank whose configuration did not verify.
    fn configure_outputs(&mut self, chip: u8, address: u8) -> Result<(), u8> {
        for bank in 0..BANKS_PER_CHIP {
            if !self.write_verified(address, bank_register(CONFIG_IO_REGISTER, bank), ALL_OUTPUTS) {
                return Err(bank);
            }
            // Best effort: an unknown latch is rewritten on the next set.
            let known = match self
                .bus
                .write(address, &[bank_register(OUTPUT_PORT_REGISTER, bank), ALL_OFF])
            {
                Ok(()) => Some(ALL_OFF),
                Err(_) => {
                    log_warn!("expander {} bank {} latch init failed", chip, bank);
                    None
                }
            };
            if let Some(slot) = self.written.get_mut(byte_index(chip, bank)) {
                *slot = known;
            }
        }
        Ok(())
    }

    /// Probe the chain and set the channel count.
    pub fn discover(&mut self) -> DiscoveryReport {
        self.number_of_channels = 0;
        self.written = [None; MAX_CHANNEL_BYTES];
        let mut report = DiscoveryReport::default();

        for chip in 0..MAX_CHIPS {
            let Some(address) = chip_address(self.base_address, chip) else {
                break;
            };
            if !self.probe(address) {
                log_debug!("no expander at {}", address);
                continue;
            }
            if let Err(bank) = self.configure_outputs(chip, address) {
                log_warn!("expander {} bank {} failed to verify, discovery aborted", chip, bank);
                report.aborted_at = Some(AbortedAt { chip, bank });
                break;
            }
            log_debug!("expander {} configured at {}", chip, address);
            report.configured |= 1u8.checked_shl(u32::from(chip)).unwrap_or(0);
            if self.number_of_channels == u16::from(chip).saturating_mul(CHANNELS_PER_CHIP) {
                self.number_of_channels = self.number_of_channels.saturating_add(CHANNELS_PER_CHIP);
            }
        }

        report.number_of_channels = self.number_of_channels;
        log_info!("discovered {} channels", self.number_of_channels);
        report
    }

    /// Read the logical state of every channel.
    ///
    /// The returned slice is the internal staging buffer and is only valid
    /// until the next call.
    pub fn state_of_channels(&mut self) -> Result<&[u8], FabricError> {
        for chip in 0..self.chip_count() {
            let address = chip_address(self.base_address, chip)
                .ok_or(FabricError::Unavailable { address: self.base_address })?;
            for bank in 0..BANKS_PER_CHIP {
                let register = bank_register(OUTPUT_PORT_REGISTER, bank);
                let unavailable = FabricError::Unavailable { address };
                self.bus.write(address, &[register]).map_err(|_| unavailable)?;
                self.delay.delay_us(READ_SETTLE_US);
                let value = self.read_register(address).map_err(|_| unavailable)?;

                let index = byte_index(chip, bank);
                if let Some(slot) = self.channels.get_mut(index) {
                    *slot = !value;
                }
                if let Some(slot) = self.written.get_mut(index) {
                    *slot = Some(value);
                }
            }
        }
        let len = self.vector_len();
        self.channels.get(..len).ok_or(FabricError::LengthMismatch {
            expected: len,
            actual: MAX_CHANNEL_BYTES,
        })
    }

    /// Drive every channel from `states` (bit set = channel on).
    ///
    /// Only banks whose register differs from the last known value are
    /// written. A failed write is logged, its bank is marked unknown so the
    /// next call rewrites it, and the remaining banks are still written.
    pub fn set_state_of_channels(&mut self, states: &[u8]) -> Result<(), FabricError> {
        let expected = self.vector_len();
        if states.len() != expected {
            return Err(FabricError::LengthMismatch {
                expected,
                actual: states.len(),
            });
        }

        let mut failed: u8 = 0;
        for chip in 0..self.chip_count() {
            let Some(address) = chip_address(self.base_address, chip) else {
                failed = failed.saturating_add(BANKS_PER_CHIP);
                continue;
            };
            for bank in 0..BANKS_PER_CHIP {
                let index = byte_index(chip, bank);
                let Some(state) = states.get(index) else {
                    continue;
                };
                let value = !*state;
                if self.written.get(index).copied().flatten() == Some(value) {
                    continue;
                }
                let register = bank_register(OUTPUT_PORT_REGISTER, bank);
                let outcome = self.bus.write(address, &[register, value]);
                self.delay.delay_us(WRITE_SETTLE_US);
                let known = if outcome.is_ok() {
                    Some(value)
                } else {
                    log_warn!("write to expander {} bank {} failed", address, bank);
                    failed = failed.saturating_add(1);
                    None
                };
                if let Some(slot) = self.written.get_mut(index) {
                    *slot = known;
                }
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(FabricError::Incomplete { failed })
        }
    }

    /// Give the bus and delay back.
    pub fn release(self) -> (I, D) {
        (self.bus, self.delay)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};
    use platform::mocks::{EventLog, HwEvent, MockDelay, MockExpanderBus};
    use std::vec;
    use std::vec::Vec;

    const BASE: u8 = 0x20;

    fn present_chip(address: u8) -> Vec<Transaction> {
        let mut t = vec![
            Transaction::write(address, vec![CONFIG_IO_REGISTER, 0xFF]),
            Transaction::read(address, vec![0xFF]),
        ];
        for bank in 0..BANKS_PER_CHIP {
            t.push(Transaction::write(address, vec![CONFIG_IO_REGISTER + bank, 0x00]));
            t.push(Transaction::read(address, vec![0x00]));
            t.push(Transaction::write(address, vec![OUTPUT_PORT_REGISTER + bank, 0xFF]));
        }
        t
    }

    fn absent_chip(address: u8) -> Vec<Transaction> {
        vec![Transaction::write(address, vec![CONFIG_IO_REGISTER, 0xFF])
            .with_error(ErrorKind::NoAcknowledge(
                embedded_hal::i2c::NoAcknowledgeSource::Address,
            ))]
    }

    #[test]
    fn discovery_traffic_for_single_chip() {
        let mut expectations = present_chip(BASE);
        for chip in 1..MAX_CHIPS {
            expectations.extend(absent_chip(BASE + chip));
        }
        let mut i2c = I2cMock::new(&expectations);
        let mut fabric = SwitchingFabric::new(i2c.clone(), NoopDelay::new(), BASE);

        let report = fabric.discover();

        assert_eq!(report.number_of_channels, 40);
        assert_eq!(report.configured, 0b0000_0001);
        assert_eq!(report.aborted_at, None);
        i2c.done();
    }

    #[test]
    fn failed_latch_init_is_retried_not_fatal() {
        let mut expectations = present_chip(BASE);
        // OP2 ← 0xFF is the 3rd transaction of bank 2.
        let op2 = 2 + 3 * 2 + 2;
        expectations[op2] = Transaction::write(BASE, vec![OUTPUT_PORT_REGISTER + 2, 0xFF])
            .with_error(ErrorKind::Bus);
        for chip in 1..MAX_CHIPS {
            expectations.extend(absent_chip(BASE + chip));
        }
        // All-off vector: only the unknown bank is rewritten.
        expectations.push(Transaction::write(BASE, vec![OUTPUT_PORT_REGISTER + 2, 0xFF]));
        let mut i2c = I2cMock::new(&expectations);
        let mut fabric = SwitchingFabric::new(i2c.clone(), NoopDelay::new(), BASE);

        let report = fabric.discover();

        assert_eq!(report.number_of_channels, 40);
        assert_eq!(report.configured, 0b0000_0001);
        assert_eq!(report.aborted_at, None);
        fabric.set_state_of_channels(&[0; 5]).unwrap();
        i2c.done();
    }

    #[test]
    fn readback_mismatch_means_no_chip() {
        let mut expectations = vec![
            Transaction::write(BASE, vec![CONFIG_IO_REGISTER, 0xFF]),
            Transaction::read(BASE, vec![0x00]),
        ];
        for chip in 1..MAX_CHIPS {
            expectations.extend(absent_chip(BASE + chip));
        }
        let mut i2c = I2cMock::new(&expectations);
        let mut fabric = SwitchingFabric::new(i2c.clone(), NoopDelay::new(), BASE);

        assert_eq!(fabric.discover().number_of_channels, 0);
        i2c.done();
    }

    #[test]
    fn gap_stops_channel_accumulation() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0, 1, 3], &log);
        let mut fabric = SwitchingFabric::new(bus.clone(), MockDelay::new(&log), BASE);

        let report = fabric.discover();

        assert_eq!(report.number_of_channels, 80);
        assert_eq!(fabric.number_of_channels(), 80);
        assert_eq!(report.configured, 0b0000_1011);
        // Chip 3 is configured even though it is not counted.
        assert_eq!(bus.register(BASE + 3, CONFIG_IO_REGISTER + 4), Some(ALL_OUTPUTS));
    }

    #[test]
    fn bank_verify_failure_aborts_without_rollback() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0, 1, 2], &log);
        bus.set_stuck_config_bank(BASE + 1, 2);
        let mut fabric = SwitchingFabric::new(bus.clone(), MockDelay::new(&log), BASE);

        let report = fabric.discover();

        assert_eq!(report.aborted_at, Some(AbortedAt { chip: 1, bank: 2 }));
        assert_eq!(report.number_of_channels, 40);
        assert_eq!(report.configured, 0b0000_0001);
        // Chip 0 and the verified banks of chip 1 keep their output mode.
        assert_eq!(bus.register(BASE, CONFIG_IO_REGISTER), Some(ALL_OUTPUTS));
        assert_eq!(bus.register(BASE + 1, CONFIG_IO_REGISTER + 1), Some(ALL_OUTPUTS));
        // Chip 2 was never touched.
        assert_eq!(bus.register(BASE + 2, CONFIG_IO_REGISTER), Some(ALL_INPUTS));
    }

    #[test]
    fn channel_vector_round_trips() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0, 1], &log);
        let mut fabric = SwitchingFabric::new(bus.clone(), MockDelay::new(&log), BASE);
        fabric.discover();

        let states: Vec<u8> = (0..10u8).map(|i| i.wrapping_mul(37)).collect();
        fabric.set_state_of_channels(&states).unwrap();

        assert_eq!(bus.register(BASE, OUTPUT_PORT_REGISTER + 1), Some(!states[1]));
        assert_eq!(fabric.state_of_channels().unwrap(), &states[..]);
    }

    #[test]
    fn wrong_length_is_rejected_before_the_bus() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0], &log);
        let mut fabric = SwitchingFabric::new(bus, MockDelay::new(&log), BASE);
        fabric.discover();
        log.clear();

        assert_eq!(
            fabric.set_state_of_channels(&[0; 4]),
            Err(FabricError::LengthMismatch {
                expected: 5,
                actual: 4
            })
        );
        assert!(log.events().is_empty());
    }

    #[test]
    fn only_changed_banks_are_written() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0], &log);
        let mut fabric = SwitchingFabric::new(bus, MockDelay::new(&log), BASE);
        fabric.discover();
        log.clear();

        fabric.set_state_of_channels(&[0, 0x01, 0, 0, 0]).unwrap();

        assert_eq!(
            log.events(),
            vec![
                HwEvent::I2cWrite {
                    address: BASE,
                    bytes: vec![OUTPUT_PORT_REGISTER + 1, 0xFE]
                },
                HwEvent::DelayUs(WRITE_SETTLE_US),
            ]
        );
    }

    #[test]
    fn missing_chip_makes_read_unavailable() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0], &log);
        let mut fabric = SwitchingFabric::new(bus, MockDelay::new(&log), BASE);
        fabric.set_number_of_channels(80).unwrap();

        assert_eq!(
            fabric.state_of_channels(),
            Err(FabricError::Unavailable { address: BASE + 1 })
        );
    }

    #[test]
    fn failed_write_is_retried_next_time() {
        let log = EventLog::new();
        let bus = MockExpanderBus::with_chips(BASE, &[0, 1], &log);
        let mut fabric = SwitchingFabric::new(bus.clone(), MockDelay::new(&log), BASE);
        fabric.discover();

        bus.set_fail_writes(BASE + 1, true);
        let states = [0xFF; 10];
        assert_eq!(
            fabric.set_state_of_channels(&states),
            Err(FabricError::Incomplete { failed: 5 })
        );
        // Chip 0 was still written.
        assert_eq!(bus.register(BASE, OUTPUT_PORT_REGISTER), Some(0x00));

        bus.set_fail_writes(BASE + 1, false);
        log.clear();
        fabric.set_state_of_channels(&states).unwrap();
        let writes = log.count(|e| matches!(e, HwEvent::I2cWrite { .. }));
        assert_eq!(writes, 5);
    }

    #[test]
    fn channel_count_override_is_validated() {
        let log = EventLog::new();
        let mut fabric = SwitchingFabric::new(MockExpanderBus::new(&log), MockDelay::new(&log), BASE);
        assert!(fabric.set_number_of_channels(120).is_ok());
        assert_eq!(fabric.vector_len(), 15);
        assert_eq!(
            fabric.set_number_of_channels(100),
            Err(FabricError::InvalidChannelCount { requested: 100 })
        );
        assert!(fabric.set_number_of_channels(360).is_err());
        assert!(fabric.set_number_of_channels(0).is_ok());
    }
}
