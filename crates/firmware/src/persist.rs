//! Persistence adapter: property store ⇄ byte-addressed storage.
//!
//! # Layout
//!
//! Storage holds two shadow slots of [`SLOT_SIZE`] bytes. Each slot is
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!      0     4  magic: b"DMFC"
//!      4     1  format version
//!      5     1  reserved (0)
//!      6     2  payload length (u16 LE)
//!      8     4  sequence number (u32 LE)
//!     12     4  CRC32 over sequence bytes + payload (u32 LE)
//!     16     N  postcard-encoded [`Snapshot`]
//! ```
//!
//! `save()` writes the payload and then the header into the slot that does
//! not hold the newest copy, so a power loss at any point leaves the previous
//! copy intact. `load()` takes the valid slot with the newest sequence.

use core::fmt;

use embedded_storage::Storage;

use crate::property::{FieldSet, PropertyStore, Snapshot};

/// Slot magic.
pub const MAGIC: [u8; 4] = *b"DMFC";
/// Current format version.
pub const FORMAT_VERSION: u8 = 1;
/// Header size in bytes.
pub const HEADER_SIZE: usize = 16;
/// Bytes reserved per slot, header included.
pub const SLOT_SIZE: usize = 256;
/// Number of shadow slots.
pub const SLOT_COUNT: usize = 2;
/// Largest payload a slot can carry.
pub const MAX_PAYLOAD: usize = SLOT_SIZE - HEADER_SIZE;

#[allow(clippy::cast_possible_truncation)]
const PAYLOAD_OFFSET: u32 = HEADER_SIZE as u32;

/// Why defaults were used instead of stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadFailure {
    /// No slot has ever been written
    Blank,
    /// Slots exist but none passes header and CRC checks
    Corrupt,
    /// A slot is intact but does not match the current field table
    Incompatible,
    /// The storage device failed or is too small
    Storage,
}

/// Result of the last [`Persistence::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadStatus {
    /// Nothing loaded yet
    NotLoaded,
    /// Values restored from a slot
    Loaded {
        /// Slot index
        slot: u8,
        /// Sequence number of that slot
        sequence: u32,
    },
    /// Defaults substituted
    Defaulted(LoadFailure),
}

impl LoadStatus {
    /// True when stored values were restored
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded { .. })
    }
}

/// Save failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PersistError {
    /// Storage read or write failed
    Storage,
    /// Snapshot does not fit in a slot
    Encode,
    /// Storage smaller than both slots
    TooSmall,
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage => write!(f, "storage access failed"),
            Self::Encode => write!(f, "config does not fit a storage slot"),
            Self::TooSmall => write!(f, "storage too small for two config slots"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PersistError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    len: u16,
    sequence: u32,
    crc: u32,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_SIZE] {
        let [m0, m1, m2, m3] = MAGIC;
        let [l0, l1] = self.len.to_le_bytes();
        let [s0, s1, s2, s3] = self.sequence.to_le_bytes();
        let [c0, c1, c2, c3] = self.crc.to_le_bytes();
        [
            m0, m1, m2, m3, FORMAT_VERSION, 0, l0, l1, s0, s1, s2, s3, c0, c1, c2, c3,
        ]
    }

    fn decode(bytes: &[u8; HEADER_SIZE]) -> SlotHeader {
        let [m0, m1, m2, m3, version, _, l0, l1, s0, s1, s2, s3, c0, c1, c2, c3] = *bytes;
        if [m0, m1, m2, m3] != MAGIC {
            return SlotHeader::Blank;
        }
        let len = u16::from_le_bytes([l0, l1]);
        if version != FORMAT_VERSION || usize::from(len) > MAX_PAYLOAD {
            return SlotHeader::Invalid;
        }
        SlotHeader::Valid(Header {
            len,
            sequence: u32::from_le_bytes([s0, s1, s2, s3]),
            crc: u32::from_le_bytes([c0, c1, c2, c3]),
        })
    }
}

enum SlotHeader {
    Blank,
    Invalid,
    Valid(Header),
}

fn checksum(sequence: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&sequence.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// `a` is newer than `b` in wrapping sequence order.
fn is_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000_0000
}

fn slot_offset(slot: usize) -> u32 {
    u32::try_from(slot.saturating_mul(SLOT_SIZE)).unwrap_or(u32::MAX)
}

/// Owns the storage device and the slot bookkeeping.
#[derive(Debug)]
pub struct Persistence<S> {
    storage: S,
    newest: Option<(usize, u32)>,
    status: LoadStatus,
    load_failures: u32,
}

impl<S: Storage> Persistence<S> {
    /// Wrap `storage`. Nothing is read until [`load`](Self::load).
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            newest: None,
            status: LoadStatus::NotLoaded,
            load_failures: 0,
        }
    }

    /// Status of the last load
    pub fn status(&self) -> LoadStatus {
        self.status
    }

    /// Loads that fell back to defaults because stored data was unusable.
    /// A blank device does not count.
    pub fn load_failures(&self) -> u32 {
        self.load_failures
    }

    /// Borrow the storage device
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Release the storage device
    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Restore `store` from the newest valid slot.
    ///
    /// On any failure `store` is reset to defaults. The failure is recorded in
    /// [`status`](Self::status) and, unless the device is blank, counted in
    /// [`load_failures`](Self::load_failures). No error is returned.
    pub fn load<F: FieldSet>(&mut self, store: &mut PropertyStore<F>) -> LoadStatus {
        store.reset();
        let status = match self.read_newest(store) {
            Ok((slot, sequence)) => {
                self.newest = Some((slot, sequence));
                LoadStatus::Loaded {
                    slot: u8::try_from(slot).unwrap_or(u8::MAX),
                    sequence,
                }
            }
            Err(failure) => {
                store.reset();
                if failure != LoadFailure::Blank {
                    self.load_failures = self.load_failures.saturating_add(1);
                    log_warn!("config load failed, using defaults");
                }
                LoadStatus::Defaulted(failure)
            }
        };
        self.status = status;
        status
    }

    fn read_newest<F: FieldSet>(
        &mut self,
        store: &mut PropertyStore<F>,
    ) -> Result<(usize, u32), LoadFailure> {
        if self.storage.capacity() < SLOT_SIZE.saturating_mul(SLOT_COUNT) {
            return Err(LoadFailure::Storage);
        }
        self.newest = None;

        let mut best: Option<(usize, Header)> = None;
        let mut any_written = false;
        for slot in 0..SLOT_COUNT {
            let mut raw = [0u8; HEADER_SIZE];
            self.storage
                .read(slot_offset(slot), &mut raw)
                .map_err(|_| LoadFailure::Storage)?;
            let header = match Header::decode(&raw) {
                SlotHeader::Blank => continue,
                SlotHeader::Invalid => {
                    any_written = true;
                    continue;
                }
                SlotHeader::Valid(header) => header,
            };
            any_written = true;
            let mut payload = [0u8; MAX_PAYLOAD];
            let Some(payload) = payload.get_mut(..usize::from(header.len)) else {
                continue;
            };
            let offset = slot_offset(slot).saturating_add(PAYLOAD_OFFSET);
            self.storage
                .read(offset, payload)
                .map_err(|_| LoadFailure::Storage)?;
            if checksum(header.sequence, payload) != header.crc {
                log_debug!("config slot {} failed crc", slot);
                continue;
            }
            if best.map_or(true, |(_, b)| is_newer(header.sequence, b.sequence)) {
                best = Some((slot, header));
            }
        }

        let Some((slot, header)) = best else {
            return Err(if any_written {
                LoadFailure::Corrupt
            } else {
                LoadFailure::Blank
            });
        };
        // Even if the payload turns out unusable, the next save must land in
        // the other slot with a higher sequence.
        self.newest = Some((slot, header.sequence));

        let mut payload = [0u8; MAX_PAYLOAD];
        let payload = payload
            .get_mut(..usize::from(header.len))
            .ok_or(LoadFailure::Corrupt)?;
        let offset = slot_offset(slot).saturating_add(PAYLOAD_OFFSET);
        self.storage
            .read(offset, payload)
            .map_err(|_| LoadFailure::Storage)?;
        let snapshot: Snapshot =
            postcard::from_bytes(payload).map_err(|_| LoadFailure::Incompatible)?;
        store
            .restore(&snapshot)
            .map_err(|_| LoadFailure::Incompatible)?;
        Ok((slot, header.sequence))
    }

    /// Write `store` into the older slot, payload first, header last.
    pub fn save<F: FieldSet>(&mut self, store: &PropertyStore<F>) -> Result<(), PersistError> {
        if self.storage.capacity() < SLOT_SIZE.saturating_mul(SLOT_COUNT) {
            return Err(PersistError::TooSmall);
        }
        let mut payload = [0u8; MAX_PAYLOAD];
        let encoded = postcard::to_slice(&store.snapshot(), &mut payload)
            .map_err(|_| PersistError::Encode)?;
        let len = u16::try_from(encoded.len()).map_err(|_| PersistError::Encode)?;

        let (slot, sequence) = match self.newest {
            Some((slot, sequence)) => (
                slot.saturating_add(1) % SLOT_COUNT,
                sequence.wrapping_add(1),
            ),
            None => (0, 1),
        };
        let header = Header {
            len,
            sequence,
            crc: checksum(sequence, encoded),
        };

        let offset = slot_offset(slot);
        let result = self
            .storage
            .write(offset.saturating_add(PAYLOAD_OFFSET), encoded)
            .and_then(|()| self.storage.write(offset, &header.encode()));
        if result.is_err() {
            log_error!("config save to slot {} failed", slot);
            return Err(PersistError::Storage);
        }
        self.newest = Some((slot, sequence));
        log_debug!("config saved to slot {} seq {}", slot, sequence);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::property::{FieldDefault, FieldDescriptor, NoHooks, Value};
    use platform::mocks::MockEeprom;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Cal {
        Gain,
        Label,
    }

    impl FieldSet for Cal {
        const TABLE: &'static [FieldDescriptor<Self>] = &[
            FieldDescriptor {
                field: Cal::Gain,
                name: "gain",
                default: FieldDefault::F32(1.0),
            },
            FieldDescriptor {
                field: Cal::Label,
                name: "label",
                default: FieldDefault::Text(""),
            },
        ];
    }

    fn store_with_gain(gain: f32) -> PropertyStore<Cal> {
        let mut store = PropertyStore::new();
        store.set(Cal::Gain, Value::F32(gain), &mut NoHooks).unwrap();
        store
    }

    #[test]
    fn blank_device_loads_defaults_without_counting_a_failure() {
        let mut persistence = Persistence::new(MockEeprom::new(1024));
        let mut store = store_with_gain(3.0);

        let status = persistence.load(&mut store);

        assert_eq!(status, LoadStatus::Defaulted(LoadFailure::Blank));
        assert_eq!(persistence.load_failures(), 0);
        assert_eq!(store.get_f32(Cal::Gain), 1.0);
    }

    #[test]
    fn save_then_load_round_trips_values_and_presence() {
        let eeprom = MockEeprom::new(1024);
        let mut persistence = Persistence::new(eeprom.clone());
        persistence.save(&store_with_gain(2.5)).unwrap();

        let mut reloaded = Persistence::new(eeprom);
        let mut store = PropertyStore::<Cal>::new();
        assert!(reloaded.load(&mut store).is_loaded());
        assert_eq!(store.get_f32(Cal::Gain), 2.5);
        assert!(store.is_present(Cal::Gain));
        assert!(!store.is_present(Cal::Label));
    }

    #[test]
    fn saves_alternate_slots_and_newest_wins() {
        let eeprom = MockEeprom::new(1024);
        let mut persistence = Persistence::new(eeprom.clone());
        persistence.save(&store_with_gain(2.0)).unwrap();
        persistence.save(&store_with_gain(4.0)).unwrap();

        let mut store = PropertyStore::<Cal>::new();
        let status = Persistence::new(eeprom).load(&mut store);
        assert_eq!(status, LoadStatus::Loaded { slot: 1, sequence: 2 });
        assert_eq!(store.get_f32(Cal::Gain), 4.0);
    }

    #[test]
    fn torn_save_keeps_previous_copy() {
        let eeprom = MockEeprom::new(1024);
        let mut persistence = Persistence::new(eeprom.clone());
        persistence.save(&store_with_gain(2.0)).unwrap();

        eeprom.lose_power_after(3);
        assert_eq!(
            persistence.save(&store_with_gain(9.0)),
            Err(PersistError::Storage)
        );
        eeprom.restore_power();

        let mut store = PropertyStore::<Cal>::new();
        let mut rebooted = Persistence::new(eeprom);
        assert!(rebooted.load(&mut store).is_loaded());
        assert_eq!(store.get_f32(Cal::Gain), 2.0);
    }

    #[test]
    fn corrupt_slot_falls_back_and_counts() {
        let eeprom = MockEeprom::new(1024);
        Persistence::new(eeprom.clone())
            .save(&store_with_gain(2.0))
            .unwrap();
        eeprom.corrupt(HEADER_SIZE + 1);

        let mut persistence = Persistence::new(eeprom);
        let mut store = PropertyStore::<Cal>::new();
        let status = persistence.load(&mut store);

        assert_eq!(status, LoadStatus::Defaulted(LoadFailure::Corrupt));
        assert_eq!(persistence.load_failures(), 1);
        assert_eq!(store.get_f32(Cal::Gain), 1.0);
    }

    #[test]
    fn undersized_storage_is_reported() {
        let mut persistence = Persistence::new(MockEeprom::new(SLOT_SIZE));
        let mut store = PropertyStore::<Cal>::new();
        assert_eq!(
            persistence.load(&mut store),
            LoadStatus::Defaulted(LoadFailure::Storage)
        );
        assert_eq!(persistence.save(&store), Err(PersistError::TooSmall));
    }

    #[test]
    fn sequence_order_survives_wraparound() {
        assert!(is_newer(1, u32::MAX));
        assert!(!is_newer(u32::MAX, 1));
        assert!(!is_newer(7, 7));
    }
}
