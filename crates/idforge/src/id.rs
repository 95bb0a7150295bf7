use core::fmt;

use crate::{Error, Result};

/// A 64-bit Snowflake ID split into datacenter and machine fields.
///
/// - 1 bit reserved
/// - 41 bits timestamp (ms since the generator epoch, see [`DEFAULT_EPOCH`])
/// - 5 bits datacenter ID
/// - 5 bits machine ID
/// - 12 bits sequence
///
/// ```text
///  Bit Index:  63           63 62            22 21              17 16           12 11             0
///              +--------------+----------------+------------------+--------------+---------------+
///  Field:      | reserved (1) | timestamp (41) | datacenter ID (5)| machine ID (5)| sequence (12) |
///              +--------------+----------------+------------------+--------------+---------------+
///              |<----------------- MSB ------------- 64 bits ------------- LSB ------------------>|
/// ```
///
/// Consumers that parse JSON numbers as 64-bit floats lose precision on
/// values this large, so IDs leave the crate as decimal strings via
/// [`fmt::Display`].
///
/// [`DEFAULT_EPOCH`]: crate::DEFAULT_EPOCH
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedId {
    id: u64,
}

impl PackedId {
    /// Bitmask for extracting the 41-bit timestamp field. Occupies bits 22
    /// through 62.
    pub const TIMESTAMP_MASK: u64 = (1 << 41) - 1;

    /// Bitmask for extracting the 5-bit datacenter ID field. Occupies bits 17
    /// through 21.
    pub const DATACENTER_ID_MASK: u64 = (1 << 5) - 1;

    /// Bitmask for extracting the 5-bit machine ID field. Occupies bits 12
    /// through 16.
    pub const MACHINE_ID_MASK: u64 = (1 << 5) - 1;

    /// Bitmask for extracting the 12-bit sequence field. Occupies bits 0
    /// through 11.
    pub const SEQUENCE_MASK: u64 = (1 << 12) - 1;

    /// Number of bits to shift the timestamp to its correct position (bit 22).
    pub const TIMESTAMP_SHIFT: u64 = 22;

    /// Number of bits to shift the datacenter ID to its correct position (bit 17).
    pub const DATACENTER_ID_SHIFT: u64 = 17;

    /// Number of bits to shift the machine ID to its correct position (bit 12).
    pub const MACHINE_ID_SHIFT: u64 = 12;

    /// Number of bits to shift the sequence field (bit 0).
    pub const SEQUENCE_SHIFT: u64 = 0;

    /// Packs the components without range checks. Out-of-range values are
    /// masked.
    pub const fn from(timestamp: u64, datacenter_id: u64, machine_id: u64, sequence: u64) -> Self {
        let timestamp = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let datacenter_id =
            (datacenter_id & Self::DATACENTER_ID_MASK) << Self::DATACENTER_ID_SHIFT;
        let machine_id = (machine_id & Self::MACHINE_ID_MASK) << Self::MACHINE_ID_SHIFT;
        let sequence = (sequence & Self::SEQUENCE_MASK) << Self::SEQUENCE_SHIFT;
        Self {
            id: timestamp | datacenter_id | machine_id | sequence,
        }
    }

    /// Packs the components, rejecting any value that does not fit its field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the first field that
    /// overflows.
    pub fn try_from_components(
        timestamp: u64,
        datacenter_id: u64,
        machine_id: u64,
        sequence: u64,
    ) -> Result<Self> {
        check_field("timestamp", timestamp, Self::TIMESTAMP_MASK)?;
        check_field("datacenter_id", datacenter_id, Self::DATACENTER_ID_MASK)?;
        check_field("machine_id", machine_id, Self::MACHINE_ID_MASK)?;
        check_field("sequence", sequence, Self::SEQUENCE_MASK)?;
        Ok(Self::from(timestamp, datacenter_id, machine_id, sequence))
    }

    /// Wraps a raw 64-bit value.
    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    /// Returns the raw 64-bit value.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Extracts the timestamp (relative to the epoch) from the packed ID.
    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    /// Extracts the datacenter ID from the packed ID.
    pub const fn datacenter_id(&self) -> u64 {
        (self.id >> Self::DATACENTER_ID_SHIFT) & Self::DATACENTER_ID_MASK
    }

    /// Extracts the machine ID from the packed ID.
    pub const fn machine_id(&self) -> u64 {
        (self.id >> Self::MACHINE_ID_SHIFT) & Self::MACHINE_ID_MASK
    }

    /// Extracts the sequence number from the packed ID.
    pub const fn sequence(&self) -> u64 {
        (self.id >> Self::SEQUENCE_SHIFT) & Self::SEQUENCE_MASK
    }

    /// Returns true if the sequence can be incremented within the current
    /// millisecond.
    pub const fn has_sequence_room(&self) -> bool {
        self.sequence() < Self::SEQUENCE_MASK
    }

    /// Returns a new ID with the sequence incremented.
    pub const fn increment_sequence(&self) -> Self {
        Self::from(
            self.timestamp(),
            self.datacenter_id(),
            self.machine_id(),
            self.sequence() + 1,
        )
    }

    /// Returns a new ID for a newer timestamp with sequence reset to zero.
    pub const fn rollover_to_timestamp(&self, ts: u64) -> Self {
        Self::from(ts, self.datacenter_id(), self.machine_id(), 0)
    }

    /// Returns the ID as a zero-padded 20-digit string.
    pub fn to_padded_string(&self) -> String {
        format!("{:020}", self.id)
    }
}

fn check_field(name: &str, value: u64, mask: u64) -> Result<()> {
    if value > mask {
        return Err(Error::invalid_argument(format!(
            "{name} {value} exceeds maximum {mask}"
        )));
    }
    Ok(())
}

/// The fields of a [`PackedId`] with the timestamp rebased onto the Unix
/// epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DecodedId {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub datacenter_id: u64,
    pub machine_id: u64,
    pub sequence: u64,
}

/// Packs an absolute timestamp and the location/sequence fields into a 64-bit
/// ID.
///
/// `epoch` and `timestamp_ms` are both milliseconds since the Unix epoch.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `timestamp_ms` precedes `epoch`, the
/// relative timestamp exceeds 41 bits, either ID exceeds 5 bits, or the
/// sequence exceeds 12 bits.
///
/// # Example
///
/// ```
/// use idforge::{DEFAULT_EPOCH_MILLIS, decode, encode};
///
/// let raw = encode(DEFAULT_EPOCH_MILLIS, DEFAULT_EPOCH_MILLIS + 1000, 3, 7, 42).unwrap();
/// let decoded = decode(DEFAULT_EPOCH_MILLIS, raw);
/// assert_eq!(decoded.timestamp_ms, DEFAULT_EPOCH_MILLIS + 1000);
/// assert_eq!((decoded.datacenter_id, decoded.machine_id, decoded.sequence), (3, 7, 42));
/// ```
pub fn encode(
    epoch: u64,
    timestamp_ms: u64,
    datacenter_id: u64,
    machine_id: u64,
    sequence: u64,
) -> Result<u64> {
    let relative = timestamp_ms.checked_sub(epoch).ok_or_else(|| {
        Error::invalid_argument(format!("timestamp {timestamp_ms} precedes epoch {epoch}"))
    })?;
    PackedId::try_from_components(relative, datacenter_id, machine_id, sequence)
        .map(|id| id.to_raw())
}

/// Inverse of [`encode`].
pub fn decode(epoch: u64, id: u64) -> DecodedId {
    let id = PackedId::from_raw(id);
    DecodedId {
        timestamp_ms: epoch + id.timestamp(),
        datacenter_id: id.datacenter_id(),
        machine_id: id.machine_id(),
        sequence: id.sequence(),
    }
}

impl fmt::Display for PackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for PackedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_bit_layout_debug(f, self)
    }
}

struct FieldLayout {
    name: &'static str,
    bits: u8,
    value: u64,
}

impl PackedId {
    fn fields(&self) -> [FieldLayout; 5] {
        [
            FieldLayout {
                name: "reserved",
                bits: 1,
                value: 0,
            },
            FieldLayout {
                name: "timestamp",
                bits: 41,
                value: self.timestamp(),
            },
            FieldLayout {
                name: "datacenter",
                bits: 5,
                value: self.datacenter_id(),
            },
            FieldLayout {
                name: "machine",
                bits: 5,
                value: self.machine_id(),
            },
            FieldLayout {
                name: "sequence",
                bits: 12,
                value: self.sequence(),
            },
        ]
    }
}

fn write_bit_layout_debug(f: &mut fmt::Formatter<'_>, id: &PackedId) -> fmt::Result {
    fn center(s: impl ToString, width: usize) -> String {
        let s = s.to_string();
        let pad = width.saturating_sub(s.len());
        let left = pad / 2;
        format!("{}{}{}", " ".repeat(left), s, " ".repeat(pad - left))
    }

    fn border(f: &mut fmt::Formatter<'_>, columns: &[usize]) -> fmt::Result {
        write!(f, "        +")?;
        for &w in columns {
            write!(f, "{}+", "-".repeat(w))?;
        }
        writeln!(f)
    }

    let fields = id.fields();

    // Column width fits the widest of label, decimal and hex, plus padding
    let columns: Vec<usize> = fields
        .iter()
        .map(|field| {
            let label_len = format!("{} ({})", field.name, field.bits).len();
            let dec_len = field.value.to_string().len();
            let hex_len = format!("0x{:x}", field.value).len();
            label_len.max(dec_len).max(hex_len) + 2
        })
        .collect();

    writeln!(f, "PackedId {{")?;
    writeln!(f, "    raw id     : 0x{:016x} ({})", id.id, id.id)?;
    writeln!(f, "    padded     : {}", id.to_padded_string())?;
    writeln!(f, "    layout     :")?;

    border(f, &columns)?;
    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(format!("{} ({})", field.name, field.bits), w))?;
    }
    writeln!(f)?;
    border(f, &columns)?;

    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(field.value, w))?;
    }
    writeln!(f)?;

    write!(f, "        |")?;
    for (field, &w) in fields.iter().zip(&columns) {
        write!(f, "{}|", center(format!("0x{:x}", field.value), w))?;
    }
    writeln!(f)?;
    border(f, &columns)?;

    write!(f, "}}")
}
