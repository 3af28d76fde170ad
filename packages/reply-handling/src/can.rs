//! CAN frames as waiter content.
//!
//! A [`CanFrame`] is an owned byte buffer laid out as a message identifier
//! followed by the data field. The identifier is 2 bytes (11-bit standard
//! id) when the top bit of byte 0 is clear and 4 bytes (29-bit extended id)
//! when it is set:
//!
//! ```text
//! standard: [DDDD Diii] [iiii iiii] [data ...]
//! extended: [1DDi iiii] [iiii iiii] [iiii iiii] [iiii iiii] [data ...]
//!            D = frame definition bits, i = identifier bits
//! ```
//!
//! Frames deref to `[u8]`, so they are sent and matched by
//! `BlockingReplyHandler<u8>` / `AsyncReplyHandler<u8>` like any other byte
//! message. Pick sentinels that never occur in the bytes you match on.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Deref, Index, IndexMut};

use thiserror::Error;

/// Contract violations on CAN frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CanError {
    #[error("index {index} is out of range for {len} bytes")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("frame of {actual} bytes is too short for a {needed}-byte message id")]
    Truncated { needed: usize, actual: usize },
}

/// Width of a CAN message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageIdType {
    /// 11-bit identifier carried in 2 bytes.
    Standard,
    /// 29-bit identifier carried in 4 bytes.
    Extended,
}

impl MessageIdType {
    fn of(first: u8) -> Self {
        if first >> 7 == 1 {
            Self::Extended
        } else {
            Self::Standard
        }
    }

    /// Number of bytes the identifier occupies.
    pub fn len(self) -> usize {
        match self {
            Self::Standard => 2,
            Self::Extended => 4,
        }
    }

    fn identifier_mask(self) -> u8 {
        match self {
            Self::Standard => 0x07,
            Self::Extended => 0x1F,
        }
    }

    fn definition_mask(self) -> u8 {
        match self {
            Self::Standard => 0xF8,
            Self::Extended => 0xE0,
        }
    }
}

/// Owned CAN frame: message id bytes followed by data bytes.
///
/// Frames order lexicographically by their bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanFrame {
    bytes: Vec<u8>,
}

impl CanFrame {
    /// Wrap `bytes`, checking that they hold a complete message id.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CanError> {
        let frame = Self { bytes };
        frame.message_id()?;
        Ok(frame)
    }

    /// A frame of `len` zero bytes (a standard id of 0 followed by data).
    pub fn zeroed(len: usize) -> Result<Self, CanError> {
        Self::new(vec![0; len])
    }

    /// Build a frame from `len` bytes of `source` starting at `start`.
    pub fn from_slice(source: &[u8], start: usize, len: usize) -> Result<Self, CanError> {
        let end = start
            .checked_add(len)
            .filter(|end| *end <= source.len())
            .ok_or(CanError::IndexOutOfRange {
                index: start.saturating_add(len),
                len: source.len(),
            })?;
        Self::new(source[start..end].to_vec())
    }

    /// The message id view of this frame.
    ///
    /// Fails with [`CanError::Truncated`] if byte 0 announces a longer id
    /// than the frame holds, which can happen after the frame was mutated.
    pub fn message_id(&self) -> Result<MessageId<'_>, CanError> {
        MessageId::new(&self.bytes)
    }

    /// The data field following the message id.
    pub fn data(&self) -> Result<&[u8], CanError> {
        let id = self.message_id()?;
        Ok(&self.bytes[id.len()..])
    }

    /// Byte at `index`.
    pub fn get(&self, index: usize) -> Result<u8, CanError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(CanError::IndexOutOfRange {
                index,
                len: self.bytes.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Deref for CanFrame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for CanFrame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Index<usize> for CanFrame {
    type Output = u8;

    fn index(&self, index: usize) -> &u8 {
        &self.bytes[index]
    }
}

impl IndexMut<usize> for CanFrame {
    fn index_mut(&mut self, index: usize) -> &mut u8 {
        &mut self.bytes[index]
    }
}

impl TryFrom<Vec<u8>> for CanFrame {
    type Error = CanError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, CanError> {
        Self::new(bytes)
    }
}

impl TryFrom<&[u8]> for CanFrame {
    type Error = CanError;

    fn try_from(bytes: &[u8]) -> Result<Self, CanError> {
        Self::new(bytes.to_vec())
    }
}

/// Renders as `ID#DATA` in upper-case hex, e.g. `0123#DEADBEEF`.
impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message_id() {
            Ok(id) => {
                write!(f, "{id}#")?;
                write_hex(f, &self.bytes[id.len()..])
            }
            Err(_) => write_hex(f, &self.bytes),
        }
    }
}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CanFrame({self})")
    }
}

/// Borrowed view of a frame's message id.
///
/// Equality, ordering and hashing consider only the identifier bits, so two
/// frames with the same id but different definition bits compare equal.
#[derive(Clone, Copy)]
pub struct MessageId<'a> {
    bytes: &'a [u8],
}

impl<'a> MessageId<'a> {
    /// Read the message id at the start of `frame`.
    pub fn new(frame: &'a [u8]) -> Result<Self, CanError> {
        let first = *frame.first().ok_or(CanError::Truncated {
            needed: MessageIdType::Standard.len(),
            actual: 0,
        })?;
        let needed = MessageIdType::of(first).len();
        if frame.len() < needed {
            return Err(CanError::Truncated {
                needed,
                actual: frame.len(),
            });
        }
        Ok(Self {
            bytes: &frame[..needed],
        })
    }

    pub fn id_type(&self) -> MessageIdType {
        MessageIdType::of(self.bytes[0])
    }

    /// Number of bytes in this id (2 or 4).
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Raw id byte at `index`, definition bits included.
    pub fn get(&self, index: usize) -> Result<u8, CanError> {
        self.bytes
            .get(index)
            .copied()
            .ok_or(CanError::IndexOutOfRange {
                index,
                len: self.bytes.len(),
            })
    }

    /// The id bytes with the frame definition bits masked off.
    pub fn identifier(&self) -> Vec<u8> {
        let mut id = self.bytes.to_vec();
        id[0] &= self.id_type().identifier_mask();
        id
    }

    /// The identifier as a number.
    pub fn value(&self) -> u32 {
        self.identifier()
            .iter()
            .fold(0u32, |acc, byte| (acc << 8) | u32::from(*byte))
    }

    /// The frame definition bits of byte 0, left in place.
    pub fn definition_bits(&self) -> u8 {
        self.bytes[0] & self.id_type().definition_mask()
    }

    pub fn is_remote_frame(&self) -> bool {
        (self.definition_bits() >> 5) & 0x1 == 1
    }

    pub fn error_in_frame(&self) -> bool {
        (self.definition_bits() >> 6) & 0x1 == 1
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

impl PartialEq for MessageId<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.identifier() == other.identifier()
    }
}

impl Eq for MessageId<'_> {}

impl PartialOrd for MessageId<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageId<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identifier().cmp(&other.identifier())
    }
}

impl Hash for MessageId<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identifier().hash(state);
    }
}

/// Upper-case hex of the raw id bytes, e.g. `0123` or `9FFFFFFF`.
impl fmt::Display for MessageId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, self.bytes)
    }
}

impl fmt::Debug for MessageId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageId")
            .field("id_type", &self.id_type())
            .field("raw", &format_args!("{self}"))
            .finish()
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for byte in bytes {
        write!(f, "{byte:02X}")?;
    }
    Ok(())
}

/// Copy up to `len` bytes from `source[source_index..]` into
/// `frame[dest_index..]`.
///
/// The copy stops at the end of either buffer. Returns the number of bytes
/// copied.
pub fn copy_into(
    source: &[u8],
    frame: &mut CanFrame,
    source_index: usize,
    dest_index: usize,
    len: usize,
) -> Result<usize, CanError> {
    if source_index >= source.len() {
        return Err(CanError::IndexOutOfRange {
            index: source_index,
            len: source.len(),
        });
    }
    if dest_index > frame.len() {
        return Err(CanError::IndexOutOfRange {
            index: dest_index,
            len: frame.len(),
        });
    }

    let count = len
        .min(source.len() - source_index)
        .min(frame.len() - dest_index);
    frame.bytes[dest_index..dest_index + count]
        .copy_from_slice(&source[source_index..source_index + count]);
    Ok(count)
}
