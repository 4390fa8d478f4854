//! Fixed-size bit-level containers.
//!
//! - [`PackedArray`]: an arena of fixed-width unsigned items addressed by index
//! - [`BitSet`]: a fixed-capacity set of positions with inverse-rank lookup
//!
//! Both are sized once at construction and never resized. Their byte layouts
//! are part of the persisted state format, so bit order is fixed: item `i`
//! of a packed array occupies bits `i * width .. (i + 1) * width`, least
//! significant bit first, counting bits from the low end of byte 0.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Largest supported item width in bits.
pub const MAX_ITEM_WIDTH: u8 = 32;

/// Fixed-length array of `width`-bit unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArray {
    len: usize,
    width: u8,
    bytes: Vec<u8>,
}

impl PackedArray {
    /// Creates a zero-filled array of `len` items, each `width` bits wide.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `width` is zero or above
    /// [`MAX_ITEM_WIDTH`].
    pub fn new(len: usize, width: u8) -> Result<Self> {
        Self::check_width(width)?;
        Ok(Self::zeroed(len, width))
    }

    /// Zero-filled array for a width already known to be valid.
    pub(crate) fn zeroed(len: usize, width: u8) -> Self {
        debug_assert!(width > 0 && width <= MAX_ITEM_WIDTH);
        Self {
            len,
            width,
            bytes: vec![0; Self::byte_len(len, width)],
        }
    }

    /// Rebuilds an array from its persisted bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if the byte length does not match
    /// `len` and `width`, or if padding bits past the last item are set.
    pub fn from_bytes(len: usize, width: u8, bytes: Vec<u8>) -> Result<Self> {
        Self::check_width(width)?;
        let expected = Self::byte_len(len, width);
        if bytes.len() != expected {
            return Err(Error::serialization(format!(
                "packed array of {len} x {width}-bit items needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        let used_bits = (len * usize::from(width)) % 8;
        if used_bits != 0 && bytes.last().is_some_and(|&last| last >> used_bits != 0) {
            return Err(Error::serialization("packed array has nonzero padding bits"));
        }
        Ok(Self { len, width, bytes })
    }

    fn check_width(width: u8) -> Result<()> {
        if width == 0 || width > MAX_ITEM_WIDTH {
            return Err(Error::InvalidInput(format!(
                "item width must be within 1..={MAX_ITEM_WIDTH}, got {width}"
            )));
        }
        Ok(())
    }

    fn byte_len(len: usize, width: u8) -> usize {
        (len * usize::from(width)).div_ceil(8)
    }

    /// Number of items.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the array holds no items.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Item width in bits.
    #[must_use]
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// Largest value an item can hold.
    #[must_use]
    pub const fn max_value(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// The packed bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Reads the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..len`.
    pub fn get(&self, index: usize) -> Result<u32> {
        self.check_index(index)?;
        Ok(self.read(index))
    }

    fn read(&self, index: usize) -> u32 {
        let start = index * usize::from(self.width);
        (0..usize::from(self.width)).fold(0, |value, offset| {
            let bit = start + offset;
            let set = (self.bytes[bit / 8] >> (bit % 8)) & 1;
            value | (u32::from(set) << offset)
        })
    }

    /// Writes the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..len` and
    /// [`Error::InvalidInput`] if `value` does not fit the item width.
    pub fn set(&mut self, index: usize, value: u32) -> Result<()> {
        self.check_index(index)?;
        if value > self.max_value() {
            return Err(Error::InvalidInput(format!(
                "value {value} does not fit in {} bits",
                self.width
            )));
        }
        let start = index * usize::from(self.width);
        for offset in 0..usize::from(self.width) {
            let bit = start + offset;
            let mask = 1u8 << (bit % 8);
            if (value >> offset) & 1 == 1 {
                self.bytes[bit / 8] |= mask;
            } else {
                self.bytes[bit / 8] &= !mask;
            }
        }
        Ok(())
    }

    /// Iterates over all items in index order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).map(|index| self.read(index))
    }
}

/// Fixed-capacity set of positions `0..cap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BitSetRepr", into = "BitSetRepr")]
pub struct BitSet {
    cap: usize,
    words: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct BitSetRepr {
    cap: usize,
    words: Vec<u64>,
}

impl TryFrom<BitSetRepr> for BitSet {
    type Error = Error;

    fn try_from(repr: BitSetRepr) -> Result<Self> {
        if repr.words.len() != repr.cap.div_ceil(64) {
            return Err(Error::serialization(format!(
                "bitset of capacity {} needs {} words, got {}",
                repr.cap,
                repr.cap.div_ceil(64),
                repr.words.len()
            )));
        }
        let set = Self {
            cap: repr.cap,
            words: repr.words,
        };
        if set.iter_set().any(|pos| pos >= set.cap) {
            return Err(Error::serialization("bitset has bits beyond its capacity"));
        }
        Ok(set)
    }
}

impl From<BitSet> for BitSetRepr {
    fn from(set: BitSet) -> Self {
        Self {
            cap: set.cap,
            words: set.words,
        }
    }
}

impl BitSet {
    /// Creates an empty set over positions `0..cap`.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            words: vec![0; cap.div_ceil(64)],
        }
    }

    /// Creates a set over `0..cap` with the given positions set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if any position is outside `0..cap`.
    pub fn with_set(cap: usize, positions: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut set = Self::new(cap);
        for pos in positions {
            set.set(pos)?;
        }
        Ok(set)
    }

    /// Capacity in positions.
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Marks `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..cap`.
    pub fn set(&mut self, pos: usize) -> Result<()> {
        self.check(pos)?;
        self.words[pos / 64] |= 1 << (pos % 64);
        Ok(())
    }

    /// Unmarks `pos`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] outside `0..cap`.
    pub fn clear(&mut self, pos: usize) -> Result<()> {
        self.check(pos)?;
        self.words[pos / 64] &= !(1 << (pos % 64));
        Ok(())
    }

    /// Returns true if `pos` is marked. Positions outside the set are unmarked.
    #[must_use]
    pub fn is_set(&self, pos: usize) -> bool {
        pos < self.cap && (self.words[pos / 64] >> (pos % 64)) & 1 == 1
    }

    /// Number of marked positions.
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of unmarked positions.
    #[must_use]
    pub fn count_unset(&self) -> usize {
        self.cap - self.count_set()
    }

    /// Returns the position of the `n`-th unmarked bit, counting from zero.
    ///
    /// This is the position `p` such that `p` is unmarked and exactly `n`
    /// unmarked positions lie below it. Linear in the capacity.
    #[must_use]
    pub fn nth_unset(&self, n: usize) -> Option<usize> {
        self.iter_unset().nth(n)
    }

    /// Iterates over unmarked positions in ascending order.
    ///
    /// The `n`-th item is [`nth_unset(n)`](Self::nth_unset); walking the
    /// iterator once maps every compacted index in a single pass.
    pub fn iter_unset(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.cap).filter(|pos| !self.is_set(*pos))
    }

    fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(word_idx, word)| {
            (0..64)
                .filter(move |bit| (word >> bit) & 1 == 1)
                .map(move |bit| word_idx * 64 + bit)
        })
    }

    fn check(&self, pos: usize) -> Result<()> {
        if pos >= self.cap {
            return Err(Error::IndexOutOfRange {
                index: pos,
                len: self.cap,
            });
        }
        Ok(())
    }
}
