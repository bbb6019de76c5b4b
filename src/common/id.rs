//! Overlay node Id or a lookup target, as a fixed-length string of hex digits.
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// Default number of hex digits in an Id, which is also the number of routing table columns.
pub const DEFAULT_DIMENSION: usize = 40;
/// Number of values a single digit can take.
pub const RING_SIZE: u8 = 16;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Overlay node Id or a lookup target.
///
/// Stored as one `u8` per hex digit (`0..16`), most significant digit first.
pub struct Id(Box<[u8]>);

impl Id {
    /// Generate a random Id with `dimension` digits.
    pub fn random(dimension: usize) -> Id {
        let mut rng = rand::thread_rng();

        Id((0..dimension).map(|_| rng.gen_range(0..RING_SIZE)).collect())
    }

    /// Create a new Id from digit values. Returns Err if any digit is not in `0..16`.
    pub fn from_digits<T: AsRef<[u8]>>(digits: T) -> Result<Id> {
        let digits = digits.as_ref();
        if digits.is_empty() {
            return Err(Error::EmptyId);
        }

        if let Some(position) = digits.iter().position(|d| *d >= RING_SIZE) {
            return Err(Error::InvalidIdDigit {
                position,
                character: char::from(digits[position]),
            });
        }

        Ok(Id(digits.into()))
    }

    /// Parse a hex Id and check that it has exactly `dimension` digits.
    pub fn parse(hex: &str, dimension: usize) -> Result<Id> {
        let id = Id::from_str(hex)?;
        id.expect_len(dimension)?;

        Ok(id)
    }

    /// Returns Err if this Id does not have exactly `dimension` digits.
    pub fn expect_len(&self, dimension: usize) -> Result<()> {
        if self.len() != dimension {
            return Err(Error::InvalidIdLength {
                expected: dimension,
                found: self.len(),
            });
        }

        Ok(())
    }

    /// Number of digits.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn digits(&self) -> &[u8] {
        &self.0
    }

    /// Digit value at `position`.
    ///
    /// Panics if `position` is out of bounds, callers check lengths at the table boundary.
    pub fn digit(&self, position: usize) -> u8 {
        self.0[position]
    }

    /// First digit position, starting at `from`, where this Id and `other` differ.
    ///
    /// Returns `None` if the Ids are identical from `from` onwards.
    pub fn first_difference_from(&self, other: &Id, from: usize) -> Option<usize> {
        let shared = self.len().min(other.len());

        (from..shared)
            .find(|&i| self.0[i] != other.0[i])
            .or_else(|| (self.len() != other.len() && from <= shared).then_some(shared))
    }

    /// First digit position where this Id and `other` differ, `None` if they are equal.
    pub fn first_difference(&self, other: &Id) -> Option<usize> {
        self.first_difference_from(other, 0)
    }
}

/// Returns `true` if `x` lies on the clockwise arc starting at `from` (inclusive)
/// and ending at `to` (exclusive) on the modulo-16 digit ring.
///
/// The arc `[a, a)` is empty.
pub fn ring_arc(from: u8, to: u8, x: u8) -> bool {
    if from <= to {
        from <= x && x < to
    } else {
        x >= from || x < to
    }
}

/// Shortest distance between two digits going either way around the ring.
pub fn ring_distance(a: u8, b: u8) -> u8 {
    let forward = (b + RING_SIZE - a) % RING_SIZE;

    forward.min(RING_SIZE - forward)
}

/// The digit diametrically opposite to `digit` on the ring.
pub fn antipode(digit: u8) -> u8 {
    (digit + RING_SIZE / 2) % RING_SIZE
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        if s.is_empty() {
            return Err(Error::EmptyId);
        }

        let digits = s
            .chars()
            .enumerate()
            .map(|(position, character)| {
                character
                    .to_digit(16)
                    .map(|d| d as u8)
                    .ok_or(Error::InvalidIdDigit {
                        position,
                        character,
                    })
            })
            .collect::<Result<Box<[u8]>>>()?;

        Ok(Id(digits))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for digit in self.0.iter() {
            write!(f, "{:x}", digit)?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}
