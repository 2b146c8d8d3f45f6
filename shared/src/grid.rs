//! Bit-packed grid codec
//!
//! A board of `N` columns and `N` rows is flattened row by row into a linear
//! "wide" offset `x + N * y`. Two cells share every byte: the cell with an
//! even wide offset lives in the upper nibble, the odd one in the lower
//! nibble. The server's storage and every participant's replica use these
//! functions, so the mapping must stay bit-exact on both sides.
//!
//! Range checking is the caller's job. Every function here assumes
//! `x < N`, `y < N` and `color < 16`.

use crate::GridError;

/// Number of distinct color indices a cell can hold (4 bits)
pub const COLOR_COUNT: u8 = 16;

const UPPER_MASK: u8 = 0xF0;
const LOWER_MASK: u8 = 0x0F;

/// Which half of a byte a cell occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nibble {
    /// Bits 4-7
    Upper,
    /// Bits 0-3
    Lower,
}

/// Physical location of one cell inside a packed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellOffset {
    pub byte: usize,
    pub nibble: Nibble,
}

impl CellOffset {
    /// Maps a linear wide offset to its byte and nibble
    pub fn from_wide(wide: usize) -> Self {
        let nibble = if wide % 2 == 0 {
            Nibble::Upper
        } else {
            Nibble::Lower
        };

        Self {
            byte: wide / 2,
            nibble,
        }
    }

    /// Inverse of [`CellOffset::from_wide`]
    pub fn wide(&self) -> usize {
        match self.nibble {
            Nibble::Upper => self.byte * 2,
            Nibble::Lower => self.byte * 2 + 1,
        }
    }

    pub fn is_upper(&self) -> bool {
        self.nibble == Nibble::Upper
    }
}

/// Linear cell index for `(x, y)` on a board with `columns` columns
pub fn wide_offset(x: u32, y: u32, columns: u32) -> usize {
    x as usize + columns as usize * y as usize
}

/// Byte offset and nibble holding cell `(x, y)`
pub fn offset_of(x: u32, y: u32, columns: u32) -> CellOffset {
    CellOffset::from_wide(wide_offset(x, y, columns))
}

/// Extracts the color stored at `offset`
pub fn read_nibble(buffer: &[u8], offset: CellOffset) -> u8 {
    let wide = buffer[offset.byte];
    match offset.nibble {
        Nibble::Upper => (wide & UPPER_MASK) >> 4,
        Nibble::Lower => wide & LOWER_MASK,
    }
}

/// Writes `color` at `offset`, leaving the neighbouring nibble untouched
pub fn write_nibble(buffer: &mut [u8], offset: CellOffset, color: u8) {
    let existing = buffer[offset.byte];
    buffer[offset.byte] = match offset.nibble {
        Nibble::Upper => (existing & LOWER_MASK) | ((color << 4) & UPPER_MASK),
        Nibble::Lower => (existing & UPPER_MASK) | (color & LOWER_MASK),
    };
}

/// Reads the color of cell `(x, y)`
pub fn decode(buffer: &[u8], x: u32, y: u32, columns: u32) -> u8 {
    read_nibble(buffer, offset_of(x, y, columns))
}

/// Stores `color` into cell `(x, y)` in place
pub fn encode(buffer: &mut [u8], x: u32, y: u32, columns: u32, color: u8) {
    write_nibble(buffer, offset_of(x, y, columns), color);
}

/// Number of bytes needed for a board with `columns` columns
pub fn byte_len(columns: u32) -> usize {
    let columns = columns as usize;
    columns * columns / 2
}

/// Derives the column count from a packed buffer length
///
/// Returns `None` unless `2 * len` is the square of an even, non-zero `N`;
/// any other length does not describe a board.
pub fn column_count(len: usize) -> Option<u32> {
    let cells = len.checked_mul(2)?;
    let mut columns = (cells as f64).sqrt() as usize;
    // float sqrt may land one off for large inputs
    while columns * columns > cells {
        columns -= 1;
    }
    while (columns + 1) * (columns + 1) <= cells {
        columns += 1;
    }

    if columns == 0 || columns * columns != cells || columns % 2 != 0 {
        return None;
    }
    u32::try_from(columns).ok()
}

/// Like [`column_count`] but reports the offending length
pub fn checked_column_count(len: usize) -> Result<u32, GridError> {
    column_count(len).ok_or(GridError::MalformedBuffer { len })
}

/// Lazy iterator over every `(x, y, color)` of a packed buffer
///
/// Walks column by column (all `y` for `x = 0`, then `x = 1`, ...). Cloning
/// the iterator, or asking the owner for a fresh one, restarts the walk.
#[derive(Debug, Clone)]
pub struct Points<'a> {
    buffer: &'a [u8],
    columns: u32,
    x: u32,
    y: u32,
}

impl<'a> Points<'a> {
    pub fn new(buffer: &'a [u8], columns: u32) -> Self {
        Self {
            buffer,
            columns,
            x: 0,
            y: 0,
        }
    }
}

impl Iterator for Points<'_> {
    type Item = (u32, u32, u8);

    fn next(&mut self) -> Option<Self::Item> {
        if self.x >= self.columns {
            return None;
        }

        let point = (
            self.x,
            self.y,
            decode(self.buffer, self.x, self.y, self.columns),
        );

        self.y += 1;
        if self.y == self.columns {
            self.y = 0;
            self.x += 1;
        }

        Some(point)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = self.columns as usize * self.columns as usize;
        let done = self.x as usize * self.columns as usize + self.y as usize;
        let remaining = total.saturating_sub(done);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Points<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_offset_of_first_row() {
        assert_eq!(
            offset_of(0, 0, 4),
            CellOffset {
                byte: 0,
                nibble: Nibble::Upper
            }
        );
        assert_eq!(
            offset_of(1, 0, 4),
            CellOffset {
                byte: 0,
                nibble: Nibble::Lower
            }
        );
        assert_eq!(
            offset_of(3, 0, 4),
            CellOffset {
                byte: 1,
                nibble: Nibble::Lower
            }
        );
    }

    #[test]
    fn test_offset_of_wraps_rows() {
        // (0, 1) on a 4-wide board is wide offset 4
        let offset = offset_of(0, 1, 4);
        assert_eq!(offset.byte, 2);
        assert!(offset.is_upper());
        assert_eq!(offset.wide(), 4);
    }

    #[test]
    fn test_offset_of_is_bijection() {
        for columns in [2u32, 4, 6, 10, 32] {
            let mut seen = HashSet::new();
            for y in 0..columns {
                for x in 0..columns {
                    let offset = offset_of(x, y, columns);
                    assert!(offset.byte < byte_len(columns));
                    assert!(seen.insert(offset), "duplicate offset for ({}, {})", x, y);
                }
            }
            assert_eq!(seen.len(), byte_len(columns) * 2);
        }
    }

    #[test]
    fn test_encode_sets_upper_nibble() {
        let mut buffer = vec![0xFF; 8];
        encode(&mut buffer, 0, 0, 4, 3);
        assert_eq!(buffer[0], 0x3F);
        assert_eq!(decode(&buffer, 0, 0, 4), 3);
        assert_eq!(decode(&buffer, 1, 0, 4), 15);
    }

    #[test]
    fn test_encode_sets_lower_nibble() {
        let mut buffer = vec![0x00; 8];
        encode(&mut buffer, 1, 0, 4, 0xA);
        assert_eq!(buffer[0], 0x0A);
        assert_eq!(decode(&buffer, 0, 0, 4), 0);
    }

    #[test]
    fn test_encode_isolates_neighbours() {
        let columns = 6;
        let mut buffer: Vec<u8> = (0..byte_len(columns) as u8).map(|b| b.wrapping_mul(37)).collect();

        for y in 0..columns {
            for x in 0..columns {
                for color in 0..COLOR_COUNT {
                    let before = buffer.clone();
                    encode(&mut buffer, x, y, columns, color);
                    assert_eq!(decode(&buffer, x, y, columns), color);

                    for (ox, oy, other) in Points::new(&before, columns) {
                        if (ox, oy) != (x, y) {
                            assert_eq!(decode(&buffer, ox, oy, columns), other);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_column_count() {
        assert_eq!(column_count(2), Some(2));
        assert_eq!(column_count(8), Some(4));
        assert_eq!(column_count(5000), Some(100));
        assert_eq!(column_count(0), None);
        assert_eq!(column_count(7), None);
        // 18 bytes hold a 6 x 6 board
        assert_eq!(column_count(18), Some(6));
        assert_eq!(column_count(byte_len(1000)), Some(1000));
    }

    #[test]
    fn test_checked_column_count_reports_length() {
        match checked_column_count(3) {
            Err(GridError::MalformedBuffer { len }) => assert_eq!(len, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_points_visits_every_cell() {
        let mut buffer = vec![0u8; 8];
        encode(&mut buffer, 2, 3, 4, 9);

        let points: Vec<_> = Points::new(&buffer, 4).collect();
        assert_eq!(points.len(), 16);
        assert_eq!(points[0], (0, 0, 0));
        assert_eq!(points[1], (0, 1, 0));
        assert!(points.contains(&(2, 3, 9)));
    }

    #[test]
    fn test_points_restartable() {
        let buffer = vec![0x12, 0x34];
        let points = Points::new(&buffer, 2);
        assert_eq!(points.len(), 4);

        let first: Vec<_> = points.clone().collect();
        let second: Vec<_> = points.collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![(0, 0, 1), (0, 1, 3), (1, 0, 2), (1, 1, 4)]);
    }
}
