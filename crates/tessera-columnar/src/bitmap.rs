#![forbid(unsafe_code)]

/// A packed row-survival mask, one bit per row.
///
/// Bits are stored LSB-first within each byte:
/// - bit 0 is the LSB of byte 0
/// - bit 7 is the MSB of byte 0
///
/// Padding bits past `len` in the final byte are always zero, so byte-wise combinators never
/// leak spurious rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitmap {
    bytes: Vec<u8>,
    len: usize,
    ones: usize,
}

fn byte_len(bits: usize) -> usize {
    (bits + 7) / 8
}

fn tail_mask(bits: usize) -> Option<u8> {
    match bits % 8 {
        0 => None,
        rem => Some((1u8 << rem) - 1),
    }
}

impl Bitmap {
    /// Pack an unpacked bytemap (one byte per row, non-zero = survives) into a bitmap.
    pub fn pack(bytemap: &[u8]) -> Self {
        let mut bytes = vec![0u8; byte_len(bytemap.len())];
        let mut ones = 0usize;
        for (row, &b) in bytemap.iter().enumerate() {
            if b != 0 {
                bytes[row / 8] |= 1u8 << (row % 8);
                ones += 1;
            }
        }
        Self {
            bytes,
            len: bytemap.len(),
            ones,
        }
    }

    /// Build a bitmap of `len` rows by evaluating `f` for every row index.
    pub fn from_fn(len: usize, mut f: impl FnMut(usize) -> bool) -> Self {
        let mut bytes = vec![0u8; byte_len(len)];
        let mut ones = 0usize;
        for row in 0..len {
            if f(row) {
                bytes[row / 8] |= 1u8 << (row % 8);
                ones += 1;
            }
        }
        Self { bytes, len, ones }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len, "Bitmap index out of bounds");
        ((self.bytes[index / 8] >> (index % 8)) & 1) == 1
    }

    pub fn count_ones(&self) -> usize {
        self.ones
    }

    pub fn all_true(&self) -> bool {
        self.ones == self.len
    }

    /// Indices of set bits, in increasing order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b != 0)
            .flat_map(|(byte_idx, &b)| {
                (0..8usize)
                    .filter(move |bit| (b >> bit) & 1 == 1)
                    .map(move |bit| byte_idx * 8 + bit)
            })
    }

    pub fn and_inplace(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len, "Bitmap length mismatch");
        self.combine(other, |a, b| a & b);
    }

    pub fn or_inplace(&mut self, other: &Bitmap) {
        debug_assert_eq!(self.len, other.len, "Bitmap length mismatch");
        self.combine(other, |a, b| a | b);
    }

    fn combine(&mut self, other: &Bitmap, op: impl Fn(u8, u8) -> u8) {
        for (i, b) in self.bytes.iter_mut().enumerate() {
            *b = op(*b, other.bytes.get(i).copied().unwrap_or(0));
        }
        self.mask_tail();
        self.ones = self.bytes.iter().map(|b| b.count_ones() as usize).sum();
    }

    fn mask_tail(&mut self) {
        if let (Some(mask), Some(last)) = (tail_mask(self.len), self.bytes.last_mut()) {
            *last &= mask;
        }
    }
}
