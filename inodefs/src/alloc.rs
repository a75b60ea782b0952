/// Number of logical bits tracked by one bitmap byte.
const BITS_PER_ENTRY: usize = 8;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// Location of a block's bit inside the bitmap buffer.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct EntryKey {
    /// Index of the byte holding the bit.
    pub entry: usize,
    /// Offset of the bit inside that byte, 0 being the most significant bit.
    pub bit: u8,
}

/// Tracks the allocation state of blocks with one bit per block over a buffer owned
/// by the caller.
///
/// Within each byte the most significant bit maps to the lowest block number, so
/// byte 0 with value `0b1000_0000` marks block 0 as used and blocks 1-7 as free.
pub struct Bitmap<B> {
    entries: B,
}

impl<B: AsRef<[u8]>> Bitmap<B> {
    pub fn new(entries: B) -> Self {
        Self { entries }
    }

    /// Converts a block number into its byte index and bit offset.
    pub fn index_of(blocknr: usize) -> EntryKey {
        EntryKey {
            entry: blocknr / BITS_PER_ENTRY,
            bit: (blocknr % BITS_PER_ENTRY) as u8,
        }
    }

    /// Converts a byte index and bit offset back into a block number.
    pub fn block_of(entry: usize, bit: u8) -> usize {
        entry * BITS_PER_ENTRY + bit as usize
    }

    /// The length of the underlying buffer in bytes. The bitmap tracks eight times
    /// as many blocks.
    pub fn num_bits(&self) -> usize {
        self.entries.as_ref().len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.entries.as_ref()
    }

    pub fn get(&self, blocknr: usize) -> State {
        assert!(
            blocknr < self.num_bits() * BITS_PER_ENTRY,
            "block {} is outside of the bitmap",
            blocknr
        );
        let key = Self::index_of(blocknr);
        let mask = 0b1000_0000_u8 >> key.bit;
        match self.entries.as_ref()[key.entry] & mask {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn is_set(&self, blocknr: usize) -> bool {
        self.get(blocknr) == State::Used
    }

    /// Returns the first block whose bit matches `wanted`, scanning from the byte at
    /// `start` onwards. Bits inside a byte are visited from the most to the least
    /// significant one, so the lowest matching block number always wins.
    pub fn find_first(&self, start: usize, wanted: State) -> Option<usize> {
        self.entries
            .as_ref()
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(entry, &byte)| {
                check(byte, wanted).map(|bit| Self::block_of(entry, bit))
            })
    }

    pub fn count_free(&self) -> usize {
        self.entries
            .as_ref()
            .iter()
            .map(|byte| byte.count_zeros() as usize)
            .sum()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Bitmap<B> {
    /// Sets the bit for `blocknr` regardless of its current value and returns the
    /// byte as it was before the update.
    pub fn set(&mut self, blocknr: usize, state: State) -> u8 {
        assert!(
            blocknr < self.num_bits() * BITS_PER_ENTRY,
            "block {} is outside of the bitmap",
            blocknr
        );
        let key = Self::index_of(blocknr);
        let mask = 0b1000_0000_u8 >> key.bit;
        let entry = &mut self.entries.as_mut()[key.entry];
        let previous = *entry;
        match state {
            State::Used => *entry |= mask,
            State::Free => *entry &= !mask,
        }
        previous
    }
}

/// Position of the first bit in `byte` matching `wanted`, counted from the most
/// significant bit.
fn check(byte: u8, wanted: State) -> Option<u8> {
    (0..BITS_PER_ENTRY as u8).find(|bit| {
        let used = byte & (0b1000_0000 >> bit) != 0;
        used == (wanted == State::Used)
    })
}
