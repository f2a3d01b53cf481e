// This file is part of Opvet.
//
// Opvet is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Opvet is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Opvet.
// If not, see https://www.gnu.org/licenses/.

use ethers::types::U256;

use crate::EvmError;

/// Hard cap on call memory; accesses past it fail instead of allocating
pub const MAX_MEMORY_BYTES: usize = 1 << 21;

/// Byte-addressed call memory, extended in 32-byte words.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Current size in bytes (always a multiple of 32)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Store `value` at `offset`, growing memory as needed
    pub fn store(&mut self, offset: usize, value: &[u8]) -> Result<(), EvmError> {
        if value.is_empty() {
            return Ok(());
        }
        self.extend(offset, value.len())?;
        self.data[offset..offset + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// Store a single byte at `offset`
    pub fn store8(&mut self, offset: usize, value: u8) -> Result<(), EvmError> {
        self.store(offset, &[value])
    }

    /// Store a 32-byte big-endian word at `offset`
    pub fn store_word(&mut self, offset: usize, value: U256) -> Result<(), EvmError> {
        let mut buf = [0_u8; 32];
        value.to_big_endian(&mut buf);
        self.store(offset, &buf)
    }

    /// Read `size` bytes from `offset`, zero-padded past the current size
    pub fn read(&mut self, offset: usize, size: usize) -> Result<Vec<u8>, EvmError> {
        if size == 0 {
            return Ok(Vec::new());
        }
        self.extend(offset, size)?;
        Ok(self.data[offset..offset + size].to_vec())
    }

    /// Read the 32-byte big-endian word at `offset`
    pub fn read_word(&mut self, offset: usize) -> Result<U256, EvmError> {
        let bytes = self.read(offset, 32)?;
        Ok(U256::from_big_endian(&bytes))
    }

    /// Grow memory so `offset..offset + size` is addressable, word aligned
    pub fn extend(&mut self, offset: usize, size: usize) -> Result<(), EvmError> {
        if size == 0 {
            return Ok(());
        }
        let end = offset
            .checked_add(size)
            .ok_or(EvmError::MemoryLimit)?;
        if end > MAX_MEMORY_BYTES {
            return Err(EvmError::MemoryLimit);
        }
        let aligned = end.div_ceil(32) * 32;
        if aligned > self.data.len() {
            self.data.resize(aligned, 0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_read_round_trip() {
        let mut memory = Memory::default();
        memory.store_word(0, U256::from(0xdead_beef_u64)).unwrap();
        assert_eq!(memory.read_word(0).unwrap(), U256::from(0xdead_beef_u64));
        assert_eq!(memory.size(), 32);
    }

    #[test]
    fn reads_past_size_are_zero_padded() {
        let mut memory = Memory::default();
        memory.store(0, &[0xff]).unwrap();
        let bytes = memory.read(0, 4).unwrap();
        assert_eq!(bytes, vec![0xff, 0, 0, 0]);
    }

    #[test]
    fn extension_is_word_aligned_and_capped() {
        let mut memory = Memory::default();
        memory.extend(33, 1).unwrap();
        assert_eq!(memory.size(), 64);
        assert_eq!(
            memory.extend(MAX_MEMORY_BYTES, 1),
            Err(EvmError::MemoryLimit)
        );
    }
}
