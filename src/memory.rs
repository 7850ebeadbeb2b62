use anyhow::{anyhow, Result};
use tracing::warn;

use crate::Word;

pub const MBASE: Word = 0x8000_0000;
pub const MSIZE: usize = 0x800_0000;

pub trait MemorySource {
    // Read "len" bytes (at most 4) as a little-endian word. There is no failure path at this boundary.
    fn read_memory(&self, address: Word, len: usize) -> Word;
}

/// Physical memory of the simulated machine, mapped at `base`.
pub struct GuestMemory {
    base: Word,
    data: Vec<u8>,
}

impl GuestMemory {
    pub fn new(base: Word, size: usize) -> GuestMemory {
        GuestMemory { base, data: vec![0; size] }
    }

    pub fn base(&self) -> Word {
        self.base
    }

    fn offset_of(&self, address: Word, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        if offset.checked_add(len)? <= self.data.len() {
            Some(offset)
        } else {
            None
        }
    }

    pub fn load_image(&mut self, image: &[u8]) -> Result<()> {
        if image.len() > self.data.len() {
            return Err(anyhow!(
                "Image is {} bytes but memory is only {} bytes",
                image.len(),
                self.data.len()
            ));
        }
        self.data[..image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn read(&self, address: Word, len: usize) -> Result<Word> {
        if !matches!(len, 1 | 2 | 4) {
            return Err(anyhow!("Unsupported access width {}", len));
        }
        let offset = self
            .offset_of(address, len)
            .ok_or(anyhow!("Address {:#010x} is out of bound of pmem", address))?;
        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(Word::from_le_bytes(bytes))
    }

    pub fn write(&mut self, address: Word, len: usize, value: Word) -> Result<()> {
        if !matches!(len, 1 | 2 | 4) {
            return Err(anyhow!("Unsupported access width {}", len));
        }
        let offset = self
            .offset_of(address, len)
            .ok_or(anyhow!("Address {:#010x} is out of bound of pmem", address))?;
        self.data[offset..offset + len].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    pub fn display_words(&self, address: Word, count: usize) {
        let mut addr = address;
        for i in 0..count {
            if i % 4 == 0 {
                print!("{:#010x}: ", addr);
            }
            match self.read(addr, 4) {
                Ok(word) => print!("{:#010x} ", word),
                Err(_) => print!("?????????? "),
            }
            if i % 4 == 3 {
                println!();
            }
            addr = addr.wrapping_add(4);
        }
        if count % 4 != 0 {
            println!();
        }
    }
}

impl MemorySource for GuestMemory {
    fn read_memory(&self, address: Word, len: usize) -> Word {
        match self.read(address, len) {
            Ok(value) => value,
            Err(e) => {
                warn!("{}", e);
                0
            }
        }
    }
}
