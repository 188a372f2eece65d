use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};

use super::error::FormatError;

/// SquashFS magic as it appears when the superblock is read big-endian
pub const MAGIC: u32 = 0x68737173;

/// Size of a SquashFS superblock. The RTL size field counts the bytes after it.
pub const SUPERBLOCK_SIZE: u64 = 640;

/// Length of the trailing checksum word
pub const CHECKSUM_SIZE: u64 = 2;

/// Length of the superblock prefix this crate reads and writes: five u32 fields and a u16
pub const HEADER_SIZE: usize = 22;

/// The leading fields of a SquashFS superblock, read big-endian the way RTL firmware does.
///
/// Only `magic` and the size field mean anything to the checksum scheme. The rest are carried
/// through untouched so a header can be written back byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub inode_count: u32,
    size_field: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: u16,
}

impl Header {
    /// Read the raw header without validating anything
    pub fn read<R>(r: &mut R) -> io::Result<Header>
    where R: Read
    {
        Ok(Header {
            magic: r.read_u32::<BigEndian>()?,
            inode_count: r.read_u32::<BigEndian>()?,
            size_field: r.read_u32::<BigEndian>()?,
            block_size: r.read_u32::<BigEndian>()?,
            frag_count: r.read_u32::<BigEndian>()?,
            compressor: r.read_u16::<BigEndian>()?,
        })
    }

    pub fn from_bytes(b: &[u8]) -> io::Result<Header> {
        Header::read(&mut &b[..])
    }

    pub fn write<W>(&self, w: &mut W) -> io::Result<()>
    where W: Write
    {
        w.write_all(&self.to_bytes())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        BigEndian::write_u32(&mut b[0..4], self.magic);
        BigEndian::write_u32(&mut b[4..8], self.inode_count);
        BigEndian::write_u32(&mut b[8..12], self.size_field);
        BigEndian::write_u32(&mut b[12..16], self.block_size);
        BigEndian::write_u32(&mut b[16..20], self.frag_count);
        BigEndian::write_u16(&mut b[20..22], self.compressor);
        b
    }

    pub fn validate(&self) -> Result<(), FormatError> {
        if self.magic != MAGIC {
            return Err(FormatError::BadMagic(self.magic));
        }
        Ok(())
    }

    /// The size field under its standard SquashFS meaning
    pub fn mod_time(&self) -> u32 {
        self.size_field
    }

    /// The size field under its RTL meaning: bytes protected beyond the superblock
    pub fn rtl_size(&self) -> u32 {
        self.size_field
    }

    pub fn set_rtl_size(&mut self, size: u32) {
        self.size_field = size;
    }

    /// Number of bytes from offset 0 covered by the checksum, including the checksum word
    pub fn protected_size(&self) -> u64 {
        self.rtl_size() as u64 + SUPERBLOCK_SIZE + CHECKSUM_SIZE
    }

    /// Check the protected region fits in a file of `file_size` bytes and return its length
    pub fn protected_size_within(&self, file_size: u64) -> Result<u64, FormatError> {
        let protected_size = self.protected_size();
        if protected_size > file_size {
            return Err(FormatError::NotRtl { protected_size, file_size });
        }
        Ok(protected_size)
    }

    /// The RTL size field value for a plain SquashFS image of `image_len` bytes.
    ///
    /// The image gets padded to an even length when it is built, so the size is rounded up.
    pub fn rtl_size_for_image(image_len: u64) -> Result<u32, FormatError> {
        if image_len < SUPERBLOCK_SIZE {
            return Err(FormatError::TooSmall { size: image_len, min: SUPERBLOCK_SIZE });
        }
        let size = image_len - SUPERBLOCK_SIZE;
        let size = size + (size % 2);
        u32::try_from(size).map_err(|_| FormatError::TooLarge { size: image_len })
    }
}
