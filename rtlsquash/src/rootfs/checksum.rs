//! The RTL checksum: an unsigned sum of big-endian 16-bit words, wrapping at 16 bits.
//!
//! A valid image sums to zero over its protected region. The stored checksum word is the
//! two's complement of the sum of everything before it.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder};

/// Chunk size used when streaming images through the checksum
pub const CHUNK_SIZE: usize = 1024;

/// The word that makes `sum` add up to zero
pub fn complement(sum: u16) -> u16 {
    0u16.wrapping_sub(sum)
}

/// Running word-sum over a stream of bytes fed in arbitrary pieces.
///
/// A word split between two calls to [`WordSum::push`] is held back until its second byte
/// arrives. A byte still pending at the end is summed as if followed by a zero byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordSum {
    acc: u16,
    pending: Option<u8>,
}

impl WordSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(buf: &[u8]) -> Self {
        let mut s = Self::new();
        s.push(buf);
        s
    }

    pub fn push(&mut self, mut buf: &[u8]) {
        if let Some(hi) = self.pending.take() {
            match buf.split_first() {
                Some((&lo, rest)) => {
                    self.push_word(u16::from_be_bytes([hi, lo]));
                    buf = rest;
                }
                None => {
                    self.pending = Some(hi);
                    return;
                }
            }
        }

        let mut words = buf.chunks_exact(2);
        for w in &mut words {
            self.push_word(BigEndian::read_u16(w));
        }
        if let [b] = words.remainder() {
            self.pending = Some(*b);
        }
    }

    pub fn push_word(&mut self, word: u16) {
        self.acc = self.acc.wrapping_add(word);
    }

    /// Current sum, padding a pending odd byte with zero
    pub fn sum(&self) -> u16 {
        match self.pending {
            Some(hi) => self.acc.wrapping_add(u16::from_be_bytes([hi, 0])),
            None => self.acc,
        }
    }

    /// The checksum word to append after the bytes summed so far
    pub fn complement(&self) -> u16 {
        complement(self.sum())
    }

    pub fn is_zero(&self) -> bool {
        self.sum() == 0
    }

    /// True when an odd number of bytes has been pushed
    pub fn is_odd(&self) -> bool {
        self.pending.is_some()
    }
}

/// Fill `buf` from `r`, stopping early only at end of input
pub(crate) fn read_chunk<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sums every byte read through it
#[derive(Debug)]
pub struct ChecksumReader<R> {
    inner: R,
    sum: WordSum,
    pos: u64,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, sum: WordSum::new(), pos: 0 }
    }

    pub fn checksum(&self) -> WordSum {
        self.sum
    }

    /// Number of bytes read so far
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.inner.read(buf)?;
        self.sum.push(&buf[..size]);
        self.pos += size as u64;
        Ok(size)
    }
}

/// Sums every byte written through it
#[derive(Debug)]
pub struct ChecksumWriter<W> {
    inner: W,
    sum: WordSum,
    pos: u64,
}

impl<W: Write> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, sum: WordSum::new(), pos: 0 }
    }

    pub fn checksum(&self) -> WordSum {
        self.sum
    }

    /// Number of bytes written so far
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Write a zero byte if needed so the output ends on a word boundary
    pub fn pad_to_word(&mut self) -> io::Result<()> {
        if self.sum.is_odd() {
            self.write_all(&[0])?;
        }
        Ok(())
    }

    /// Append the checksum word, bypassing the sum, and hand back the inner writer
    pub fn finish(mut self) -> io::Result<(W, u16)> {
        self.pad_to_word()?;
        let checksum = self.sum.complement();
        let mut word = [0u8; 2];
        BigEndian::write_u16(&mut word, checksum);
        self.inner.write_all(&word)?;
        Ok((self.inner, checksum))
    }
}

impl<W: Write> Write for ChecksumWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let size = self.inner.write(buf)?;
        self.sum.push(&buf[..size]);
        self.pos += size as u64;
        Ok(size)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
