//! The four image operations. Each one validates the header before it touches the payload, then
//! makes a single sequential pass over the input.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};
use tracing::{debug, info};

use super::checksum::{read_chunk, ChecksumReader, ChecksumWriter, CHUNK_SIZE};
use super::error::Result;
use super::header::{Header, CHECKSUM_SIZE};

/// Outcome of summing the protected region of an RTL image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub protected_size: u64,
    pub file_size: u64,
    /// Sum of every protected word. Zero for an intact image.
    pub residue: u16,
}

impl Verification {
    pub fn passed(&self) -> bool {
        self.residue == 0
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(f, "Checksum passed")
        } else {
            write!(f, "Checksum failed")
        }
    }
}

/// Outcome of generating a checksum for a plain SquashFS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generated {
    /// Value stored in the size field of the built image
    pub rtl_size: u32,
    /// Length of the complete RTL image, checksum word included
    pub image_size: u64,
    /// Bytes actually written to the output
    pub written: u64,
    pub checksum: u16,
}

impl fmt::Display for Generated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum {:#06x} ({} byte image)", self.checksum, self.image_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Verified(Verification),
    Generated(Generated),
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Verified(v) => v.fmt(f),
            Report::Generated(g) => g.fmt(f),
        }
    }
}

fn stream_len<S: Seek>(s: &mut S) -> io::Result<u64> {
    let len = s.seek(SeekFrom::End(0))?;
    s.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Parse and bound-check an RTL image header, leaving the reader at offset 0
fn open_rootfs<R: Read + Seek>(r: &mut R) -> Result<(u64, u64)> {
    let file_size = stream_len(r)?;
    let header = Header::read(r)?;
    header.validate()?;
    let protected_size = header.protected_size_within(file_size)?;
    debug!(rtl_size = header.rtl_size(), protected_size, file_size, "parsed rootfs header");
    if protected_size < file_size {
        info!(
            trailing = file_size - protected_size,
            "image has bytes past the protected region"
        );
    }
    r.seek(SeekFrom::Start(0))?;
    Ok((protected_size, file_size))
}

/// Sum the protected words of an image, copying them to `w` when extracting
fn verify_into<R, W>(r: &mut R, w: &mut W, extracting: bool) -> Result<Verification>
where R: Read + Seek, W: Write
{
    let (protected_size, file_size) = open_rootfs(r)?;

    // Only whole words are summed
    let words_len = protected_size & !1;
    // The checksum word is dropped only when it is the last thing in the file
    let copy_len = match extracting {
        false => 0,
        true if words_len == file_size => words_len - CHECKSUM_SIZE,
        true => words_len,
    };

    let mut reader = ChecksumReader::new(r.by_ref().take(words_len));
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let start = reader.position();
        let n = read_chunk(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if start < copy_len {
            let keep = (copy_len - start).min(n as u64) as usize;
            w.write_all(&buf[..keep])?;
        }
    }
    if reader.position() != words_len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "image ended inside the protected region",
        ).into());
    }

    let v = Verification { protected_size, file_size, residue: reader.checksum().sum() };
    if v.passed() {
        info!(protected_size, "checksum passed");
    } else {
        info!(protected_size, residue = v.residue, "checksum failed");
    }
    Ok(v)
}

/// Verify the checksum of an RTL rootfs image
pub fn check<R: Read + Seek>(r: &mut R) -> Result<Verification> {
    verify_into(r, &mut io::sink(), false)
}

/// Verify an RTL rootfs image and write out the SquashFS it carries, without the checksum word
pub fn extract<R, W>(r: &mut R, w: &mut W) -> Result<Verification>
where R: Read + Seek, W: Write
{
    verify_into(r, w, true)
}

/// Write a plain SquashFS through a checksum with its size field rewritten. The returned writer
/// has seen the whole payload except for any padding byte.
fn write_payload<R, W>(r: &mut R, w: W) -> Result<(ChecksumWriter<W>, Header)>
where R: Read + Seek, W: Write
{
    let file_size = stream_len(r)?;
    let mut header = Header::read(r)?;
    header.validate()?;
    let rtl_size = Header::rtl_size_for_image(file_size)?;
    debug!(mod_time = header.mod_time(), rtl_size, file_size, "rewriting squashfs size field");
    header.set_rtl_size(rtl_size);

    let mut writer = ChecksumWriter::new(w);
    header.write(&mut writer)?;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = read_chunk(r, &mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
    }
    Ok((writer, header))
}

/// Build an RTL rootfs image from a plain SquashFS
pub fn build<R, W>(r: &mut R, w: &mut W) -> Result<Generated>
where R: Read + Seek, W: Write
{
    let (writer, header) = write_payload(r, w)?;
    let (_, checksum) = writer.finish()?;

    let g = Generated {
        rtl_size: header.rtl_size(),
        image_size: header.protected_size(),
        written: header.protected_size(),
        checksum,
    };
    info!(image_size = g.image_size, checksum = g.checksum, "built rootfs image");
    Ok(g)
}

/// Compute the checksum an RTL image built from this SquashFS would carry, writing only the
/// checksum word
pub fn sum<R, W>(r: &mut R, w: &mut W) -> Result<Generated>
where R: Read + Seek, W: Write
{
    let (mut writer, header) = write_payload(r, io::sink())?;
    writer.pad_to_word()?;
    let checksum = writer.checksum().complement();
    w.write_u16::<BigEndian>(checksum)?;

    let g = Generated {
        rtl_size: header.rtl_size(),
        image_size: header.protected_size(),
        written: CHECKSUM_SIZE,
        checksum,
    };
    info!(image_size = g.image_size, checksum = g.checksum, "computed rootfs checksum");
    Ok(g)
}

/// One invocation of the tool over a pair of files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Check { image: PathBuf },
    Build { squashfs: PathBuf, rootfs: PathBuf },
    Sum { squashfs: PathBuf, checksum: PathBuf },
    Extract { image: PathBuf, squashfs: PathBuf },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Check { .. } => "check",
            Operation::Build { .. } => "build",
            Operation::Sum { .. } => "sum",
            Operation::Extract { .. } => "extract",
        }
    }

    pub fn input(&self) -> &Path {
        match self {
            Operation::Check { image } => image,
            Operation::Build { squashfs, .. } => squashfs,
            Operation::Sum { squashfs, .. } => squashfs,
            Operation::Extract { image, .. } => image,
        }
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            Operation::Check { .. } => None,
            Operation::Build { rootfs, .. } => Some(rootfs),
            Operation::Sum { checksum, .. } => Some(checksum),
            Operation::Extract { squashfs, .. } => Some(squashfs),
        }
    }

    /// Open the files and run the operation. Files are closed on every return path.
    pub fn run(&self) -> Result<Report> {
        debug!(op = self.name(), input = %self.input().display(), "running");
        let mut r = BufReader::new(File::open(self.input())?);

        let report = match self {
            Operation::Check { .. } => Report::Verified(check(&mut r)?),
            Operation::Extract { squashfs, .. } => {
                let mut w = create(squashfs)?;
                let v = extract(&mut r, &mut w)?;
                w.flush()?;
                Report::Verified(v)
            }
            Operation::Build { rootfs, .. } => {
                let mut w = create(rootfs)?;
                let g = build(&mut r, &mut w)?;
                w.flush()?;
                Report::Generated(g)
            }
            Operation::Sum { checksum, .. } => {
                let mut w = create(checksum)?;
                let g = sum(&mut r, &mut w)?;
                w.flush()?;
                Report::Generated(g)
            }
        };
        Ok(report)
    }
}

fn create(path: &Path) -> io::Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}
