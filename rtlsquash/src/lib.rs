//! Rtlsquash handles the ***RTL*** flavour of ***Squash***FS rootfs images found in Realtek-based
//! router firmware. The vendor repurposes the superblock modification time as the length of a
//! checksum-protected region and appends a 16-bit big-endian word-sum checksum after it.
//!
//! The library can verify an image, build one from a plain SquashFS, compute only the checksum
//! word, and extract the plain SquashFS back out of a flash image.
//!
//! ## Usage Example
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use rtlsquash::rootfs;
//!
//! fn verify_rootfs() -> rootfs::Result<()> {
//!     let mut f = BufReader::new(File::open("rootfs.bin")?);
//!     let report = rootfs::check(&mut f)?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

pub mod rootfs;
