use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rtlsquash::rootfs::{self, Error, FormatError, Header, WordSum, MAGIC};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A plain SquashFS-looking image: real magic, a timestamp, then noise
fn squashfs_image(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    let mut data: Vec<u8> = (0..len)
        .map(|_| {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            (state >> 16) as u8
        })
        .collect();
    data[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    data[8..12].copy_from_slice(&0x6543_2100u32.to_be_bytes());
    data
}

fn build(squashfs: &[u8]) -> rootfs::Result<Vec<u8>> {
    let mut out = Vec::new();
    rootfs::build(&mut Cursor::new(squashfs), &mut out)?;
    Ok(out)
}

fn extract(image: &[u8]) -> rootfs::Result<(Vec<u8>, rootfs::Verification)> {
    let mut out = Vec::new();
    let v = rootfs::extract(&mut Cursor::new(image), &mut out)?;
    Ok((out, v))
}

fn check(image: &[u8]) -> rootfs::Result<rootfs::Verification> {
    rootfs::check(&mut Cursor::new(image))
}

fn format_error<T: std::fmt::Debug>(r: rootfs::Result<T>) -> FormatError {
    match r {
        Err(Error::Format(e)) => e,
        other => panic!("expected a format error, got {:?}", other),
    }
}

#[test]
fn test_zero_image_with_magic() -> anyhow::Result<()> {
    let mut image = vec![0u8; 4096];
    image[0..4].copy_from_slice(&[0x68, 0x73, 0x71, 0x73]);

    let v = check(&image)?;
    assert_eq!(v.protected_size, 642);
    assert_eq!(v.file_size, 4096);
    // The magic words are the only non-zero part of the region
    assert_eq!(v.residue, 0x6873u16.wrapping_add(0x7173));
    assert_eq!(v.to_string(), "Checksum failed");

    // Storing the complement in the checksum slot makes it pass
    let word = rootfs::complement(v.residue);
    image[640..642].copy_from_slice(&word.to_be_bytes());
    let v = check(&image)?;
    assert_eq!(v.residue, 0);
    assert_eq!(v.to_string(), "Checksum passed");
    Ok(())
}

#[test]
fn test_build_zero_image() -> anyhow::Result<()> {
    let mut squashfs = vec![0u8; 1282];
    squashfs[0..4].copy_from_slice(&MAGIC.to_be_bytes());

    let mut image = Vec::new();
    let g = rootfs::build(&mut Cursor::new(&squashfs), &mut image)?;
    assert_eq!(g.rtl_size, 642);
    assert_eq!(g.image_size, 1284);
    assert_eq!(g.written, 1284);
    assert_eq!(image.len(), 1284);

    let header = Header::from_bytes(&image)?;
    assert_eq!(header.rtl_size(), 642);
    assert_eq!(&image[12..1282], &squashfs[12..]);

    let payload_sum = WordSum::of(&image[..1282]).sum();
    assert_eq!(payload_sum.wrapping_add(g.checksum), 0);
    assert_eq!(&image[1282..], &g.checksum.to_be_bytes());
    assert!(check(&image)?.passed());
    Ok(())
}

#[test]
fn test_round_trip() -> anyhow::Result<()> {
    for (len, seed) in [(640, 1), (641, 2), (1024, 3), (4097, 4), (65536 + 17, 5), (200_001, 6)] {
        let squashfs = squashfs_image(len, seed);
        let image = build(&squashfs)?;
        assert_eq!(image.len(), len + len % 2 + 2, "len {}", len);
        // Only the size field differs from the input
        assert_eq!(&image[..8], &squashfs[..8]);
        assert_eq!(&image[12..len], &squashfs[12..], "len {}", len);

        let v = check(&image)?;
        assert!(v.passed(), "len {}", len);
        assert_eq!(v.protected_size, image.len() as u64);
    }
    Ok(())
}

#[test]
fn test_odd_image_is_padded() -> anyhow::Result<()> {
    let squashfs = squashfs_image(1001, 9);
    let image = build(&squashfs)?;
    assert_eq!(image.len(), 1004);
    assert_eq!(image[1001], 0);
    assert_eq!(Header::from_bytes(&image)?.rtl_size(), 362);
    Ok(())
}

#[test]
fn test_check_is_repeatable() -> anyhow::Result<()> {
    let mut image = build(&squashfs_image(3000, 7))?;
    assert_eq!(check(&image)?, check(&image)?);

    image[2000] ^= 0x40;
    let first = check(&image)?;
    assert!(!first.passed());
    assert_eq!(first, check(&image)?);
    Ok(())
}

#[test]
fn test_corruption_detected() -> anyhow::Result<()> {
    let image = build(&squashfs_image(5000, 11))?;
    for offset in [4, 14, 700, 4999, 5001] {
        let mut bad = image.clone();
        bad[offset] = bad[offset].wrapping_add(1);
        assert!(!check(&bad)?.passed(), "offset {}", offset);
    }
    Ok(())
}

#[test]
fn test_bound_rejection() -> anyhow::Result<()> {
    let mut image = build(&squashfs_image(2000, 13))?;
    image[8..12].copy_from_slice(&(2000u32 - 640 + 2).to_be_bytes());

    let expected = FormatError::NotRtl { protected_size: 2004, file_size: 2002 };
    assert_eq!(format_error(check(&image)), expected);

    let mut out = Vec::new();
    let err = rootfs::extract(&mut Cursor::new(&image), &mut out);
    assert_eq!(format_error(err), expected);
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn test_magic_rejection() -> anyhow::Result<()> {
    let squashfs = squashfs_image(4000, 17);
    let mut image = build(&squashfs)?;
    image[1] = 0x00;
    let mut squashfs = squashfs;
    squashfs[3] = 0x00;

    assert_eq!(format_error(check(&image)), FormatError::BadMagic(0x68007173));

    let mut out = Vec::new();
    let err = rootfs::extract(&mut Cursor::new(&image), &mut out);
    assert_eq!(format_error(err), FormatError::BadMagic(0x68007173));
    assert!(out.is_empty());

    let err = rootfs::build(&mut Cursor::new(&squashfs), &mut out);
    assert_eq!(format_error(err), FormatError::BadMagic(0x68737100));
    assert!(out.is_empty());

    let err = rootfs::sum(&mut Cursor::new(&squashfs), &mut out);
    assert_eq!(format_error(err), FormatError::BadMagic(0x68737100));
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn test_build_too_small() {
    let squashfs = squashfs_image(639, 19);
    let mut out = Vec::new();
    let err = rootfs::build(&mut Cursor::new(&squashfs), &mut out);
    assert_eq!(format_error(err), FormatError::TooSmall { size: 639, min: 640 });
    assert!(out.is_empty());
}

#[test]
fn test_short_input_is_io_error() {
    let err = check(&[0x68, 0x73, 0x71]).unwrap_err();
    match err {
        Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_extract_strips_checksum() -> anyhow::Result<()> {
    let squashfs = squashfs_image(9000, 23);
    let image = build(&squashfs)?;

    let (extracted, v) = extract(&image)?;
    assert!(v.passed());
    assert_eq!(extracted.len() as u64, v.protected_size - 2);
    assert_eq!(&extracted[..], &image[..image.len() - 2]);

    // The extracted SquashFS rebuilds into the same image
    assert_eq!(build(&extracted)?, image);
    Ok(())
}

#[test]
fn test_extract_reports_failure() -> anyhow::Result<()> {
    let mut image = build(&squashfs_image(3000, 29))?;
    image[1500] ^= 0xff;
    let (extracted, v) = extract(&image)?;
    assert!(!v.passed());
    assert_eq!(v.to_string(), "Checksum failed");
    assert_eq!(&extracted[..], &image[..image.len() - 2]);
    Ok(())
}

#[test]
fn test_extract_with_trailing_bytes() -> anyhow::Result<()> {
    let image = build(&squashfs_image(3000, 31))?;
    let mut padded = image.clone();
    padded.extend_from_slice(&[0xff; 64]);

    let v = check(&padded)?;
    assert!(v.passed());
    assert_eq!(v.protected_size, image.len() as u64);
    assert_eq!(v.file_size, padded.len() as u64);

    // Everything summed is written, the checksum word included; the padding is not
    let (extracted, v) = extract(&padded)?;
    assert!(v.passed());
    assert_eq!(extracted, image);
    Ok(())
}

#[test]
fn test_odd_protected_size() -> anyhow::Result<()> {
    let mut image = vec![0u8; 643];
    image[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    image[8..12].copy_from_slice(&1u32.to_be_bytes());
    let word = rootfs::complement(WordSum::of(&image[..640]).sum());
    image[640..642].copy_from_slice(&word.to_be_bytes());
    // The dangling last byte is outside every whole word
    image[642] = 0x55;

    let v = check(&image)?;
    assert_eq!(v.protected_size, 643);
    assert!(v.passed());

    let (extracted, _) = extract(&image)?;
    assert_eq!(extracted, &image[..642]);
    Ok(())
}

#[test]
fn test_sum_matches_build() -> anyhow::Result<()> {
    for (len, seed) in [(640, 37), (2049, 41), (70000, 43)] {
        let squashfs = squashfs_image(len, seed);
        let image = build(&squashfs)?;

        let mut out = Vec::new();
        let g = rootfs::sum(&mut Cursor::new(&squashfs), &mut out)?;
        assert_eq!(out.len(), 2);
        assert_eq!(g.written, 2);
        assert_eq!(g.image_size, image.len() as u64);
        assert_eq!(&out[..], &image[image.len() - 2..]);
        assert_eq!(out, g.checksum.to_be_bytes());
    }
    Ok(())
}

/// Counts events at WARN or above
struct WarnCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() <= Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_results_not_logged_as_warnings() -> anyhow::Result<()> {
    let mut image = build(&squashfs_image(3000, 47))?;
    image[2000] ^= 0x10;
    image.extend_from_slice(&[0xff; 128]);

    let warnings = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
    let (v, extracted) = tracing::subscriber::with_default(subscriber, || {
        let v = check(&image)?;
        let (extracted, _) = extract(&image)?;
        Ok::<_, Error>((v, extracted))
    })?;

    assert!(!v.passed());
    assert!(v.protected_size < v.file_size);
    assert_eq!(extracted.len() as u64, v.protected_size);
    assert_eq!(warnings.load(Ordering::SeqCst), 0);
    Ok(())
}
