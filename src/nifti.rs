//! Minimal NIfTI header reader.
//!
//! Only the `dim` field is read; it gives the number of volumes of a BOLD
//! series, which is the events `duration`.
use anyhow::{anyhow, Context, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const NIFTI1_HEADER: usize = 348;
const NIFTI2_HEADER: usize = 540;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut header = Vec::with_capacity(NIFTI2_HEADER);
    (&mut reader)
        .take(NIFTI2_HEADER as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("read header {}", path.display()))?;
    Ok(header)
}

fn i32_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<i32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => i32::from_le_bytes(raw),
        Endian::Big => i32::from_be_bytes(raw),
    })
}

fn i16_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<i64> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(i64::from(match endian {
        Endian::Little => i16::from_le_bytes(raw),
        Endian::Big => i16::from_be_bytes(raw),
    }))
}

fn i64_at(bytes: &[u8], offset: usize, endian: Endian) -> Option<i64> {
    let raw: [u8; 8] = bytes.get(offset..offset + 8)?.try_into().ok()?;
    Some(match endian {
        Endian::Little => i64::from_le_bytes(raw),
        Endian::Big => i64::from_be_bytes(raw),
    })
}

/// `dim[1..=7]` extents from a raw header.
fn dims(header: &[u8]) -> Result<Vec<i64>> {
    let (version, endian) = [Endian::Little, Endian::Big]
        .into_iter()
        .find_map(|endian| match i32_at(header, 0, endian)? {
            348 => Some((1, endian)),
            540 => Some((2, endian)),
            _ => None,
        })
        .ok_or_else(|| anyhow!("not a NIfTI header (bad sizeof_hdr)"))?;
    let needed = if version == 1 { NIFTI1_HEADER } else { NIFTI2_HEADER };
    if header.len() < needed {
        return Err(anyhow!("truncated NIfTI-{version} header ({} bytes)", header.len()));
    }
    let read = |idx: usize| match version {
        1 => i16_at(header, 40 + idx * 2, endian),
        _ => i64_at(header, 16 + idx * 8, endian),
    };
    let rank = read(0).ok_or_else(|| anyhow!("missing dim[0]"))?;
    if !(1..=7).contains(&rank) {
        return Err(anyhow!("invalid dim[0] = {rank}"));
    }
    (1..=rank as usize)
        .map(|idx| read(idx).ok_or_else(|| anyhow!("missing dim[{idx}]")))
        .collect()
}

/// Extent of the last used dimension (`dim[dim[0]]`): the volume count of a
/// 4D series, or the slice count of a 3D image.
pub fn volume_count(path: &Path) -> Result<u64> {
    let header = read_header(path)?;
    let dims = dims(&header).with_context(|| format!("parse header {}", path.display()))?;
    let last = dims.last().copied().unwrap_or(0);
    u64::try_from(last).map_err(|_| anyhow!("negative extent {last} in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn nifti1_header(dims: &[i16], big_endian: bool) -> Vec<u8> {
        let mut header = vec![0u8; NIFTI1_HEADER];
        let sizeof = if big_endian {
            348i32.to_be_bytes()
        } else {
            348i32.to_le_bytes()
        };
        header[..4].copy_from_slice(&sizeof);
        let mut all = vec![dims.len() as i16];
        all.extend_from_slice(dims);
        for (idx, value) in all.iter().enumerate() {
            let bytes = if big_endian {
                value.to_be_bytes()
            } else {
                value.to_le_bytes()
            };
            header[40 + idx * 2..42 + idx * 2].copy_from_slice(&bytes);
        }
        header
    }

    fn nifti2_header(dims: &[i64]) -> Vec<u8> {
        let mut header = vec![0u8; NIFTI2_HEADER];
        header[..4].copy_from_slice(&540i32.to_le_bytes());
        let mut all = vec![dims.len() as i64];
        all.extend_from_slice(dims);
        for (idx, value) in all.iter().enumerate() {
            header[16 + idx * 8..24 + idx * 8].copy_from_slice(&value.to_le_bytes());
        }
        header
    }

    #[test]
    fn reads_volume_count_from_gzipped_nifti1() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sub-10001_ses-V1_task-cuff_run-01_bold.nii.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&nifti1_header(&[64, 64, 40, 450], false))
            .expect("encode");
        encoder.write_all(&[0u8; 16]).expect("encode data");
        std::fs::write(&path, encoder.finish().expect("finish")).expect("write");

        assert_eq!(volume_count(&path).expect("volumes"), 450);
    }

    #[test]
    fn reads_big_endian_plain_nifti1() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bold.nii");
        std::fs::write(&path, nifti1_header(&[10, 10, 10, 12], true)).expect("write");

        assert_eq!(volume_count(&path).expect("volumes"), 12);
    }

    #[test]
    fn reads_nifti2_headers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bold.nii");
        std::fs::write(&path, nifti2_header(&[10, 10, 10, 300])).expect("write");

        assert_eq!(volume_count(&path).expect("volumes"), 300);
    }

    #[test]
    fn three_dimensional_image_reports_last_extent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("T1w.nii");
        std::fs::write(&path, nifti1_header(&[176, 256, 192], false)).expect("write");

        assert_eq!(volume_count(&path).expect("volumes"), 192);
    }

    #[test]
    fn rejects_non_nifti_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("notes.nii");
        std::fs::write(&path, b"definitely not an image").expect("write");

        assert!(volume_count(&path).is_err());
    }
}
