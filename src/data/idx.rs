//! Reader for the IDX files MNIST ships in.
//!
//! ```text
//! images: magic 0x00000803 | count | rows | cols | count*rows*cols u8 pixels
//! labels: magic 0x00000801 | count | count u8 labels
//! ```
//!
//! All header fields are big-endian `u32`.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::core::Normalization;
use crate::prelude::*;

pub const IMAGES_MAGIC: u32 = 0x0000_0803;
pub const LABELS_MAGIC: u32 = 0x0000_0801;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSettings {
    /// Produce `(rows * cols) x 1` columns instead of `rows x cols` images.
    pub vectorize: bool,
    /// Scale pixels from [0, 255] to [0, 1].
    pub normalize: bool,
    /// Read at most this many items; `None` reads the whole file.
    pub max_items: Option<usize>,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            vectorize: true,
            normalize: true,
            max_items: None,
        }
    }
}

fn read_u32(bytes: &[u8], offset: usize, what: &str) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| {
            NNError::MalformedDataset(format!(
                "{} header truncated: {} bytes, need at least {}",
                what,
                bytes.len(),
                offset + 4
            ))
        })
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<()> {
    let found = read_u32(bytes, 0, "IDX")?;
    if found != expected {
        return Err(NNError::BadMagicNumber { expected, found });
    }
    Ok(())
}

/// Payload of `count` items of `item_len` bytes starting at `offset`.
fn payload<'a>(bytes: &'a [u8], offset: usize, count: usize, item_len: usize) -> Result<&'a [u8]> {
    let len = count
        .checked_mul(item_len)
        .ok_or_else(|| NNError::MalformedDataset("payload size overflows".to_string()))?;
    bytes.get(offset..offset + len).ok_or_else(|| {
        NNError::MalformedDataset(format!(
            "payload truncated: header declares {} items of {} bytes, file has {} bytes after the header",
            count,
            item_len,
            bytes.len().saturating_sub(offset)
        ))
    })
}

pub fn parse_images(bytes: &[u8], settings: LoadSettings) -> Result<Vec<Array2<f64>>> {
    check_magic(bytes, IMAGES_MAGIC)?;
    let declared = read_u32(bytes, 4, "image")? as usize;
    let rows = read_u32(bytes, 8, "image")? as usize;
    let cols = read_u32(bytes, 12, "image")? as usize;
    let count = settings.max_items.map_or(declared, |max| declared.min(max));
    let pixels = rows * cols;
    let data = payload(bytes, 16, count, pixels)?;
    debug!(count, rows, cols, "parsing IDX images");

    let shape = if settings.vectorize { (pixels, 1) } else { (rows, cols) };
    data.chunks_exact(pixels.max(1))
        .take(count)
        .map(|chunk| -> Result<Array2<f64>> {
            let mut image = Array2::from_shape_vec(shape, chunk.iter().map(|&p| f64::from(p)).collect())?;
            if settings.normalize {
                image.to_unity(0.0, 255.0);
            }
            Ok(image)
        })
        .collect()
}

pub fn parse_labels(bytes: &[u8], max_items: Option<usize>) -> Result<Vec<u8>> {
    check_magic(bytes, LABELS_MAGIC)?;
    let declared = read_u32(bytes, 4, "label")? as usize;
    let count = max_items.map_or(declared, |max| declared.min(max));
    Ok(payload(bytes, 8, count, 1)?.to_vec())
}

pub fn load_images<P: AsRef<Path>>(path: P, settings: LoadSettings) -> Result<Vec<Array2<f64>>> {
    parse_images(&fs::read(path)?, settings)
}

pub fn load_labels<P: AsRef<Path>>(path: P, max_items: Option<usize>) -> Result<Vec<u8>> {
    parse_labels(&fs::read(path)?, max_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_file(count: u32, rows: u32, cols: u32, pixels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [IMAGES_MAGIC, count, rows, cols] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(pixels);
        bytes
    }

    fn label_file(labels: &[u8]) -> Vec<u8> {
        let mut bytes = LABELS_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        bytes.extend_from_slice(labels);
        bytes
    }

    #[test]
    fn images_vectorized_and_normalized() {
        let bytes = image_file(2, 2, 3, &[0, 51, 255, 0, 0, 0, 1, 2, 3, 4, 5, 6]);
        let images = parse_images(&bytes, LoadSettings::default()).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].dim(), (6, 1));
        assert_eq!(images[0][[1, 0]], 0.2);
        assert_eq!(images[0][[2, 0]], 1.0);
    }

    #[test]
    fn images_keep_shape_without_vectorize() {
        let bytes = image_file(1, 2, 3, &[1, 2, 3, 4, 5, 6]);
        let settings = LoadSettings {
            vectorize: false,
            normalize: false,
            max_items: None,
        };
        let images = parse_images(&bytes, settings).unwrap();
        assert_eq!(images[0], array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn max_items_limits_the_read() {
        let bytes = image_file(3, 1, 2, &[1, 2, 3, 4, 5, 6]);
        let settings = LoadSettings {
            max_items: Some(2),
            ..Default::default()
        };
        assert_eq!(parse_images(&bytes, settings).unwrap().len(), 2);
        assert_eq!(parse_labels(&label_file(&[7, 2, 1]), Some(1)).unwrap(), vec![7]);
        assert_eq!(parse_labels(&label_file(&[7, 2, 1]), None).unwrap(), vec![7, 2, 1]);
    }

    #[test]
    fn bad_magic_is_reported() {
        let labels = label_file(&[1]);
        assert!(matches!(
            parse_images(&labels, LoadSettings::default()),
            Err(NNError::BadMagicNumber {
                expected: IMAGES_MAGIC,
                found: LABELS_MAGIC
            })
        ));
    }

    #[test]
    fn truncated_files_are_malformed() {
        let bytes = image_file(2, 2, 2, &[0, 1, 2, 3, 4]);
        assert!(matches!(
            parse_images(&bytes, LoadSettings::default()),
            Err(NNError::MalformedDataset(_))
        ));
        assert!(matches!(parse_labels(&[0, 0, 8], None), Err(NNError::MalformedDataset(_))));
        let mut labels = label_file(&[1, 2, 3]);
        labels.truncate(10);
        assert!(matches!(parse_labels(&labels, None), Err(NNError::MalformedDataset(_))));
    }

    #[test]
    fn loads_from_disk() {
        let path = std::env::temp_dir().join(format!("rfnn_labels_{}.idx", std::process::id()));
        std::fs::write(&path, label_file(&[3, 1, 4])).unwrap();
        let labels = load_labels(&path, None).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(labels, vec![3, 1, 4]);
    }
}
