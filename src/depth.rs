//! Binary depth map reader.
//!
//! The dense stereo stage stores one depth map per image: an ASCII header
//! `"{width}&{height}&{channels}&"` followed by a row-major grid of
//! little-endian `f32` samples. Decoded dimensions must match the expected
//! resolution exactly; proceeding with mismatched dimensions would corrupt
//! every downstream back-projection, so a mismatch is a hard failure.
//!
//! Depth maps from patch-match stereo have holes, and printed targets are a
//! common failure surface for the matcher. [`DepthMap::sample`] therefore
//! falls back to the median of the valid samples in a local window before
//! giving up on a pixel.

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Errors from depth map decoding and sampling.
#[derive(Error, Debug)]
pub enum DepthError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid depth map header: {message}")]
    Header { message: String },

    #[error("depth map is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: usize,
        expected_height: usize,
        actual_width: usize,
        actual_height: usize,
    },

    #[error("depth map data truncated: header promises {expected} samples, file holds {actual}")]
    TruncatedData { expected: usize, actual: usize },

    #[error("no valid depth in the neighborhood of pixel ({u}, {v})")]
    NoValidDepth { u: usize, v: usize },
}

/// A single image's depth grid.
#[derive(Debug, Clone)]
pub struct DepthMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DepthMap {
    /// Decode a depth map file and validate its dimensions.
    pub fn load(path: &Path, expected: (usize, usize)) -> Result<Self, DepthError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::decode(&mmap, expected)
    }

    /// Decode from raw bytes: ASCII `w&h&c&` header, then `w*h*c` LE floats.
    fn decode(bytes: &[u8], expected: (usize, usize)) -> Result<Self, DepthError> {
        let (dims, data_offset) = parse_header(bytes)?;
        let (width, height, channels) = dims;

        if channels != 1 {
            return Err(DepthError::Header {
                message: format!("expected a single-channel grid, found {channels} channels"),
            });
        }
        if (width, height) != expected {
            return Err(DepthError::DimensionMismatch {
                expected_width: expected.0,
                expected_height: expected.1,
                actual_width: width,
                actual_height: height,
            });
        }

        let payload = &bytes[data_offset..];
        let wanted = width * height;
        if payload.len() < wanted * 4 {
            return Err(DepthError::TruncatedData {
                expected: wanted,
                actual: payload.len() / 4,
            });
        }

        let mut data = vec![0.0f32; wanted];
        LittleEndian::read_f32_into(&payload[..wanted * 4], &mut data);

        Ok(DepthMap {
            width,
            height,
            data,
        })
    }

    /// Build a depth map from an in-memory grid (synthetic data in tests,
    /// callers that already decoded elsewhere).
    pub fn from_grid(width: usize, height: usize, data: Vec<f32>) -> Result<Self, DepthError> {
        if data.len() != width * height {
            return Err(DepthError::TruncatedData {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(DepthMap {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw sample without validity fallback. `None` outside the grid.
    pub fn get(&self, u: usize, v: usize) -> Option<f32> {
        if u < self.width && v < self.height {
            Some(self.data[v * self.width + u])
        } else {
            None
        }
    }

    /// Depth at a sub-pixel detection centroid.
    ///
    /// Returns the stored sample at the rounded pixel when it is finite and
    /// positive. Otherwise searches an odd `window`×`window` neighborhood
    /// (clamped at the image border) and returns the median of the valid
    /// samples found there; [`DepthError::NoValidDepth`] when the entire
    /// window is invalid.
    pub fn sample(&self, u: f64, v: f64, window: usize) -> Result<f64, DepthError> {
        debug_assert!(window % 2 == 1, "window size must be odd");

        let ui = u.round();
        let vi = v.round();
        if ui < 0.0 || vi < 0.0 || ui as usize >= self.width || vi as usize >= self.height {
            return Err(DepthError::NoValidDepth {
                u: ui.max(0.0) as usize,
                v: vi.max(0.0) as usize,
            });
        }
        let (ui, vi) = (ui as usize, vi as usize);

        let direct = self.data[vi * self.width + ui];
        if is_valid(direct) {
            return Ok(direct as f64);
        }

        let half = window / 2;
        let u_min = ui.saturating_sub(half);
        let v_min = vi.saturating_sub(half);
        let u_max = (ui + half).min(self.width - 1);
        let v_max = (vi + half).min(self.height - 1);

        let mut neighborhood = Vec::with_capacity(window * window);
        for y in v_min..=v_max {
            for x in u_min..=u_max {
                let d = self.data[y * self.width + x];
                if is_valid(d) {
                    neighborhood.push(d as f64);
                }
            }
        }

        if neighborhood.is_empty() {
            return Err(DepthError::NoValidDepth { u: ui, v: vi });
        }
        Ok(median(&mut neighborhood))
    }
}

fn is_valid(depth: f32) -> bool {
    depth.is_finite() && depth > 0.0
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).expect("median input is finite"));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Parse `"{w}&{h}&{c}&"` and return the dimensions and the payload offset.
fn parse_header(bytes: &[u8]) -> Result<((usize, usize, usize), usize), DepthError> {
    let mut fields = [0usize; 3];
    let mut field_idx = 0;
    let mut value: usize = 0;
    let mut digits = 0;

    for (pos, &b) in bytes.iter().enumerate() {
        match b {
            b'0'..=b'9' => {
                // Ten digits bound any sane dimension and cannot overflow.
                if digits == 10 {
                    return Err(DepthError::Header {
                        message: "header field too long".to_string(),
                    });
                }
                value = value * 10 + (b - b'0') as usize;
                digits += 1;
            }
            b'&' => {
                if digits == 0 {
                    return Err(DepthError::Header {
                        message: "empty header field".to_string(),
                    });
                }
                fields[field_idx] = value;
                field_idx += 1;
                value = 0;
                digits = 0;
                if field_idx == 3 {
                    return Ok(((fields[0], fields[1], fields[2]), pos + 1));
                }
            }
            _ => {
                return Err(DepthError::Header {
                    message: format!("unexpected byte 0x{b:02x} in header"),
                });
            }
        }
    }

    Err(DepthError::Header {
        message: "truncated header".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    fn encode(width: usize, height: usize, channels: usize, samples: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        write!(bytes, "{width}&{height}&{channels}&").unwrap();
        for &s in samples {
            bytes.write_f32::<LittleEndian>(s).unwrap();
        }
        bytes
    }

    #[test]
    fn test_decode_valid_map() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let bytes = encode(3, 2, 1, &samples);
        let map = DepthMap::decode(&bytes, (3, 2)).unwrap();

        assert_eq!(map.width(), 3);
        assert_eq!(map.height(), 2);
        assert_eq!(map.get(2, 1), Some(6.0));
        assert_eq!(map.get(3, 0), None);
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let bytes = encode(3, 2, 1, &[0.0; 6]);
        let result = DepthMap::decode(&bytes, (640, 480));
        assert!(matches!(
            result,
            Err(DepthError::DimensionMismatch {
                actual_width: 3,
                actual_height: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_multichannel_rejected() {
        let bytes = encode(2, 2, 3, &[0.0; 12]);
        assert!(matches!(
            DepthMap::decode(&bytes, (2, 2)),
            Err(DepthError::Header { .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = encode(3, 2, 1, &[1.0; 6]);
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(
            DepthMap::decode(&bytes, (3, 2)),
            Err(DepthError::TruncatedData { expected: 6, .. })
        ));
    }

    #[test]
    fn test_sample_direct_hit() {
        let map = DepthMap::from_grid(3, 3, vec![5.0; 9]).unwrap();
        assert_eq!(map.sample(1.2, 0.8, 7).unwrap(), 5.0);
    }

    #[test]
    fn test_sample_falls_back_to_window_median() {
        // Center pixel is a stereo hole; neighbors carry 1, 2, 3, 100.
        let data = vec![
            0.0, 1.0, 0.0, //
            2.0, 0.0, 3.0, //
            0.0, 100.0, 0.0,
        ];
        let map = DepthMap::from_grid(3, 3, data).unwrap();
        let d = map.sample(1.0, 1.0, 3).unwrap();
        assert_eq!(d, 2.5); // median of [1, 2, 3, 100]
    }

    #[test]
    fn test_sample_rejects_nan_and_negative() {
        let data = vec![
            f32::NAN,
            -1.0,
            f32::INFINITY,
            0.0,
            -0.5,
            f32::NEG_INFINITY,
            0.0,
            0.0,
            0.0,
        ];
        let map = DepthMap::from_grid(3, 3, data).unwrap();
        assert!(matches!(
            map.sample(1.0, 1.0, 3),
            Err(DepthError::NoValidDepth { u: 1, v: 1 })
        ));
    }

    #[test]
    fn test_sample_outside_grid() {
        let map = DepthMap::from_grid(2, 2, vec![1.0; 4]).unwrap();
        assert!(map.sample(10.0, 0.0, 3).is_err());
        assert!(map.sample(-3.0, 0.0, 3).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0001.JPG.geometric.bin");
        std::fs::write(&path, encode(4, 2, 1, &[1.5; 8])).unwrap();

        let map = DepthMap::load(&path, (4, 2)).unwrap();
        assert_eq!(map.sample(3.0, 1.0, 7).unwrap(), 1.5);
    }
}
