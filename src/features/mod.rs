//! Feature model and collaborator contracts.
//!
//! Keypoint extraction and descriptor matching are external capabilities:
//! the pipeline consumes them through the `FeatureExtractor` and
//! `DescriptorMatcher` traits and never touches raw pixels itself. The crate
//! ships a brute-force Hamming matcher as the reference implementation of
//! the matching contract.

pub mod matching;

use image::GrayImage;
use nalgebra::Vector2;

use crate::error::{Result, SlamError};

pub use matching::HammingMatcher;

/// A detected 2D feature: pixel location plus scale/orientation metadata.
#[derive(Debug, Clone, Copy)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub angle: f32,
    pub octave: u32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            size: 31.0,
            angle: -1.0,
            octave: 0,
        }
    }

    /// Pixel position as a double-precision vector.
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x as f64, self.y as f64)
    }
}

/// A packed block of fixed-size binary descriptors, one row per keypoint.
///
/// A block with stride 0 is *absent* (no descriptor layout at all) and is
/// rejected by the matcher with `InvalidInput`. A block with a valid stride
/// and zero rows is merely empty and matches to an empty result.
#[derive(Debug, Clone, Default)]
pub struct Descriptors {
    bytes: Vec<u8>,
    stride: usize,
}

impl Descriptors {
    /// Bytes per descriptor for 256-bit binary descriptors (ORB-style).
    pub const BINARY_256: usize = 32;

    pub fn new(bytes: Vec<u8>, stride: usize) -> Result<Self> {
        if stride == 0 {
            return Err(SlamError::invalid_input("descriptor stride must be nonzero"));
        }
        if bytes.len() % stride != 0 {
            return Err(SlamError::invalid_input(format!(
                "descriptor buffer length {} is not a multiple of stride {}",
                bytes.len(),
                stride
            )));
        }
        Ok(Self { bytes, stride })
    }

    /// An absent block (stride 0). Distinct from an empty block.
    pub fn absent() -> Self {
        Self::default()
    }

    /// An empty block with the given row layout.
    pub fn empty(stride: usize) -> Self {
        Self {
            bytes: Vec::new(),
            stride,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.stride == 0
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of descriptor rows.
    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.bytes.len() / self.stride
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, index: usize) -> &[u8] {
        let start = index * self.stride;
        &self.bytes[start..start + self.stride]
    }

    /// Append one descriptor row.
    pub fn push_row(&mut self, row: &[u8]) -> Result<()> {
        if self.stride == 0 {
            self.stride = row.len();
        }
        if row.len() != self.stride {
            return Err(SlamError::invalid_input(format!(
                "descriptor row length {} does not match stride {}",
                row.len(),
                self.stride
            )));
        }
        self.bytes.extend_from_slice(row);
        Ok(())
    }
}

/// Keypoints plus their descriptors for one frame.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Descriptors,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// A correspondence between two descriptor sets: indices into the query and
/// train sets plus the descriptor distance. Produced by the matcher, consumed
/// once per frame pair, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: u32,
}

/// Keypoint/descriptor extraction capability, provided by the caller.
pub trait FeatureExtractor {
    /// Extract features from a grayscale frame. An empty result is valid
    /// (the tracker handles it); implementations reserve errors for
    /// malformed input.
    fn extract(&mut self, image: &GrayImage) -> Result<FeatureSet>;
}

/// Descriptor matching capability.
pub trait DescriptorMatcher {
    /// Match two descriptor blocks. The result is sorted ascending by
    /// distance. Fails with `InvalidInput` when either block is absent
    /// (stride 0) or the strides disagree; valid empty blocks produce an
    /// empty result.
    fn match_descriptors(
        &self,
        query: &Descriptors,
        train: &Descriptors,
    ) -> Result<Vec<FeatureMatch>>;
}
