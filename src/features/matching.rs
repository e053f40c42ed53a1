//! Brute-force binary descriptor matching.

use crate::error::{Result, SlamError};
use crate::features::{DescriptorMatcher, Descriptors, FeatureMatch};

/// Maximum Hamming distance for an acceptable binary match.
pub const TH_HIGH: u32 = 100;
/// Stricter threshold used when matching for triangulation.
pub const TH_LOW: u32 = 50;

/// Hamming distance between two equal-length binary descriptors.
pub fn descriptor_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones())
        .sum()
}

/// Brute-force Hamming matcher with optional cross-check, mirroring the
/// classic NORM_HAMMING + crossCheck setup. Matches come back sorted
/// ascending by distance.
pub struct HammingMatcher {
    cross_check: bool,
    max_distance: u32,
}

impl HammingMatcher {
    pub fn new(cross_check: bool) -> Self {
        Self {
            cross_check,
            max_distance: TH_HIGH,
        }
    }

    pub fn with_max_distance(cross_check: bool, max_distance: u32) -> Self {
        Self {
            cross_check,
            max_distance,
        }
    }

    /// Nearest neighbor of `row` in `train`; None if `train` is empty.
    fn nearest(&self, row: &[u8], train: &Descriptors) -> Option<(usize, u32)> {
        let mut best: Option<(usize, u32)> = None;
        for j in 0..train.len() {
            let dist = descriptor_distance(row, train.row(j));
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((j, dist));
            }
        }
        best
    }
}

impl Default for HammingMatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DescriptorMatcher for HammingMatcher {
    fn match_descriptors(
        &self,
        query: &Descriptors,
        train: &Descriptors,
    ) -> Result<Vec<FeatureMatch>> {
        if query.is_absent() || train.is_absent() {
            return Err(SlamError::invalid_input(
                "descriptor set is absent; cannot match",
            ));
        }
        if query.stride() != train.stride() {
            return Err(SlamError::invalid_input(format!(
                "descriptor strides disagree: {} vs {}",
                query.stride(),
                train.stride()
            )));
        }

        let mut matches = Vec::new();
        for i in 0..query.len() {
            let row = query.row(i);
            let (j, dist) = match self.nearest(row, train) {
                Some(hit) => hit,
                None => break,
            };
            if dist > self.max_distance {
                continue;
            }
            if self.cross_check {
                // Keep only mutual nearest neighbors.
                let (back, _) = match self.nearest(train.row(j), query) {
                    Some(hit) => hit,
                    None => continue,
                };
                if back != i {
                    continue;
                }
            }
            matches.push(FeatureMatch {
                query_idx: i,
                train_idx: j,
                distance: dist,
            });
        }

        matches.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then(a.query_idx.cmp(&b.query_idx))
        });
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_from_rows(rows: &[[u8; 4]]) -> Descriptors {
        let bytes: Vec<u8> = rows.iter().flatten().copied().collect();
        Descriptors::new(bytes, 4).unwrap()
    }

    #[test]
    fn hamming_distance_counts_bits() {
        assert_eq!(descriptor_distance(&[0xFF, 0x00], &[0x00, 0x00]), 8);
        assert_eq!(descriptor_distance(&[0b1010], &[0b0101]), 4);
        assert_eq!(descriptor_distance(&[7, 7], &[7, 7]), 0);
    }

    #[test]
    fn matches_are_sorted_ascending_by_distance() {
        let query = block_from_rows(&[
            [0xF0, 0x00, 0x00, 0x00], // differs by 2 bits from its target
            [0x0F, 0x00, 0x00, 0x00], // exact
            [0x00, 0xFF, 0x00, 0x00], // differs by 1 bit
        ]);
        let train = block_from_rows(&[
            [0xF0, 0x03, 0x00, 0x00],
            [0x0F, 0x00, 0x00, 0x00],
            [0x00, 0xFE, 0x00, 0x00],
        ]);

        let matches = HammingMatcher::new(false)
            .match_descriptors(&query, &train)
            .unwrap();

        assert_eq!(matches.len(), 3);
        for pair in matches.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        assert_eq!(matches[0].query_idx, 1);
    }

    #[test]
    fn cross_check_keeps_only_mutual_nearest() {
        // Query 0 and 1 both prefer train 0; only the closer one survives
        // the cross-check.
        let query = block_from_rows(&[
            [0b0000_0001, 0, 0, 0],
            [0b0000_0011, 0, 0, 0],
        ]);
        let train = block_from_rows(&[[0b0000_0001, 0, 0, 0]]);

        let matches = HammingMatcher::new(true)
            .match_descriptors(&query, &train)
            .unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].query_idx, 0);
        assert_eq!(matches[0].distance, 0);
    }

    #[test]
    fn absent_descriptors_are_invalid_input() {
        let valid = block_from_rows(&[[1, 2, 3, 4]]);
        let absent = Descriptors::absent();

        let err = HammingMatcher::default().match_descriptors(&absent, &valid);
        assert!(matches!(err, Err(SlamError::InvalidInput(_))));
        let err = HammingMatcher::default().match_descriptors(&valid, &absent);
        assert!(matches!(err, Err(SlamError::InvalidInput(_))));
    }

    #[test]
    fn empty_but_typed_descriptors_match_to_nothing() {
        let valid = block_from_rows(&[[1, 2, 3, 4]]);
        let empty = Descriptors::empty(4);

        let matches = HammingMatcher::default()
            .match_descriptors(&empty, &valid)
            .unwrap();
        assert!(matches.is_empty());
    }
}
