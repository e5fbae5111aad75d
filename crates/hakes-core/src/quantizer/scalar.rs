//! 8-bit scalar quantization (SQ8).
//!
//! For each dimension:
//! - Compute min/max from training data
//! - Scale to [0, 255]: `q = round((x - min) / (max - min) * 255)`
//! - Store scale and offset for reconstruction
//!
//! Used by the IVF-SQ coarse quantizer: the centroid table is held as SQ8
//! codes and a float query is compared against them asymmetrically.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-dimension quantization parameters learned from training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    /// Minimum value per dimension.
    min_vals: Vec<f32>,
    /// Scale factor per dimension: `255 / (max - min)`.
    scales: Vec<f32>,
    /// Inverse scale, precomputed for dequantization.
    inv_scales: Vec<f32>,
    /// Vector dimension.
    dimension: usize,
}

impl ScalarQuantizer {
    /// Learns min/max per dimension from `n` row-major vectors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBatch` if `data` is empty or not a multiple of
    /// `dimension`.
    pub fn train(dimension: usize, data: &[f32]) -> Result<Self> {
        if dimension == 0 || data.is_empty() || data.len() % dimension != 0 {
            return Err(Error::InvalidBatch(format!(
                "cannot train a scalar quantizer on {} floats of dimension {dimension}",
                data.len()
            )));
        }

        let mut min_vals = vec![f32::MAX; dimension];
        let mut max_vals = vec![f32::MIN; dimension];

        for row in data.chunks_exact(dimension) {
            for (i, &val) in row.iter().enumerate() {
                min_vals[i] = min_vals[i].min(val);
                max_vals[i] = max_vals[i].max(val);
            }
        }

        let scales: Vec<f32> = min_vals
            .iter()
            .zip(&max_vals)
            .map(|(&min, &max)| {
                let range = max - min;
                if range.abs() < 1e-10 {
                    1.0 // Constant dimension, scale doesn't matter
                } else {
                    255.0 / range
                }
            })
            .collect();
        let inv_scales = scales.iter().map(|&s| 1.0 / s).collect();

        Ok(Self {
            min_vals,
            scales,
            inv_scales,
            dimension,
        })
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Quantizes a float vector to one byte per dimension.
    #[must_use]
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dimension);
        vector
            .iter()
            .zip(&self.min_vals)
            .zip(&self.scales)
            .map(|((&val, &min), &scale)| ((val - min) * scale).round().clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// Reconstructs a float vector.
    #[must_use]
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        debug_assert_eq!(codes.len(), self.dimension);
        codes
            .iter()
            .zip(&self.min_vals)
            .zip(&self.inv_scales)
            .map(|((&q, &min), &inv)| f32::from(q) * inv + min)
            .collect()
    }

    /// Squared L2 distance between a float query and an encoded vector.
    #[inline]
    #[must_use]
    pub fn l2_asymmetric(&self, query: &[f32], codes: &[u8]) -> f32 {
        debug_assert_eq!(query.len(), self.dimension);
        let mut sum = 0.0_f32;
        for (i, (&q, &c)) in query.iter().zip(codes).enumerate() {
            let d = q - (f32::from(c) * self.inv_scales[i] + self.min_vals[i]);
            sum += d * d;
        }
        sum
    }

    /// Inner product between a float query and an encoded vector.
    #[inline]
    #[must_use]
    pub fn ip_asymmetric(&self, query: &[f32], codes: &[u8]) -> f32 {
        debug_assert_eq!(query.len(), self.dimension);
        let mut sum = 0.0_f32;
        for (i, (&q, &c)) in query.iter().zip(codes).enumerate() {
            sum += q * (f32::from(c) * self.inv_scales[i] + self.min_vals[i]);
        }
        sum
    }
}
