//! Vector preprocessing applied before indexing and before search.
//!
//! A [`TransformChain`] is an ordered list of [`VectorTransform`]s. The index
//! keeps two independent chains: the *base* chain for inserted data and the
//! *query* chain for queries. Both must land in the same output space (the
//! dimension of the approximate index); the query chain can be re-learned and
//! hot-swapped through the parameter document without touching stored data.
//!
//! Transforms serialize through a flat record so that the same value can go
//! to `bincode` checkpoints and to the TOML parameter document.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance::{inner_product, norm};
use crate::error::{Error, Result};

/// A single preprocessing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransformSpec", into = "TransformSpec")]
pub enum VectorTransform {
    /// Scale every vector to unit L2 norm. Zero vectors pass through.
    Normalize {
        /// Vector dimension.
        dim: usize,
    },
    /// Affine map `y = A·x + b` with `A` stored row-major (`d_out × d_in`).
    Linear(LinearTransform),
}

/// Affine transform `y = A·x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTransform {
    d_in: usize,
    d_out: usize,
    matrix: Vec<f32>,
    bias: Vec<f32>,
}

impl LinearTransform {
    /// Creates a linear transform, validating the matrix and bias shapes.
    ///
    /// An empty `bias` means zero bias.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if the shapes are inconsistent.
    pub fn new(d_in: usize, d_out: usize, matrix: Vec<f32>, bias: Vec<f32>) -> Result<Self> {
        if d_in == 0 || d_out == 0 {
            return Err(Error::InvalidParams(
                "linear transform dimensions must be positive".to_string(),
            ));
        }
        if matrix.len() != d_in * d_out {
            return Err(Error::InvalidParams(format!(
                "linear transform matrix has {} entries, expected {}",
                matrix.len(),
                d_in * d_out
            )));
        }
        let bias = if bias.is_empty() {
            vec![0.0; d_out]
        } else {
            bias
        };
        if bias.len() != d_out {
            return Err(Error::InvalidParams(format!(
                "linear transform bias has {} entries, expected {d_out}",
                bias.len()
            )));
        }
        Ok(Self {
            d_in,
            d_out,
            matrix,
            bias,
        })
    }

    /// Seeded orthonormal projection from `d_in` to `d_out` dimensions.
    ///
    /// With `d_out == d_in` this is a random rotation; with `d_out < d_in` it
    /// is a distance-contracting projection onto a random subspace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if `d_out > d_in` or either is zero.
    pub fn random_orthogonal(d_in: usize, d_out: usize, seed: u64) -> Result<Self> {
        if d_out == 0 || d_out > d_in {
            return Err(Error::InvalidParams(format!(
                "cannot build an orthonormal projection from {d_in} to {d_out} dimensions"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(d_out);

        while rows.len() < d_out {
            let mut v: Vec<f32> = (0..d_in).map(|_| rng.gen_range(-1.0..1.0)).collect();
            // Modified Gram-Schmidt against the rows accepted so far.
            for row in &rows {
                let p = inner_product(&v, row);
                for (x, r) in v.iter_mut().zip(row) {
                    *x -= p * r;
                }
            }
            let n = norm(&v);
            if n < 1e-4 {
                continue;
            }
            v.iter_mut().for_each(|x| *x /= n);
            rows.push(v);
        }

        Self::new(d_in, d_out, rows.concat(), Vec::new())
    }

    /// Input dimension.
    #[must_use]
    pub fn d_in(&self) -> usize {
        self.d_in
    }

    /// Output dimension.
    #[must_use]
    pub fn d_out(&self) -> usize {
        self.d_out
    }

    fn apply_into(&self, x: &[f32], out: &mut [f32]) {
        for (o, (row, b)) in out
            .iter_mut()
            .zip(self.matrix.chunks_exact(self.d_in).zip(&self.bias))
        {
            *o = inner_product(row, x) + b;
        }
    }
}

impl VectorTransform {
    /// Input dimension.
    #[must_use]
    pub fn d_in(&self) -> usize {
        match self {
            Self::Normalize { dim } => *dim,
            Self::Linear(l) => l.d_in,
        }
    }

    /// Output dimension.
    #[must_use]
    pub fn d_out(&self) -> usize {
        match self {
            Self::Normalize { dim } => *dim,
            Self::Linear(l) => l.d_out,
        }
    }

    /// Applies the transform to `n` row-major vectors.
    fn apply_batch(&self, x: &[f32]) -> Vec<f32> {
        let d_in = self.d_in();
        let d_out = self.d_out();
        let n = x.len() / d_in;
        let mut out = vec![0.0_f32; n * d_out];

        out.par_chunks_mut(d_out)
            .zip(x.par_chunks(d_in))
            .for_each(|(o, v)| match self {
                Self::Normalize { .. } => {
                    let n = norm(v);
                    if n > 0.0 {
                        o.iter_mut().zip(v).for_each(|(a, b)| *a = b / n);
                    } else {
                        o.copy_from_slice(v);
                    }
                }
                Self::Linear(l) => l.apply_into(v, o),
            });

        out
    }
}

/// Ordered sequence of transforms.
///
/// An empty chain is the identity; its dimensions are those of the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformChain {
    transforms: Vec<VectorTransform>,
}

impl TransformChain {
    /// Creates a chain, checking that consecutive dimensions agree.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` if a transform's input does not match its
    /// predecessor's output.
    pub fn new(transforms: Vec<VectorTransform>) -> Result<Self> {
        let chain = Self { transforms };
        chain.validate()?;
        Ok(chain)
    }

    /// Identity chain.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Checks that consecutive dimensions agree.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` describing the first mismatch.
    pub fn validate(&self) -> Result<()> {
        for (i, pair) in self.transforms.windows(2).enumerate() {
            if pair[0].d_out() != pair[1].d_in() {
                return Err(Error::InvalidParams(format!(
                    "transform {} outputs {} dimensions but transform {} expects {}",
                    i,
                    pair[0].d_out(),
                    i + 1,
                    pair[1].d_in()
                )));
            }
        }
        Ok(())
    }

    /// The transforms, in application order.
    #[must_use]
    pub fn transforms(&self) -> &[VectorTransform] {
        &self.transforms
    }

    /// Returns true for the identity chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Input dimension required by the chain, if it has any transform.
    #[must_use]
    pub fn d_in(&self) -> Option<usize> {
        self.transforms.first().map(VectorTransform::d_in)
    }

    /// Output dimension for inputs of dimension `input_dim`.
    #[must_use]
    pub fn output_dim(&self, input_dim: usize) -> usize {
        self.transforms
            .last()
            .map_or(input_dim, VectorTransform::d_out)
    }

    /// Checks that the chain maps `d_in` inputs to `d_out` outputs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParams` describing the mismatch.
    pub fn check_dims(&self, d_in: usize, d_out: usize) -> Result<()> {
        if let Some(expected) = self.d_in() {
            if expected != d_in {
                return Err(Error::InvalidParams(format!(
                    "transform chain expects {expected}-d input, index input is {d_in}-d"
                )));
            }
        }
        let actual_out = self.output_dim(d_in);
        if actual_out != d_out {
            return Err(Error::InvalidParams(format!(
                "transform chain outputs {actual_out}-d vectors, index expects {d_out}-d"
            )));
        }
        Ok(())
    }

    /// Applies every transform in order to `n` row-major vectors of
    /// dimension `d`, returning the transformed rows.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if `d` does not match the chain input, or
    /// `InvalidBatch` if `x.len() != n * d`.
    pub fn apply(&self, n: usize, d: usize, x: &[f32]) -> Result<Vec<f32>> {
        if x.len() != n * d {
            return Err(Error::InvalidBatch(format!(
                "expected {} floats for {n} vectors of dimension {d}, got {}",
                n * d,
                x.len()
            )));
        }
        if let Some(expected) = self.d_in() {
            if expected != d {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: d,
                });
            }
        }

        let mut iter = self.transforms.iter();
        let Some(first) = iter.next() else {
            return Ok(x.to_vec());
        };
        let mut current = first.apply_batch(x);
        for t in iter {
            current = t.apply_batch(&current);
        }
        Ok(current)
    }
}

/// Transform kind as written in checkpoints and parameter documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// [`VectorTransform::Normalize`].
    Normalize,
    /// [`VectorTransform::Linear`].
    Linear,
}

/// Flat wire form of a [`VectorTransform`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformSpec {
    /// Transform kind.
    pub kind: TransformKind,
    /// Input dimension.
    pub d_in: usize,
    /// Output dimension.
    pub d_out: usize,
    /// Row-major matrix, `Linear` only.
    #[serde(default)]
    pub matrix: Vec<f32>,
    /// Bias, `Linear` only; empty means zero.
    #[serde(default)]
    pub bias: Vec<f32>,
}

impl From<VectorTransform> for TransformSpec {
    fn from(t: VectorTransform) -> Self {
        match t {
            VectorTransform::Normalize { dim } => Self {
                kind: TransformKind::Normalize,
                d_in: dim,
                d_out: dim,
                matrix: Vec::new(),
                bias: Vec::new(),
            },
            VectorTransform::Linear(l) => Self {
                kind: TransformKind::Linear,
                d_in: l.d_in,
                d_out: l.d_out,
                matrix: l.matrix,
                bias: l.bias,
            },
        }
    }
}

impl TryFrom<TransformSpec> for VectorTransform {
    type Error = Error;

    fn try_from(spec: TransformSpec) -> Result<Self> {
        match spec.kind {
            TransformKind::Normalize => {
                if spec.d_in != spec.d_out || spec.d_in == 0 {
                    return Err(Error::InvalidParams(format!(
                        "normalize transform needs equal positive dimensions, got {} -> {}",
                        spec.d_in, spec.d_out
                    )));
                }
                Ok(Self::Normalize { dim: spec.d_in })
            }
            TransformKind::Linear => Ok(Self::Linear(LinearTransform::new(
                spec.d_in,
                spec.d_out,
                spec.matrix,
                spec.bias,
            )?)),
        }
    }
}
