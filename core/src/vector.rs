use std::error::Error;
use std::fmt;
use wide::f32x8;

/// Tolerance used when checking that a stored vector is unit-normalized.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-3;

/// Error type for vector operations.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorError {
    /// Returned when vectors do not share the same dimension.
    DimensionMismatch { left: usize, right: usize },
    /// Returned when one or both vectors are empty.
    EmptyVector,
    /// Returned when a norm is required but the vector is (nearly) zero.
    ZeroNorm,
    /// Returned when a vector holds NaN or Infinity.
    NonFinite { index: usize, value: f32 },
}

impl fmt::Display for VectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { left, right } => {
                write!(f, "dimension mismatch: left={}, right={}", left, right)
            }
            Self::EmptyVector => write!(f, "vector is empty"),
            Self::ZeroNorm => write!(f, "vector has near-zero norm"),
            Self::NonFinite { index, value } => {
                write!(f, "non-finite value at index {index}: {value}")
            }
        }
    }
}

impl Error for VectorError {}

/// Returns the index and value of the first NaN or Infinity, if any.
pub fn first_non_finite(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .find(|(_, value)| !value.is_finite())
}

fn validate_pair(left: &[f32], right: &[f32]) -> Result<(), VectorError> {
    if left.is_empty() || right.is_empty() {
        return Err(VectorError::EmptyVector);
    }
    if left.len() != right.len() {
        return Err(VectorError::DimensionMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    Ok(())
}

/// Computes the dot product between two same-length vectors.
pub fn dot_product(left: &[f32], right: &[f32]) -> Result<f32, VectorError> {
    validate_pair(left, right)?;
    Ok(simd_dot(left, right))
}

/// Computes the Euclidean norm of a vector.
pub fn l2_norm(values: &[f32]) -> f32 {
    simd_dot(values, values).sqrt()
}

/// Scales `values` in place to unit Euclidean norm.
pub fn normalize_l2(values: &mut [f32]) -> Result<(), VectorError> {
    if values.is_empty() {
        return Err(VectorError::EmptyVector);
    }
    if let Some((index, value)) = first_non_finite(values) {
        return Err(VectorError::NonFinite { index, value });
    }

    let norm = l2_norm(values);
    if !norm.is_finite() || norm <= f32::EPSILON {
        return Err(VectorError::ZeroNorm);
    }
    let inverse = 1.0 / norm;
    for value in values.iter_mut() {
        *value *= inverse;
    }
    Ok(())
}

/// Computes cosine distance `1 - cos(left, right)`.
pub fn cosine_distance(left: &[f32], right: &[f32]) -> Result<f32, VectorError> {
    validate_pair(left, right)?;
    let (dot, left_sq_sum, right_sq_sum) = simd_dot_and_norms(left, right);
    if left_sq_sum <= f32::EPSILON || right_sq_sum <= f32::EPSILON {
        return Err(VectorError::ZeroNorm);
    }
    Ok(1.0 - dot / (left_sq_sum.sqrt() * right_sq_sum.sqrt()))
}

const SIMD_WIDTH: usize = 8;

/// Pre-packed query representation for repeated cosine computations against
/// many same-length vectors.
#[derive(Debug, Clone)]
pub struct PreparedCosineQuery {
    len: usize,
    simd_query: Vec<f32x8>,
    tail: [f32; SIMD_WIDTH],
    tail_len: usize,
    query_norm: f32,
}

impl PreparedCosineQuery {
    /// Builds a reusable SIMD-packed query.
    pub fn new(query: &[f32]) -> Self {
        let mut chunks = query.chunks_exact(SIMD_WIDTH);
        let simd_query = chunks.by_ref().map(load_f32x8).collect();
        let remainder = chunks.remainder();

        let mut tail = [0.0f32; SIMD_WIDTH];
        tail[..remainder.len()].copy_from_slice(remainder);

        Self {
            len: query.len(),
            simd_query,
            tail,
            tail_len: remainder.len(),
            query_norm: l2_norm(query),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Computes cosine distance against a same-length vector.
    ///
    /// Returns `None` when either norm is near zero.
    pub fn cosine_distance_unchecked(&self, right: &[f32]) -> Option<f32> {
        debug_assert_eq!(right.len(), self.len);
        let simd_chunks = self.simd_query.len();
        let simd_prefix_len = simd_chunks * SIMD_WIDTH;
        let right_prefix = &right[..simd_prefix_len];

        let mut dot_sum = f32x8::ZERO;
        let mut right_sq_sum = f32x8::ZERO;
        for (chunk_idx, right_chunk) in right_prefix.chunks_exact(SIMD_WIDTH).enumerate() {
            let right_v = load_f32x8(right_chunk);
            dot_sum += self.simd_query[chunk_idx] * right_v;
            right_sq_sum += right_v * right_v;
        }

        let mut dot_scalar = 0.0f32;
        let mut right_sq_scalar = 0.0f32;
        let right_tail = &right[simd_prefix_len..];
        for (index, right_value) in right_tail.iter().enumerate().take(self.tail_len) {
            dot_scalar += self.tail[index] * *right_value;
            right_sq_scalar += right_value * right_value;
        }

        let dot = dot_sum.reduce_add() + dot_scalar;
        let right_norm = (right_sq_sum.reduce_add() + right_sq_scalar).sqrt();
        if self.query_norm <= f32::EPSILON || right_norm <= f32::EPSILON {
            return None;
        }
        Some(1.0 - dot / (self.query_norm * right_norm))
    }
}

fn load_f32x8(values: &[f32]) -> f32x8 {
    debug_assert_eq!(values.len(), SIMD_WIDTH);
    f32x8::from([
        values[0], values[1], values[2], values[3], values[4], values[5], values[6], values[7],
    ])
}

fn simd_scan(
    left: &[f32],
    right: &[f32],
    mut simd_step: impl FnMut(f32x8, f32x8),
    mut scalar_step: impl FnMut(f32, f32),
) {
    let mut left_chunks = left.chunks_exact(SIMD_WIDTH);
    let mut right_chunks = right.chunks_exact(SIMD_WIDTH);

    for (left_chunk, right_chunk) in left_chunks.by_ref().zip(right_chunks.by_ref()) {
        simd_step(load_f32x8(left_chunk), load_f32x8(right_chunk));
    }

    for (&left_value, &right_value) in left_chunks.remainder().iter().zip(right_chunks.remainder())
    {
        scalar_step(left_value, right_value);
    }
}

fn simd_dot(left: &[f32], right: &[f32]) -> f32 {
    let mut simd_sum = f32x8::ZERO;
    let mut scalar_sum = 0.0;

    simd_scan(
        left,
        right,
        |left_v, right_v| {
            simd_sum += left_v * right_v;
        },
        |left_value, right_value| {
            scalar_sum += left_value * right_value;
        },
    );

    simd_sum.reduce_add() + scalar_sum
}

fn simd_dot_and_norms(left: &[f32], right: &[f32]) -> (f32, f32, f32) {
    let mut dot_sum = f32x8::ZERO;
    let mut left_sq_sum = f32x8::ZERO;
    let mut right_sq_sum = f32x8::ZERO;
    let mut dot_scalar = 0.0;
    let mut left_sq_scalar = 0.0;
    let mut right_sq_scalar = 0.0;

    simd_scan(
        left,
        right,
        |left_v, right_v| {
            dot_sum += left_v * right_v;
            left_sq_sum += left_v * left_v;
            right_sq_sum += right_v * right_v;
        },
        |left_value, right_value| {
            dot_scalar += left_value * right_value;
            left_sq_scalar += left_value * left_value;
            right_sq_scalar += right_value * right_value;
        },
    );

    (
        dot_sum.reduce_add() + dot_scalar,
        left_sq_sum.reduce_add() + left_sq_scalar,
        right_sq_sum.reduce_add() + right_sq_scalar,
    )
}
