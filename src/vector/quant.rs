//! Vector byte layouts.
//!
//! The upsert wire format is raw little-endian f32 (`vector_to_bytes`).
//! At index-ingest time the store re-encodes with `leanvec4x8`: a two-level
//! block scheme holding a 4-bit primary code plus an 8-bit residual code per
//! dimension, about 2.6x smaller than raw f32 with recall loss small enough
//! to keep dequantized norms inside the stored-document tolerance.

/// Scheme identifier recorded in the index schema.
pub const QUANT_SCHEME: &str = "leanvec4x8";

const HEADER_BYTES: usize = 16;
const PRIMARY_LEVELS: f32 = 15.0;
const RESIDUAL_LEVELS: f32 = 255.0;

/// Raw little-endian f32 encoding (wire format, embedding cache).
pub fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Encoded size for a `dim`-dimensional vector.
pub fn quantized_len(dim: usize) -> usize {
    HEADER_BYTES + dim.div_ceil(2) + dim
}

/// Quantize a vector with the leanvec4x8 scheme.
///
/// Layout: `[primary_min f32][primary_range f32][residual_min f32]
/// [residual_range f32][dim/2 packed 4-bit codes][dim 8-bit residual codes]`.
pub fn quantize(v: &[f32]) -> Vec<u8> {
    let dim = v.len();
    let (p_min, p_max) = min_max(v);
    let p_range = (p_max - p_min).max(f32::EPSILON);

    let mut primary_codes = Vec::with_capacity(dim);
    let mut residuals = Vec::with_capacity(dim);
    for &x in v {
        let code = (((x - p_min) / p_range) * PRIMARY_LEVELS).round() as u8;
        let code = code.min(PRIMARY_LEVELS as u8);
        primary_codes.push(code);
        residuals.push(x - (p_min + code as f32 / PRIMARY_LEVELS * p_range));
    }

    let (r_min, r_max) = min_max(&residuals);
    let r_range = (r_max - r_min).max(f32::EPSILON);

    let mut out = Vec::with_capacity(quantized_len(dim));
    out.extend_from_slice(&p_min.to_le_bytes());
    out.extend_from_slice(&p_range.to_le_bytes());
    out.extend_from_slice(&r_min.to_le_bytes());
    out.extend_from_slice(&r_range.to_le_bytes());

    for pair in primary_codes.chunks(2) {
        let lo = pair[0];
        let hi = pair.get(1).copied().unwrap_or(0);
        out.push(lo | (hi << 4));
    }
    for r in residuals {
        let code = (((r - r_min) / r_range) * RESIDUAL_LEVELS).round();
        out.push(code.clamp(0.0, RESIDUAL_LEVELS) as u8);
    }
    out
}

/// Reconstruct a `dim`-dimensional vector from its leanvec4x8 encoding.
pub fn dequantize(bytes: &[u8], dim: usize) -> Vec<f32> {
    if bytes.len() != quantized_len(dim) {
        return Vec::new();
    }
    let p_min = f32::from_le_bytes(bytes[0..4].try_into().unwrap_or_default());
    let p_range = f32::from_le_bytes(bytes[4..8].try_into().unwrap_or_default());
    let r_min = f32::from_le_bytes(bytes[8..12].try_into().unwrap_or_default());
    let r_range = f32::from_le_bytes(bytes[12..16].try_into().unwrap_or_default());

    let packed = &bytes[HEADER_BYTES..HEADER_BYTES + dim.div_ceil(2)];
    let residual = &bytes[HEADER_BYTES + dim.div_ceil(2)..];

    let mut out = Vec::with_capacity(dim);
    for i in 0..dim {
        let byte = packed[i / 2];
        let code = if i % 2 == 0 { byte & 0x0f } else { byte >> 4 };
        let primary = p_min + code as f32 / PRIMARY_LEVELS * p_range;
        let res = r_min + residual[i] as f32 / RESIDUAL_LEVELS * r_range;
        out.push(primary + res);
    }
    out
}

/// Cosine similarity between two vectors, 0.0 on mismatch or zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn min_max(v: &[f32]) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &x in v {
        min = min.min(x);
        max = max.max(x);
    }
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}
