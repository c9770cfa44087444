//! Vector helpers shared by the backends.

/// Cosine similarity mapped from [-1, 1] to [0, 1].
///
/// Returns `None` for mismatched dimensions or zero-length vectors.
pub fn normalized_cosine(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    Some(((cosine + 1.0) / 2.0).clamp(0.0, 1.0))
}

/// Encode an embedding as little-endian `f32` bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes; trailing partial values are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
