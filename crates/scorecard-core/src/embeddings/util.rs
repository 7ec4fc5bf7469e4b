use crate::errors::StrategyError;
use sha2::{Digest, Sha256};

pub fn encode_vec_f32(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

#[allow(clippy::manual_is_multiple_of)]
pub fn decode_vec_f32(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        anyhow::bail!("invalid embedding blob size {}", bytes.len());
    }
    let v = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(v)
}

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

pub fn embed_cache_key(model_id: &str, text: &str) -> String {
    format!("emb|{}|{}", model_id, sha256_hex(text))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, StrategyError> {
    let af: Vec<f64> = a.iter().map(|x| *x as f64).collect();
    let bf: Vec<f64> = b.iter().map(|x| *x as f64).collect();
    cosine_similarity_f64(&af, &bf)
}

pub fn cosine_similarity_f64(a: &[f64], b: &[f64]) -> Result<f64, StrategyError> {
    if a.is_empty() || a.len() != b.len() {
        return Err(StrategyError::InvalidInput(format!(
            "embedding dims mismatch (a={}, b={})",
            a.len(),
            b.len()
        )));
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 {
        return Err(StrategyError::InvalidInput("zero-norm embedding".into()));
    }
    // Rounding can push identical vectors a hair past 1.0.
    Ok((dot / denom).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() -> anyhow::Result<()> {
        let v = vec![0.1_f32, -0.2_f32, 3.5_f32];
        let blob = encode_vec_f32(&v);
        let out = decode_vec_f32(&blob)?;
        assert_eq!(v.len(), out.len());
        for i in 0..v.len() {
            assert!((v[i] - out[i]).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn decode_rejects_ragged_blob() {
        assert!(decode_vec_f32(&[1, 2, 3]).is_err());
    }

    #[test]
    fn cosine_identical_is_one() -> anyhow::Result<()> {
        let a = vec![1.0_f32, 0.0, 0.0];
        let b = vec![1.0_f32, 0.0, 0.0];
        let s = cosine_similarity(&a, &b)?;
        assert!((s - 1.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn cosine_orthogonal_is_zero() -> anyhow::Result<()> {
        let s = cosine_similarity(&[1.0, 0.0], &[0.0, 2.0])?;
        assert!(s.abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn cosine_rejects_mismatch_and_zero_norm() {
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).is_err());
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).is_err());
    }

    #[test]
    fn cache_key_is_stable() {
        assert_eq!(embed_cache_key("m", "hi"), embed_cache_key("m", "hi"));
        assert_ne!(embed_cache_key("m", "hi"), embed_cache_key("n", "hi"));
    }
}
