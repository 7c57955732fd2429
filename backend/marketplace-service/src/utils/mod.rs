// Scoring helpers shared by the pipeline components

use sha2::{Digest, Sha256};

/// Normalize a score to [0, 1] range
pub fn normalize_score(score: f64, min: f64, max: f64) -> f64 {
    if max - min < f64::EPSILON {
        0.5
    } else {
        ((score - min) / (max - min)).clamp(0.0, 1.0)
    }
}

/// Exponential decay for time-based scoring; 0.5 after one half-life
pub fn exponential_decay(age_hours: f64, half_life_hours: f64) -> f64 {
    (-age_hours.max(0.0) / half_life_hours * std::f64::consts::LN_2).exp()
}

/// Map an unbounded non-negative signal into [0, 1)
pub fn saturate(signal: f64, scale: f64) -> f64 {
    if signal <= 0.0 || scale <= 0.0 {
        0.0
    } else {
        1.0 - (-signal / scale).exp()
    }
}

/// Nearest-rank percentile of an already sorted slice
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank).copied()
}

/// SHA-256 based hash that is identical across builds, used to seed simulations
pub fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Descending comparison for f64 scores; NaN sorts as equal
pub fn desc(a: f64, b: f64) -> std::cmp::Ordering {
    b.partial_cmp(&a).unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_score() {
        assert!((normalize_score(5.0, 0.0, 10.0) - 0.5).abs() < 0.001);
        assert!((normalize_score(10.0, 0.0, 10.0) - 1.0).abs() < 0.001);
        assert!((normalize_score(0.0, 0.0, 10.0) - 0.0).abs() < 0.001);
        assert_eq!(normalize_score(3.0, 3.0, 3.0), 0.5);
    }

    #[test]
    fn test_exponential_decay() {
        // 半衰期後應該約為 0.5
        let score = exponential_decay(168.0, 168.0);
        assert!((score - 0.5).abs() < 0.001);

        let score_fresh = exponential_decay(0.0, 168.0);
        assert!((score_fresh - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_saturate_bounds() {
        assert_eq!(saturate(0.0, 5.0), 0.0);
        assert!(saturate(1e9, 5.0) <= 1.0);
        assert!(saturate(5.0, 5.0) > 0.6);
    }

    #[test]
    fn test_percentile() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 0.5), Some(3.0));
        assert_eq!(percentile(&values, 1.0), Some(5.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_stable_hash_repeats() {
        assert_eq!(stable_hash("screen-1"), stable_hash("screen-1"));
        assert_ne!(stable_hash("screen-1"), stable_hash("screen-2"));
        // First eight bytes of SHA-256("abc"), big-endian
        assert_eq!(stable_hash("abc"), 0xba78_16bf_8f01_cfea);
    }
}
