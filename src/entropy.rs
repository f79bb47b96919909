/// Shannon entropy of a byte slice, in bits per byte (0.0 to 8.0).
///
/// Typical ranges: < 4.0 sparse data or prose, 4.0-6.0 ordinary code,
/// 6.0-7.2 compressed, > 7.2 encrypted or packed payloads.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut freq = [0usize; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in freq.iter().filter(|&&c| c > 0) {
        let p = count as f64 / len;
        entropy -= p * p.log2();
    }

    entropy
}

/// Threshold above which a non-code payload is considered obfuscated or
/// packed for triage purposes.
pub const OBFUSCATED_THRESHOLD: f64 = 7.2;
