//! Small numeric helpers shared by the search and the deadlock index.

/// Numerically stable softmax.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the category the uniform draw `r in [0, 1)` falls into.
pub fn sample_categorical(probs: &[f64], r: f64) -> usize {
    debug_assert!(!probs.is_empty());
    let mut acc = 0.0;
    let mut below = 0;
    for &p in probs {
        acc += p;
        if acc < r {
            below += 1;
        }
    }
    below.min(probs.len() - 1)
}

/// Binomial coefficient, saturating instead of overflowing.
pub fn binom(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: usize = 1;
    for i in 0..k {
        result = match result.checked_mul(n - i) {
            Some(v) => v / (i + 1),
            None => return usize::MAX,
        };
    }
    result
}
