// Benchmark objectives shared by the unit tests.

use crate::objective::AddendSum;

pub fn sphere(x: &[f64]) -> f64 {
    x.iter().map(|&xi| xi * xi).sum()
}

pub fn rosenbrock(x: &[f64]) -> f64 {
    x.windows(2)
        .map(|w| (1.0 - w[0]).powi(2) + 100.0 * (w[1] - w[0] * w[0]).powi(2))
        .sum()
}

/// Axis-parallel ellipsoid with condition number 1e6.
pub fn ellipsoid(x: &[f64]) -> f64 {
    let n = x.len();
    if n == 1 {
        return x[0] * x[0];
    }
    x.iter()
        .enumerate()
        .map(|(i, &xi)| 1e6f64.powf(i as f64 / (n - 1) as f64) * xi * xi)
        .sum()
}

/// log(1 + e^z) without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Linearly separable points `(±1, t)` labelled by the sign of the first feature.
pub fn separable_dataset(samples: usize) -> Vec<([f64; 2], f64)> {
    (0..samples)
        .map(|i| {
            let label = if i % 2 == 0 { 1.0 } else { -1.0 };
            let t = -1.0 + 2.0 * (i / 2) as f64 / ((samples / 2).max(2) - 1) as f64;
            ([label, t], label)
        })
        .collect()
}

/// Mean logistic loss over `data` with parameters `(w1, w2, bias)`, one addend per sample.
pub fn logistic_loss(
    data: Vec<([f64; 2], f64)>,
) -> AddendSum<impl Fn(&[f64], usize) -> f64 + Sync> {
    let count = data.len();
    let scale = 1.0 / count as f64;
    AddendSum::new(count, move |w: &[f64], i: usize| {
        let (features, label) = data[i];
        let margin = label * (w[0] * features[0] + w[1] * features[1] + w[2]);
        scale * softplus(-margin)
    })
}
