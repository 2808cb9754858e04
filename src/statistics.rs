use statrs::statistics::Statistics;

/// Mean of the finite values, `None` when there are none.
pub fn mean(values: &[f64]) -> Option<f64> {
    let finite = finite(values);
    if finite.is_empty() {
        return None;
    }
    Some(finite.mean())
}

/// Sample standard deviation of the finite values, `None` below two points.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let finite = finite(values);
    if finite.len() < 2 {
        return None;
    }
    let value = finite.std_dev();
    value.is_finite().then_some(value)
}

/// Non-annualized mean / stdev; 0 when the deviation is zero or undefined.
pub fn mean_over_std(values: &[f64]) -> f64 {
    match (mean(values), std_dev(values)) {
        (Some(mean), Some(std_dev)) if std_dev > f64::EPSILON => mean / std_dev,
        _ => 0.0,
    }
}

/// Pearson correlation over paired samples. `None` when fewer than two pairs
/// remain or either side has no variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = xs
        .iter()
        .zip(ys.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .unzip();
    if xs.len() < 2 {
        return None;
    }

    let sd_x = xs.iter().std_dev();
    let sd_y = ys.iter().std_dev();
    if !(sd_x > f64::EPSILON && sd_y > f64::EPSILON) {
        return None;
    }
    let r = xs.iter().covariance(ys.iter()) / (sd_x * sd_y);
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}
