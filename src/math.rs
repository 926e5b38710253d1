//! Order-statistic helpers for summary quantiles

/// Compute the `q`-quantile of an ascending-sorted sample array
///
/// Uses linear interpolation between the two order statistics adjacent to
/// rank `q * (n - 1)` (the "R-7" method, the same one the usual client
/// libraries document). The median of `[1, 2, 3, 4, 5]` is exactly 3.
///
/// An empty array yields 0; callers are expected to drop empty series
/// before computing quantiles.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let fraction = rank - low as f64;
    if low + 1 < sorted.len() {
        sorted[low] * (1.0 - fraction) + sorted[low + 1] * fraction
    } else {
        sorted[low]
    }
}
