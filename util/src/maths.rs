//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Clamp a value into the range `[min, max]`.
///
/// Unlike `f64::clamp` this does not panic if `min > max`, the upper bound wins.
pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Float,
{
    let mut ret = *value;

    if ret < *min {
        ret = *min
    }
    if ret > *max {
        ret = *max
    }

    ret
}

/// Population mean and standard deviation of a set of values.
///
/// Returns `None` if `values` is empty.
pub fn mean_std<T>(values: &[T]) -> Option<(T, T)>
where
    T: Float + std::iter::Sum,
{
    if values.is_empty() {
        return None;
    }

    let n = T::from(values.len())?;
    let mean = values.iter().copied().sum::<T>() / n;
    let var = values.iter().map(|v| (*v - mean).powi(2)).sum::<T>() / n;

    Some((mean, var.sqrt()))
}
