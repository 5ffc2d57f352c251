// THEORY:
// Luminance transforms amplify colour noise along with detail. The chroma cleaner
// median-filters both chrominance planes: a median removes impulse-like colour
// speckle without smearing colour edges the way a mean would.
//
// The two planes are independent, so they are filtered side by side with
// `rayon::join`.

use crate::core_modules::color_space::ChromaPair;
use crate::core_modules::convolution::median_filter;

/// Kernels below this leave chroma untouched.
pub const MIN_KERNEL: usize = 3;

/// The odd kernel actually used for a requested size, or `None` when disabled.
pub fn effective_kernel(k: usize) -> Option<usize> {
    if k < MIN_KERNEL {
        None
    } else if k % 2 == 0 {
        Some(k + 1)
    } else {
        Some(k)
    }
}

/// Median-filters each chrominance plane with a `k` x `k` window (even `k` is
/// rounded up to the next odd size). Identity when `k < 3`.
pub fn clean_chroma(chroma: &ChromaPair, k: usize) -> ChromaPair {
    let Some(kernel) = effective_kernel(k) else {
        return chroma.clone();
    };
    let (first, second) = rayon::join(
        || median_filter(&chroma.first, kernel),
        || median_filter(&chroma.second, kernel),
    );
    ChromaPair { first, second }
}
