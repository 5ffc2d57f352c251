// Numerical building blocks, leaves first: buffers, colour conversion, kernels,
// then the individual enhancement stages.

pub mod plane;
pub mod frame;
pub mod color_space;
pub mod convolution;
pub mod illumination;
pub mod reflectance;
pub mod exposure;
pub mod highlight;
pub mod detail;
pub mod chroma;
pub mod denoise;
pub mod equalize;
pub mod power_law;
pub mod filters;
