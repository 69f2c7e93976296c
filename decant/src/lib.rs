#[cfg(feature = "decant-base")]
pub use decant_base as base;

#[cfg(feature = "decant-loader")]
pub use decant_loader as loader;
