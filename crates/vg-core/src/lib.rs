pub mod adapter;
pub mod artifact;
pub mod codec;
pub mod condition;
pub mod dimensions;
pub mod error;
pub mod latent;
pub mod lifecycle;
pub mod model;
pub mod pipeline;
pub mod request;
pub mod rng;
#[cfg(test)]
mod tests;
mod model_types;

pub use model_types::{ComputeDevice, DevicePlacement, ModelVariant, Precision};
