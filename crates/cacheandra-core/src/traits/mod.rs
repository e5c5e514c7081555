//! Trait seams between the coordinator and its collaborators

mod serializer;
mod tier;

pub use serializer::{JsonSerializer, Serializer};
pub use tier::{DurableTier, FastTier};
