//! Core spatial types and handle registries

pub mod aabb;
pub mod handle;
pub mod vec3;

pub use aabb::Aabb;
pub use handle::{Handle, Registry};
pub use vec3::{frame_from_degrees, rotation_from_degrees, rotation_to_degrees, Frame, Vec3};
