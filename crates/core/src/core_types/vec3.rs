//! Vector and frame aliases for positions, directions and grid placement.

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

/// 3D vector type for positions and directions.
///
/// All world-space quantities are in centimetres, Z up.
pub type Vec3 = Vector3<f32>;

/// Rigid transform (translation + rotation, unit scale).
///
/// Maps grid-local coordinates to world space for baked fields and volumes.
pub type Frame = Isometry3<f32>;

/// Build a frame from an origin and a roll/pitch/yaw rotation in degrees.
pub fn frame_from_degrees(origin: Vec3, rotation_deg: [f32; 3]) -> Frame {
    Isometry3::from_parts(Translation3::from(origin), rotation_from_degrees(rotation_deg))
}

/// Rotation from roll/pitch/yaw in degrees (about X, Y, Z).
pub fn rotation_from_degrees(rotation_deg: [f32; 3]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(
        rotation_deg[0].to_radians(),
        rotation_deg[1].to_radians(),
        rotation_deg[2].to_radians(),
    )
}

/// Roll/pitch/yaw in degrees for a rotation.
pub fn rotation_to_degrees(rotation: &UnitQuaternion<f32>) -> [f32; 3] {
    let (roll, pitch, yaw) = rotation.euler_angles();
    [roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()]
}
