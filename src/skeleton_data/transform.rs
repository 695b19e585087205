use super::bone::RawBone;

/// Bone-local transform with angles already converted to radians.
#[derive(Copy, Clone, Debug)]
pub struct LocalTransform {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub scale_x: f32,
    pub scale_y: f32,
    pub shear_x: f32,
    pub shear_y: f32,
}

impl From<&RawBone> for LocalTransform {
    fn from(bone: &RawBone) -> Self {
        Self {
            x: bone.x,
            y: bone.y,
            rotation: normalize_radian(bone.rotation.to_radians()),
            scale_x: bone.scale_x,
            scale_y: bone.scale_y,
            shear_x: normalize_radian(bone.shear_x.to_radians()),
            shear_y: normalize_radian(bone.shear_y.to_radians()),
        }
    }
}

impl LocalTransform {
    /// Placement of a region attachment inside its slot's bone.
    pub fn from_placement(x: f32, y: f32, rotation_degrees: f32, scale_x: f32, scale_y: f32) -> Self {
        Self {
            x,
            y,
            rotation: normalize_radian(rotation_degrees.to_radians()),
            scale_x,
            scale_y,
            shear_x: 0.0,
            shear_y: 0.0,
        }
    }

    pub fn to_matrix(&self) -> nalgebra::Matrix3<f32> {
        local_matrix(
            self.x,
            self.y,
            self.rotation,
            self.scale_x,
            self.scale_y,
            self.shear_x,
            self.shear_y,
        )
    }
}

/// Column-form local matrix. The y basis vector sits 90 degrees ahead of the
/// x basis vector; shear skews them independently.
pub fn local_matrix(
    x: f32,
    y: f32,
    rotation: f32,
    scale_x: f32,
    scale_y: f32,
    shear_x: f32,
    shear_y: f32,
) -> nalgebra::Matrix3<f32> {
    let rot_x = rotation + shear_x;
    let rot_y = rotation + std::f32::consts::FRAC_PI_2 + shear_y;
    nalgebra::Matrix3::new(
        rot_x.cos() * scale_x, rot_y.cos() * scale_y, x,
        rot_x.sin() * scale_x, rot_y.sin() * scale_y, y,
        0.0,                   0.0,                   1.0,
    )
}

pub fn normalize_radian(value: f32) -> f32 {
    let value = (value + std::f32::consts::PI) % (std::f32::consts::TAU);
    if value > 0.0 {
        value - std::f32::consts::PI
    } else {
        value + std::f32::consts::PI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_radian_stays_in_half_open_range() {
        for &angle in &[0.5f32, -0.5, 3.5, -3.5, 7.0, 100.0] {
            let normalized = normalize_radian(angle);
            assert!(normalized <= std::f32::consts::PI, "angle {}", angle);
            assert!(normalized >= -std::f32::consts::PI, "angle {}", angle);
            // Same direction modulo a full turn.
            let delta = (normalized - angle).rem_euclid(std::f32::consts::TAU);
            assert!(delta.abs() < 1e-4 || (delta - std::f32::consts::TAU).abs() < 1e-4);
        }
    }

    #[test]
    fn local_matrix_reduces_to_rotation_and_scale_without_shear() {
        let theta = 0.7f32;
        let m = local_matrix(3.0, -2.0, theta, 2.0, 0.5, 0.0, 0.0);
        assert!((m[(0, 0)] - theta.cos() * 2.0).abs() < 1e-5);
        assert!((m[(1, 0)] - theta.sin() * 2.0).abs() < 1e-5);
        assert!((m[(0, 1)] + theta.sin() * 0.5).abs() < 1e-5);
        assert!((m[(1, 1)] - theta.cos() * 0.5).abs() < 1e-5);
        assert!((m[(0, 2)] - 3.0).abs() < 1e-5);
        assert!((m[(1, 2)] + 2.0).abs() < 1e-5);
    }
}
