use crate::test_fixtures::{assert_approx, assert_vec3_approx};
use crate::{DualQuat, SkinMode, SkinTransform, quat_from_smd_euler, quat_from_xyz, triangle_frame};
use glam::{Affine3A, Quat, Vec3};
use std::f32::consts::FRAC_PI_2;

fn sample() -> DualQuat {
    DualQuat::from_rotation_translation(
        Quat::from_axis_angle(Vec3::new(1.0, 2.0, 3.0).normalize(), 0.7),
        Vec3::new(4.0, -2.0, 1.5),
    )
}

#[test]
fn dual_quat_transforms_like_the_matching_matrix() {
    let d = sample();
    let m = d.to_affine();
    for p in [Vec3::ZERO, Vec3::X, Vec3::new(-3.0, 0.5, 2.0)] {
        assert_vec3_approx(d.transform_point3(p), m.transform_point3(p));
    }
    assert_vec3_approx(d.translation(), Vec3::new(4.0, -2.0, 1.5));
}

#[test]
fn matrix_round_trip_keeps_the_transform() {
    let d = sample();
    let back = DualQuat::from_affine(&d.to_affine());
    let p = Vec3::new(1.0, 2.0, 3.0);
    assert_vec3_approx(back.transform_point3(p), d.transform_point3(p));
}

#[test]
fn composition_applies_the_right_operand_first() {
    let a = DualQuat::from_rotation(Quat::from_rotation_z(FRAC_PI_2));
    let b = DualQuat::from_translation(Vec3::X);
    // translate, then rotate
    assert_vec3_approx((a * b).transform_point3(Vec3::ZERO), Vec3::Y);
    assert_vec3_approx((b * a).transform_point3(Vec3::ZERO), Vec3::X);
}

#[test]
fn inverse_undoes_a_unit_dual_quat() {
    let d = sample();
    let p = Vec3::new(0.25, -1.0, 7.0);
    assert_vec3_approx((d * d.inverse()).transform_point3(p), p);
    assert_vec3_approx(d.inverse().transform_point3(d.transform_point3(p)), p);
}

#[test]
fn accumulate_takes_the_short_way_around() {
    let d = sample();
    let flipped = DualQuat {
        real: -d.real,
        dual: -d.dual,
    };
    let mut sum = d.scaled(0.5);
    sum.accumulate(&flipped, 0.5);
    sum.normalize();
    assert!(sum.approx_eq(&d, 1e-4), "{sum:?} vs {d:?}");
}

#[test]
fn fix_antipodal_is_idempotent() {
    let reference = sample();
    let mut d = DualQuat {
        real: -reference.real,
        dual: -reference.dual,
    };
    d.fix_antipodal(&reference);
    assert!(d.real.dot(reference.real) > 0.0);
    let once = d;
    d.fix_antipodal(&reference);
    assert_eq!(d, once);
}

#[test]
fn quat_from_xyz_rebuilds_a_non_positive_scalar() {
    let q = quat_from_xyz(0.5, 0.5, 0.5);
    assert_approx(q.w, -0.5);
    assert_approx(q.length(), 1.0);

    let over = quat_from_xyz(1.0, 1.0, 0.0);
    assert_eq!(over.w, 0.0);
}

#[test]
fn smd_euler_rotation_is_mirrored_into_the_engine_frame() {
    let q = quat_from_smd_euler(Vec3::new(-FRAC_PI_2, 0.0, 0.0));
    assert_vec3_approx(q * Vec3::Z, Vec3::NEG_Y);
}

#[test]
fn rotate_about_agrees_between_representations() {
    let pose = DualQuat::from_rotation_translation(Quat::from_rotation_x(0.3), Vec3::new(1.0, 0.0, 0.0));
    let base = DualQuat::from_translation(Vec3::new(0.0, 1.0, 0.0));
    let q = Quat::from_rotation_z(FRAC_PI_2);

    let mut d = pose;
    SkinTransform::rotate_about(&mut d, q, &base);
    let mut m = pose.to_affine();
    SkinTransform::rotate_about(&mut m, q, &base);

    // the pivot itself stays put
    let pivot = pose.transform_point3(base.translation());
    assert_vec3_approx(d.transform_point3(base.translation()), pivot);
    for p in [Vec3::ZERO, Vec3::new(2.0, -1.0, 0.5)] {
        assert_vec3_approx(d.transform_point3(p), m.transform_point3(p));
    }
}

#[test]
fn gpu_layout_matches_the_skin_mode() {
    assert_eq!(SkinMode::DualQuat.float4s_per_bone(), 2);
    assert_eq!(SkinMode::Matrix.float4s_per_bone(), 3);

    let d = DualQuat::from_translation(Vec3::new(1.0, 2.0, 3.0));
    let mut out = Vec::new();
    SkinTransform::write_gpu(&d, &mut out);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], d.real.to_array());

    let m = Affine3A::from_translation(Vec3::new(1.0, 2.0, 3.0));
    let mut out = Vec::new();
    m.write_gpu(&mut out);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], [1.0, 0.0, 0.0, 1.0]);
    assert_eq!(out[1], [0.0, 1.0, 0.0, 2.0]);
    assert_eq!(out[2], [0.0, 0.0, 1.0, 3.0]);
}

#[test]
fn triangle_frame_is_orthonormal_with_the_face_normal_last() {
    let f = triangle_frame(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 3.0, 0.0));
    assert_vec3_approx(f.x_axis.into(), Vec3::X);
    assert_vec3_approx(f.y_axis.into(), Vec3::Y);
    assert_vec3_approx(f.z_axis.into(), Vec3::Z);
}
