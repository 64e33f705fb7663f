//! Rigid transforms used for skinning: dual quaternions, 3x4 matrices, and the common
//! `SkinTransform` interface the pose and blend code is written against.

use glam::{Affine3A, Mat3A, Quat, Vec3, Vec3A};
use std::ops::Mul;

/// Hamilton product on raw components. Dual parts are not unit quaternions, so this never
/// assumes normalized inputs.
#[inline]
fn qmul(a: Quat, b: Quat) -> Quat {
    Quat::from_xyzw(
        a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
        a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
        a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
    )
}

#[inline]
fn pure(v: Vec3) -> Quat {
    Quat::from_xyzw(v.x, v.y, v.z, 0.0)
}

/// Rebuilds a unit quaternion from its vector part, the way IQM and MD5 store orientations.
/// The scalar part is taken as non-positive.
pub fn quat_from_xyz(x: f32, y: f32, z: f32) -> Quat {
    let w = 1.0 - x * x - y * y - z * z;
    let w = if w < 0.0 { 0.0 } else { -w.sqrt() };
    Quat::from_xyzw(x, y, z, w)
}

/// Euler angles (radians, applied X then Y then Z) as used by SMD skeleton keys, converted into
/// the engine's Y-flipped frame.
pub fn quat_from_smd_euler(rot: Vec3) -> Quat {
    let (sx, cx) = (rot.x * 0.5).sin_cos();
    let (sy, cy) = (rot.y * 0.5).sin_cos();
    let (sz, cz) = (rot.z * 0.5).sin_cos();
    Quat::from_xyzw(
        -(sx * cy * cz - cx * sy * sz),
        cx * sy * cz + sx * cy * sz,
        -(cx * cy * sz - sx * sy * cz),
        cx * cy * cz + sx * sy * sz,
    )
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DualQuat {
    pub real: Quat,
    pub dual: Quat,
}

impl Default for DualQuat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl DualQuat {
    pub const IDENTITY: Self = Self {
        real: Quat::IDENTITY,
        dual: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
    };

    pub fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self {
            real: rotation,
            dual: qmul(pure(translation), rotation) * 0.5,
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            real: rotation,
            dual: Quat::from_xyzw(0.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::from_rotation_translation(Quat::IDENTITY, translation)
    }

    pub fn from_affine(m: &Affine3A) -> Self {
        let rotation = Quat::from_mat3a(&m.matrix3).normalize();
        Self::from_rotation_translation(rotation, Vec3::from(m.translation))
    }

    /// Converts to a 3x4 matrix, normalizing first so accumulated blends are valid rotations.
    pub fn to_affine(&self) -> Affine3A {
        let d = self.normalized();
        Affine3A::from_rotation_translation(d.real, d.translation())
    }

    pub fn translation(&self) -> Vec3 {
        let t = qmul(self.dual, self.real.conjugate()) * 2.0;
        Vec3::new(t.x, t.y, t.z)
    }

    pub fn scale(&mut self, k: f32) {
        self.real = self.real * k;
        self.dual = self.dual * k;
    }

    pub fn scaled(mut self, k: f32) -> Self {
        self.scale(k);
        self
    }

    /// Adds `o * k`, flipping the sign of the contribution when `o` lies in the opposite
    /// hemisphere so the blend takes the short way around.
    pub fn accumulate(&mut self, o: &DualQuat, k: f32) {
        let k = if self.real.dot(o.real) < 0.0 { -k } else { k };
        self.real = self.real + o.real * k;
        self.dual = self.dual + o.dual * k;
    }

    pub fn normalize(&mut self) {
        let len = self.real.length();
        if len > 0.0 {
            let inv = 1.0 / len;
            self.real = self.real * inv;
            self.dual = self.dual * inv;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Inverse of a unit dual quaternion.
    pub fn inverse(&self) -> Self {
        Self {
            real: self.real.conjugate(),
            dual: self.dual.conjugate(),
        }
    }

    /// Negates `self` when it is antipodal to `reference`. Applying it twice is a no-op.
    pub fn fix_antipodal(&mut self, reference: &DualQuat) {
        if self.real.dot(reference.real) < 0.0 {
            self.real = -self.real;
            self.dual = -self.dual;
        }
    }

    pub fn transform_point3(&self, p: Vec3) -> Vec3 {
        self.real * p + self.translation()
    }

    pub fn transform_vector3(&self, v: Vec3) -> Vec3 {
        self.real * v
    }

    /// Pre-multiplies by a translation.
    pub fn translate(&mut self, p: Vec3) {
        self.dual = self.dual + qmul(pure(p), self.real) * 0.5;
    }

    /// Pre-multiplies by a rotation about the origin.
    pub fn mul_orient(&mut self, q: Quat) {
        self.real = qmul(q, self.real);
        self.dual = qmul(q, self.dual);
    }

    /// Rotates the posed result about where `base`'s origin ends up under `self`.
    pub fn mul_orient_about(&mut self, q: Quat, base: &DualQuat) {
        let pivot = self.transform_point3(base.translation());
        let about = DualQuat::from_translation(pivot)
            * DualQuat::from_rotation(q)
            * DualQuat::from_translation(-pivot);
        *self = about * *self;
    }

    pub fn approx_eq(&self, other: &DualQuat, eps: f32) -> bool {
        let a = self.real.to_array().into_iter().chain(self.dual.to_array());
        let b = other.real.to_array().into_iter().chain(other.dual.to_array());
        a.zip(b).all(|(x, y)| (x - y).abs() <= eps)
    }
}

impl Mul for DualQuat {
    type Output = DualQuat;

    fn mul(self, rhs: DualQuat) -> DualQuat {
        DualQuat {
            real: qmul(self.real, rhs.real),
            dual: qmul(self.real, rhs.dual) + qmul(self.dual, rhs.real),
        }
    }
}

/// Which representation the skinning caches hold for the current cache generation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum SkinMode {
    #[default]
    DualQuat,
    Matrix,
}

impl SkinMode {
    pub fn from_mat_skel(mat_skel: bool) -> Self {
        if mat_skel {
            SkinMode::Matrix
        } else {
            SkinMode::DualQuat
        }
    }

    /// float4 registers one bone occupies in the shader bone array.
    pub fn float4s_per_bone(self) -> usize {
        match self {
            SkinMode::DualQuat => 2,
            SkinMode::Matrix => 3,
        }
    }
}

/// Operations the pose interpolation, blending and vertex skinning code needs from a bone
/// transform. Implemented for dual quaternions and 3x4 matrices.
pub trait SkinTransform: Copy + Default + std::fmt::Debug {
    const MODE: SkinMode;

    fn from_dual_quat(d: &DualQuat) -> Self;
    fn from_affine(m: &Affine3A) -> Self;
    fn compose(parent: &Self, child: &Self) -> Self;
    fn scaled(&self, k: f32) -> Self;
    fn accumulate(&mut self, o: &Self, k: f32);
    fn normalize(&mut self);
    fn fix_antipodal(&mut self, reference: &Self);
    /// Applies a procedural rotation about the posed position of `base`'s origin.
    fn rotate_about(&mut self, q: Quat, base: &DualQuat);
    fn transform_point3(&self, p: Vec3) -> Vec3;
    fn transform_vector3(&self, v: Vec3) -> Vec3;
    fn to_affine(&self) -> Affine3A;
    fn write_gpu(&self, out: &mut Vec<[f32; 4]>);
}

impl SkinTransform for DualQuat {
    const MODE: SkinMode = SkinMode::DualQuat;

    fn from_dual_quat(d: &DualQuat) -> Self {
        *d
    }

    fn from_affine(m: &Affine3A) -> Self {
        DualQuat::from_affine(m)
    }

    fn compose(parent: &Self, child: &Self) -> Self {
        *parent * *child
    }

    fn scaled(&self, k: f32) -> Self {
        DualQuat::scaled(*self, k)
    }

    fn accumulate(&mut self, o: &Self, k: f32) {
        DualQuat::accumulate(self, o, k);
    }

    fn normalize(&mut self) {
        DualQuat::normalize(self);
    }

    fn fix_antipodal(&mut self, reference: &Self) {
        DualQuat::fix_antipodal(self, reference);
    }

    fn rotate_about(&mut self, q: Quat, base: &DualQuat) {
        self.mul_orient_about(q, base);
    }

    fn transform_point3(&self, p: Vec3) -> Vec3 {
        DualQuat::transform_point3(self, p)
    }

    fn transform_vector3(&self, v: Vec3) -> Vec3 {
        DualQuat::transform_vector3(self, v)
    }

    fn to_affine(&self) -> Affine3A {
        DualQuat::to_affine(self)
    }

    fn write_gpu(&self, out: &mut Vec<[f32; 4]>) {
        out.push(self.real.to_array());
        out.push(self.dual.to_array());
    }
}

impl SkinTransform for Affine3A {
    const MODE: SkinMode = SkinMode::Matrix;

    fn from_dual_quat(d: &DualQuat) -> Self {
        d.to_affine()
    }

    fn from_affine(m: &Affine3A) -> Self {
        *m
    }

    fn compose(parent: &Self, child: &Self) -> Self {
        *parent * *child
    }

    fn scaled(&self, k: f32) -> Self {
        Affine3A {
            matrix3: self.matrix3 * k,
            translation: self.translation * k,
        }
    }

    fn accumulate(&mut self, o: &Self, k: f32) {
        self.matrix3 = self.matrix3 + o.matrix3 * k;
        self.translation += o.translation * k;
    }

    fn normalize(&mut self) {}

    fn fix_antipodal(&mut self, _reference: &Self) {}

    fn rotate_about(&mut self, q: Quat, base: &DualQuat) {
        let pivot = Vec3A::from(self.transform_point3(base.translation()));
        let rot = Mat3A::from_quat(q);
        *self = Affine3A {
            matrix3: rot * self.matrix3,
            translation: rot * (self.translation - pivot) + pivot,
        };
    }

    fn transform_point3(&self, p: Vec3) -> Vec3 {
        Affine3A::transform_point3(self, p)
    }

    fn transform_vector3(&self, v: Vec3) -> Vec3 {
        Affine3A::transform_vector3(self, v)
    }

    fn to_affine(&self) -> Affine3A {
        *self
    }

    fn write_gpu(&self, out: &mut Vec<[f32; 4]>) {
        for i in 0..3 {
            let row = self.matrix3.row(i);
            out.push([row.x, row.y, row.z, self.translation[i]]);
        }
    }
}

/// A single bone transform in whichever representation the skeleton currently skins with.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BoneTransform {
    Matrix(Affine3A),
    DualQuat(DualQuat),
}

impl BoneTransform {
    pub fn to_affine(&self) -> Affine3A {
        match self {
            BoneTransform::Matrix(m) => *m,
            BoneTransform::DualQuat(d) => d.to_affine(),
        }
    }

    pub fn transform_point3(&self, p: Vec3) -> Vec3 {
        match self {
            BoneTransform::Matrix(m) => m.transform_point3(p),
            BoneTransform::DualQuat(d) => d.transform_point3(p),
        }
    }
}

/// Per-interp-bone transforms held by a pose or blend cache slot.
#[derive(Clone, Debug, PartialEq)]
pub enum BoneTransforms {
    Matrix(Vec<Affine3A>),
    DualQuat(Vec<DualQuat>),
}

impl Default for BoneTransforms {
    fn default() -> Self {
        BoneTransforms::DualQuat(Vec::new())
    }
}

impl BoneTransforms {
    pub fn mode(&self) -> SkinMode {
        match self {
            BoneTransforms::Matrix(_) => SkinMode::Matrix,
            BoneTransforms::DualQuat(_) => SkinMode::DualQuat,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BoneTransforms::Matrix(v) => v.len(),
            BoneTransforms::DualQuat(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<BoneTransform> {
        match self {
            BoneTransforms::Matrix(v) => v.get(index).copied().map(BoneTransform::Matrix),
            BoneTransforms::DualQuat(v) => v.get(index).copied().map(BoneTransform::DualQuat),
        }
    }

    /// Appends the shader register layout of `range` to `out`.
    pub fn write_gpu(&self, range: std::ops::Range<usize>, out: &mut Vec<[f32; 4]>) {
        match self {
            BoneTransforms::Matrix(v) => v[range].iter().for_each(|m| m.write_gpu(out)),
            BoneTransforms::DualQuat(v) => v[range].iter().for_each(|d| d.write_gpu(out)),
        }
    }
}

pub(crate) trait TransformStore: SkinTransform {
    fn slice(data: &BoneTransforms) -> Option<&[Self]>;
    /// Takes the backing vector out of `data` for reuse, or a fresh one on a mode change.
    fn take_vec(data: &mut BoneTransforms) -> Vec<Self>;
    fn wrap(v: Vec<Self>) -> BoneTransforms;
}

impl TransformStore for DualQuat {
    fn slice(data: &BoneTransforms) -> Option<&[Self]> {
        match data {
            BoneTransforms::DualQuat(v) => Some(v),
            BoneTransforms::Matrix(_) => None,
        }
    }

    fn take_vec(data: &mut BoneTransforms) -> Vec<Self> {
        match std::mem::take(data) {
            BoneTransforms::DualQuat(v) => v,
            BoneTransforms::Matrix(_) => Vec::new(),
        }
    }

    fn wrap(v: Vec<Self>) -> BoneTransforms {
        BoneTransforms::DualQuat(v)
    }
}

impl TransformStore for Affine3A {
    fn slice(data: &BoneTransforms) -> Option<&[Self]> {
        match data {
            BoneTransforms::Matrix(v) => Some(v),
            BoneTransforms::DualQuat(_) => None,
        }
    }

    fn take_vec(data: &mut BoneTransforms) -> Vec<Self> {
        match std::mem::take(data) {
            BoneTransforms::Matrix(v) => v,
            BoneTransforms::DualQuat(_) => Vec::new(),
        }
    }

    fn wrap(v: Vec<Self>) -> BoneTransforms {
        BoneTransforms::Matrix(v)
    }
}

/// Orthonormal frame of a triangle: first axis along `b - a`, third along the face normal.
pub fn triangle_frame(a: Vec3, b: Vec3, c: Vec3) -> Mat3A {
    let x = (b - a).normalize_or_zero();
    let z = x.cross(c - a).normalize_or_zero();
    let y = z.cross(x);
    Mat3A::from_cols(x.into(), y.into(), z.into())
}
