use crate::DualQuat;
use glam::{Quat, Vec3};

/// Sentinel for `BoneInfo::group` meaning "not part of any antipodal conflict".
pub(crate) const GROUP_UNSET: i32 = i32::MAX;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PitchParams {
    pub scale: f32,
    pub offset: f32,
    pub min: f32,
    pub max: f32,
}

impl PitchParams {
    /// Builds pitch parameters; when both limits are zero the angle is clamped to
    /// `+-360 * scale` instead.
    pub fn new(scale: f32, offset: f32, min: f32, max: f32) -> Self {
        if min != 0.0 || max != 0.0 {
            Self {
                scale,
                offset,
                min,
                max,
            }
        } else {
            Self {
                scale,
                offset,
                min: -360.0 * scale,
                max: 360.0 * scale,
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.scale != 0.0
    }

    /// Pitch correction angle in degrees for an entity pitch.
    pub fn angle(&self, pitch: f32) -> f32 {
        let angle = self.scale * pitch + self.offset;
        if self.min != 0.0 || self.max != 0.0 {
            angle.min(self.max).max(self.min)
        } else {
            angle
        }
    }
}

#[derive(Clone, Debug)]
pub struct BoneInfo {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Option<usize>,
    pub next: Option<usize>,
    pub base: DualQuat,
    pub inv_base: DualQuat,
    pub pitch: PitchParams,
    /// Dense slot in the interpolated-bone arrays, assigned by `Skeleton::remap_bones`.
    pub interp_index: Option<usize>,
    pub interp_parent: Option<usize>,
    pub ragdoll_index: Option<usize>,
    pub(crate) group: i32,
    pub(crate) scheduled: Option<usize>,
}

impl BoneInfo {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            children: None,
            next: None,
            base: DualQuat::IDENTITY,
            inv_base: DualQuat::IDENTITY,
            pitch: PitchParams::default(),
            interp_index: None,
            interp_parent: None,
            ragdoll_index: None,
            group: GROUP_UNSET,
            scheduled: None,
        }
    }

    pub fn set_base(&mut self, base: DualQuat) {
        self.base = base;
        self.inv_base = base.inverse();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub bone: usize,
}

/// A named range of frames in a skeleton's frame store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnimSpec {
    pub name: String,
    pub frame: usize,
    pub range: usize,
}

/// Interp-index pair whose child must be sign-aligned with its parent after interpolation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Antipode {
    pub parent: usize,
    pub child: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vert {
    pub pos: Vec3,
    pub norm: Vec3,
    pub u: f32,
    pub v: f32,
    /// Index into the owning mesh group's blend table.
    pub blend: usize,
    /// Resolved bone or blend slot for CPU skinning.
    pub interp_index: usize,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BumpVert {
    pub tangent: Vec3,
    pub bitangent: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Tri {
    pub vert: [u32; 3],
}

/// Load-time correction applied to one bone's animated frames before the inverse bind pose.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct BoneAdjustment {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub translate: Vec3,
}

impl BoneAdjustment {
    pub fn apply(&self, d: &mut DualQuat) {
        if self.yaw != 0.0 {
            d.mul_orient(Quat::from_axis_angle(Vec3::Z, self.yaw.to_radians()));
        }
        if self.pitch != 0.0 {
            d.mul_orient(Quat::from_axis_angle(Vec3::NEG_Y, self.pitch.to_radians()));
        }
        if self.roll != 0.0 {
            d.mul_orient(Quat::from_axis_angle(Vec3::NEG_X, self.roll.to_radians()));
        }
        if self.translate != Vec3::ZERO {
            d.translate(self.translate);
        }
    }
}

/// Adjustments indexed by bone; missing entries mean no correction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Adjustments(pub Vec<BoneAdjustment>);

impl Adjustments {
    pub fn set(&mut self, bone: usize, adjustment: BoneAdjustment) {
        if self.0.len() <= bone {
            self.0.resize(bone + 1, BoneAdjustment::default());
        }
        self.0[bone] = adjustment;
    }

    pub fn apply(&self, bone: usize, d: &mut DualQuat) {
        if let Some(adj) = self.0.get(bone) {
            adj.apply(d);
        }
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Where a part sits inside its model: part translation and model scale.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Placement {
    pub translate: Vec3,
    pub scale: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            translate: Vec3::ZERO,
            scale: 1.0,
        }
    }
}

impl Placement {
    pub fn to_model(&self, p: Vec3) -> Vec3 {
        (p + self.translate) * self.scale
    }

    pub fn from_model(&self, p: Vec3) -> Vec3 {
        p / self.scale - self.translate
    }
}
