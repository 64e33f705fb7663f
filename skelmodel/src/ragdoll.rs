//! Ragdoll definitions attached to a skeleton, and the per-entity state the physics side
//! writes into.
//!
//! The simulation itself lives outside this crate. It moves `RagdollData::verts` and calls
//! `RagdollData::moved`; the skeleton then derives bone transforms from the vertex triangles.

use crate::ids::next_ragdoll_id;
use crate::{Placement, SkinTransform, triangle_frame};
use glam::{Affine3A, Mat3A, Quat, Vec3};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RagdollVert {
    pub pos: Vec3,
    pub radius: f32,
    /// Share of this vertex owned by each joint that references it.
    pub weight: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RagdollTri {
    pub vert: [usize; 3],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RagdollJoint {
    pub bone: usize,
    pub tri: usize,
    pub vert: [Option<usize>; 3],
    pub weight: f32,
    /// Maps model space at bind pose into the joint triangle's frame.
    pub orient: Affine3A,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DistLimit {
    pub vert: [usize; 2],
    pub min_dist: f32,
    pub max_dist: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RotLimit {
    pub tri: [usize; 2],
    /// Radians.
    pub max_angle: f32,
    pub middle: Mat3A,
}

/// A bone that follows a ragdoll joint rigidly.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RelJoint {
    pub bone: usize,
    /// Index into `RagdollSkel::joints`.
    pub parent: usize,
}

#[derive(Clone, Debug)]
pub struct RagdollSkel {
    pub id: u32,
    pub loaded: bool,
    pub eye: Option<usize>,
    pub verts: Vec<RagdollVert>,
    pub tris: Vec<RagdollTri>,
    pub joints: Vec<RagdollJoint>,
    pub dist_limits: Vec<DistLimit>,
    pub rot_limits: Vec<RotLimit>,
    pub rel_joints: Vec<RelJoint>,
    pub anim_joints: bool,
}

impl Default for RagdollSkel {
    fn default() -> Self {
        Self::new()
    }
}

impl RagdollSkel {
    pub fn new() -> Self {
        Self {
            id: next_ragdoll_id(),
            loaded: false,
            eye: None,
            verts: Vec::new(),
            tris: Vec::new(),
            joints: Vec::new(),
            dist_limits: Vec::new(),
            rot_limits: Vec::new(),
            rel_joints: Vec::new(),
            anim_joints: false,
        }
    }

    pub fn add_vert(&mut self, pos: Vec3, radius: f32) {
        self.verts.push(RagdollVert {
            pos,
            radius: if radius > 0.0 { radius } else { 1.0 },
            weight: 0.0,
        });
    }

    pub fn add_tri(&mut self, v1: usize, v2: usize, v3: usize) {
        self.tris.push(RagdollTri {
            vert: [v1, v2, v3],
        });
    }

    /// Negative vertex indices mean "unused".
    pub fn add_joint(&mut self, bone: usize, tri: usize, verts: [i32; 3]) {
        self.joints.push(RagdollJoint {
            bone,
            tri,
            vert: verts.map(|v| usize::try_from(v).ok()),
            weight: 0.0,
            orient: Affine3A::IDENTITY,
        });
    }

    pub fn add_dist_limit(&mut self, v1: usize, v2: usize, min_dist: f32, max_dist: f32) {
        self.dist_limits.push(DistLimit {
            vert: [v1, v2],
            min_dist,
            max_dist: max_dist.max(min_dist),
        });
    }

    /// `max_angle` in degrees; `middle` is the rest rotation between the two triangles.
    pub fn add_rot_limit(&mut self, t1: usize, t2: usize, max_angle: f32, middle: Quat) {
        self.rot_limits.push(RotLimit {
            tri: [t1, t2],
            max_angle: max_angle.to_radians(),
            middle: Mat3A::from_quat(middle),
        });
    }

    pub(crate) fn add_rel_joint(&mut self, bone: usize, parent: usize) {
        self.rel_joints.push(RelJoint { bone, parent });
    }

    fn tri_frame(&self, tri: usize, pos: impl Fn(usize) -> Vec3) -> Mat3A {
        match self.tris.get(tri) {
            Some(t) => triangle_frame(pos(t.vert[0]), pos(t.vert[1]), pos(t.vert[2])),
            None => Mat3A::IDENTITY,
        }
    }

    fn joint_center(&self, joint: &RagdollJoint, pos: impl Fn(usize) -> Vec3) -> Vec3 {
        joint
            .vert
            .iter()
            .flatten()
            .fold(Vec3::ZERO, |acc, &v| acc + pos(v))
            * joint.weight
    }

    /// Derives vertex and joint weights and each joint's bind orientation. Drops references to
    /// vertices, triangles or bones that do not exist.
    pub fn setup(&mut self, num_bones: usize) {
        let num_verts = self.verts.len();
        self.tris
            .retain(|t| t.vert.iter().all(|&v| v < num_verts));
        let num_tris = self.tris.len();
        self.joints
            .retain(|j| j.bone < num_bones && j.tri < num_tris);

        let mut uses = vec![0u32; num_verts];
        for joint in &mut self.joints {
            for v in &mut joint.vert {
                if v.is_some_and(|v| v >= num_verts) {
                    *v = None;
                }
            }
            let count = joint.vert.iter().flatten().count();
            joint.weight = if count > 0 { 1.0 / count as f32 } else { 0.0 };
            for &v in joint.vert.iter().flatten() {
                uses[v] += 1;
            }
        }
        for (vert, &n) in self.verts.iter_mut().zip(&uses) {
            vert.weight = if n > 0 { 1.0 / n as f32 } else { 0.0 };
        }

        let bind = |v: usize| self.verts[v].pos;
        let orients: Vec<Affine3A> = self
            .joints
            .iter()
            .map(|j| {
                let frame = self.tri_frame(j.tri, bind);
                Affine3A::from_mat3_translation(frame.into(), self.joint_center(j, bind))
                    .inverse()
            })
            .collect();
        for (joint, orient) in self.joints.iter_mut().zip(orients) {
            joint.orient = orient;
        }
        self.rel_joints.clear();
        self.loaded = true;
    }
}

/// Per-entity ragdoll state. Vertex positions are in scaled model space.
#[derive(Clone, Debug)]
pub struct RagdollData {
    pub id: u32,
    /// `RagdollSkel::id` this state was created for.
    pub skel_id: u32,
    pub verts: Vec<Vec3>,
    pub tris: Vec<Mat3A>,
    pub anim_joints: Option<Vec<Affine3A>>,
    pub rel_joints: Vec<Affine3A>,
    pub last_move: i32,
}

impl RagdollData {
    pub fn new(skel: &RagdollSkel) -> Self {
        Self {
            id: next_ragdoll_id(),
            skel_id: skel.id,
            verts: vec![Vec3::ZERO; skel.verts.len()],
            tris: vec![Mat3A::IDENTITY; skel.tris.len()],
            anim_joints: skel.anim_joints.then(|| vec![Affine3A::IDENTITY; skel.joints.len()]),
            rel_joints: vec![Affine3A::IDENTITY; skel.rel_joints.len()],
            last_move: 0,
        }
    }

    pub fn calc_tris(&mut self, skel: &RagdollSkel) {
        let verts = &self.verts;
        for (dst, t) in self.tris.iter_mut().zip(&skel.tris) {
            *dst = triangle_frame(verts[t.vert[0]], verts[t.vert[1]], verts[t.vert[2]]);
        }
    }

    /// Called by the physics side after it has moved `verts`.
    pub fn moved(&mut self, skel: &RagdollSkel, millis: i32) {
        self.calc_tris(skel);
        self.last_move = millis;
    }

    /// Seeds the vertices, animated joints and relative joints from a computed pose, so the
    /// simulation starts from the animated pose. `pose` is indexed by bone interp index.
    pub(crate) fn init_from_pose<T: SkinTransform>(
        &mut self,
        skel: &RagdollSkel,
        bone_slots: &[Option<usize>],
        pose: &[T],
        placement: &Placement,
        millis: i32,
    ) {
        let slot = |bone: usize| bone_slots.get(bone).copied().flatten();
        self.verts.iter_mut().for_each(|v| *v = Vec3::ZERO);
        for joint in &skel.joints {
            let Some(t) = slot(joint.bone).and_then(|i| pose.get(i)) else {
                continue;
            };
            for &v in joint.vert.iter().flatten() {
                let src = &skel.verts[v];
                self.verts[v] += t.transform_point3(src.pos) * src.weight;
            }
        }

        if let Some(anim_joints) = &mut self.anim_joints {
            let verts = &self.verts;
            for (dst, joint) in anim_joints.iter_mut().zip(&skel.joints) {
                let Some(t) = slot(joint.bone).and_then(|i| pose.get(i)) else {
                    continue;
                };
                let frame = skel.tri_frame(joint.tri, |v| verts[v]);
                let center = skel.joint_center(joint, |v| verts[v]);
                *dst = Affine3A::from_mat3_translation(frame.into(), center).inverse()
                    * t.to_affine();
            }
        }

        for v in &mut self.verts {
            *v = placement.to_model(*v);
        }

        for (dst, rel) in self.rel_joints.iter_mut().zip(&skel.rel_joints) {
            let parent_bone = skel.joints[rel.parent].bone;
            if let (Some(p), Some(b)) = (
                slot(parent_bone).and_then(|i| pose.get(i)),
                slot(rel.bone).and_then(|i| pose.get(i)),
            ) {
                *dst = p.to_affine().inverse() * b.to_affine();
            }
        }

        self.moved(skel, millis);
    }

    /// Writes joint and relative-joint bone transforms derived from the current vertices.
    pub(crate) fn gen_bones<T: SkinTransform>(
        &self,
        skel: &RagdollSkel,
        bone_slots: &[Option<usize>],
        pose: &mut [T],
        placement: &Placement,
    ) {
        let slot = |bone: usize| bone_slots.get(bone).copied().flatten();
        for (i, joint) in skel.joints.iter().enumerate() {
            let Some(index) = slot(joint.bone).filter(|&s| s < pose.len()) else {
                continue;
            };
            let center = placement.from_model(skel.joint_center(joint, |v| self.verts[v]));
            let frame = self.tris.get(joint.tri).copied().unwrap_or(Mat3A::IDENTITY);
            let orient = self
                .anim_joints
                .as_ref()
                .and_then(|a| a.get(i))
                .copied()
                .unwrap_or(joint.orient);
            let m = Affine3A::from_mat3_translation(frame.into(), center) * orient;
            pose[index] = T::from_affine(&m);
        }
        for (rel, m) in skel.rel_joints.iter().zip(&self.rel_joints) {
            let parent = slot(skel.joints[rel.parent].bone).filter(|&p| p < pose.len());
            let child = slot(rel.bone).filter(|&c| c < pose.len());
            if let (Some(p), Some(c)) = (parent, child) {
                pose[c] = T::compose(&pose[p], &T::from_affine(m));
            }
        }
    }
}
