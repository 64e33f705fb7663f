//! Bone hierarchy, animation frame store and the pose cache.

use crate::cache::{AnimCacheKey, CacheLookup, LruCache, RagdollKey};
use crate::ids::next_part_mask_id;
use crate::math::TransformStore;
use crate::model::GROUP_UNSET;
use crate::{
    AnimSpec, AnimState, Antipode, BlendTable, BoneInfo, BoneTransforms, DualQuat,
    MAX_ANIM_PARTS, Placement, RagdollData, RagdollSkel, RenderPath, SkinMode, SkinningSettings,
    Tag,
};
use glam::{Affine3A, Vec3};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// One `animpart` selection: a bone whose subtree is included, or excluded when `exclude` is set.
/// Entries apply in order, which callers keep sorted by bone index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoneMaskEntry {
    pub exclude: bool,
    pub bone: usize,
}

/// Animation part index per bone. Identical masks are shared and compared by `id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartMask {
    pub id: u32,
    pub bones: Vec<u8>,
}

impl PartMask {
    pub fn part(&self, bone: usize) -> usize {
        self.bones.get(bone).copied().map_or(0, usize::from)
    }
}

/// Everything one pose lookup depends on besides the skeleton itself.
#[derive(Copy, Clone, Debug)]
pub struct PoseRequest<'a> {
    pub states: &'a [AnimState],
    pub pitch: f32,
    pub axis: Vec3,
    pub part_mask: Option<&'a PartMask>,
    pub ragdoll: Option<&'a RagdollData>,
    pub placement: Placement,
    pub millis: i32,
}

#[derive(Debug, Default)]
pub struct Skeleton {
    pub name: Option<String>,
    pub bones: Vec<BoneInfo>,
    /// `frame_bones[frame * num_bones + bone]`, each relative to the bind pose.
    pub frame_bones: Vec<DualQuat>,
    pub num_frames: usize,
    pub anims: Vec<AnimSpec>,
    pub tags: Vec<Tag>,
    pub antipodes: Vec<Antipode>,
    pub ragdoll: Option<RagdollSkel>,
    pub num_interp_bones: usize,
    pub num_gpu_bones: usize,
    users: Vec<Weak<RefCell<BlendTable>>>,
    use_gpu_skel: bool,
    skin_mode: SkinMode,
    pose_cache: LruCache<AnimCacheKey, BoneTransforms>,
    part_masks: Vec<Rc<PartMask>>,
    generation: u64,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    /// Mesh groups sharing this skeleton.
    pub fn shared(&self) -> usize {
        self.users.iter().filter(|u| u.strong_count() > 0).count()
    }

    /// Registers the blend table of a mesh group using this skeleton.
    pub fn add_user(&mut self, table: &Rc<RefCell<BlendTable>>) {
        self.users.retain(|u| u.strong_count() > 0);
        if !self
            .users
            .iter()
            .any(|u| u.upgrade().is_some_and(|t| Rc::ptr_eq(&t, table)))
        {
            self.users.push(Rc::downgrade(table));
        }
    }

    /// Bumped whenever caches derived from this skeleton's poses must be rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn use_gpu_skel(&self) -> bool {
        self.use_gpu_skel
    }

    pub fn skin_mode(&self) -> SkinMode {
        self.skin_mode
    }

    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn find_tag(&self, name: &str) -> Option<usize> {
        self.tags.iter().position(|t| t.name == name)
    }

    /// Returns false when a tag with that name already exists.
    pub fn add_tag(&mut self, name: &str, bone: usize) -> bool {
        if self.find_tag(name).is_some() {
            return false;
        }
        self.tags.push(Tag {
            name: name.to_string(),
            bone,
        });
        true
    }

    /// Looks a clip up by full name. With `by_file`, also matches clips named `name:clip`,
    /// which is how multi-clip files register their animations.
    pub fn find_anim(&self, name: &str, by_file: bool) -> Option<&AnimSpec> {
        self.anims.iter().find(|a| {
            (by_file && a.name.find(':') == Some(name.len()) && a.name.starts_with(name))
                || a.name == name
        })
    }

    /// Appends whole frames for every bone and registers them under `name`. Frames already in
    /// the store keep their indices.
    pub fn add_anim(&mut self, name: &str, frames: Vec<DualQuat>) -> AnimSpec {
        let num_bones = self.num_bones().max(1);
        let range = frames.len() / num_bones;
        let spec = AnimSpec {
            name: name.to_string(),
            frame: self.num_frames,
            range,
        };
        self.frame_bones.extend(frames.into_iter().take(range * num_bones));
        self.num_frames += range;
        self.anims.push(spec.clone());
        spec
    }

    /// First frame already in the store, used as the sign reference for newly loaded frames.
    pub fn reference_frame(&self) -> Option<&[DualQuat]> {
        (self.num_frames > 0).then(|| &self.frame_bones[..self.num_bones()])
    }

    /// Returns the registered mask with these per-bone parts, registering it when new.
    pub fn share_part_mask(&mut self, bones: Vec<u8>) -> Rc<PartMask> {
        if let Some(mask) = self.part_masks.iter().find(|m| m.bones == bones) {
            return Rc::clone(mask);
        }
        let mask = Rc::new(PartMask {
            id: next_part_mask_id(),
            bones,
        });
        self.part_masks.push(Rc::clone(&mask));
        mask
    }

    /// Rebuilds the child and sibling links from the parent indices.
    pub fn link_children(&mut self) {
        for b in &mut self.bones {
            b.children = None;
            b.next = None;
        }
        for i in 0..self.bones.len() {
            if let Some(parent) = self.bones[i].parent {
                self.bones[i].next = self.bones[parent].children;
                self.bones[parent].children = Some(i);
            }
        }
    }

    fn users(&self) -> Vec<Rc<RefCell<BlendTable>>> {
        self.users.iter().filter_map(Weak::upgrade).collect()
    }

    /// Assigns interp indices: blended bones first, then tagged bones, then ragdoll joints, then
    /// any missing ancestors. Also writes each user's combo `interp_bones` and derives the
    /// ragdoll's relative joints and the antipode list.
    pub fn remap_bones(&mut self) {
        for b in &mut self.bones {
            b.interp_index = None;
            b.interp_parent = None;
            b.ragdoll_index = None;
            b.group = GROUP_UNSET;
        }
        self.num_gpu_bones = 0;
        for table in self.users() {
            let mut table = table.borrow_mut();
            for c in &mut table.combos {
                self.assign_combo(c);
            }
        }

        self.num_interp_bones = self.num_gpu_bones;
        for tag in &self.tags {
            let info = &mut self.bones[tag.bone];
            if info.interp_index.is_none() {
                info.interp_index = Some(self.num_interp_bones);
                self.num_interp_bones += 1;
            }
        }
        if let Some(ragdoll) = &self.ragdoll {
            for (i, joint) in ragdoll.joints.iter().enumerate() {
                let info = &mut self.bones[joint.bone];
                if info.interp_index.is_none() {
                    info.interp_index = Some(self.num_interp_bones);
                    self.num_interp_bones += 1;
                }
                info.ragdoll_index = Some(i);
            }
        }
        for i in 0..self.bones.len() {
            if self.bones[i].interp_index.is_none() {
                continue;
            }
            let mut parent = self.bones[i].parent;
            while let Some(p) = parent {
                if self.bones[p].interp_index.is_some() {
                    break;
                }
                self.bones[p].interp_index = Some(self.num_interp_bones);
                self.num_interp_bones += 1;
                parent = self.bones[p].parent;
            }
        }
        for i in 0..self.bones.len() {
            if self.bones[i].interp_index.is_some() {
                self.bones[i].interp_parent =
                    self.bones[i].parent.and_then(|p| self.bones[p].interp_index);
            }
        }

        if let Some(ragdoll) = &mut self.ragdoll {
            ragdoll.rel_joints.clear();
            for (i, info) in self.bones.iter().enumerate() {
                if info.interp_index.is_none() || info.ragdoll_index.is_some() {
                    continue;
                }
                let mut parent = info.parent;
                while let Some(p) = parent {
                    if let Some(joint) = self.bones[p].ragdoll_index {
                        ragdoll.add_rel_joint(i, joint);
                        break;
                    }
                    parent = self.bones[p].parent;
                }
            }
        }
        self.calc_antipodes();
    }

    fn assign_combo(&mut self, c: &mut crate::BlendCombo) {
        for k in 0..4 {
            if c.weights[k] == 0.0 {
                c.interp_bones[k] = if k > 0 { c.interp_bones[k - 1] } else { 0 };
                continue;
            }
            let child = c.bones[k];
            let index = match self.bones[child].interp_index {
                Some(index) => index,
                None => {
                    let index = self.num_gpu_bones;
                    self.bones[child].interp_index = Some(index);
                    self.num_gpu_bones += 1;
                    index
                }
            };
            c.interp_bones[k] = index;
            if self.bones[child].group < 0 {
                continue;
            }
            for l in 0..4 {
                if c.weights[l] == 0.0 {
                    break;
                }
                if l == k {
                    continue;
                }
                let other = c.bones[l];
                let parent = self.bones[child].parent;
                if parent == Some(other)
                    || (parent.is_some() && parent == self.bones[other].parent)
                {
                    self.bones[child].group = -(parent.map_or(0, |p| p as i32));
                    break;
                }
                if self.bones[child].group <= other as i32 {
                    continue;
                }
                let mut ancestor = Some(other);
                while let Some(a) = ancestor {
                    if a <= child {
                        break;
                    }
                    ancestor = self.bones[a].parent;
                }
                if ancestor != Some(child) {
                    self.bones[child].group = other as i32;
                }
            }
        }
    }

    /// Orders the sign fixes so each bone is aligned after the bone it blends against. When the
    /// schedule runs dry, the lowest-indexed outstanding group bone is scheduled next.
    pub fn calc_antipodes(&mut self) {
        self.antipodes.clear();
        let n = self.bones.len() as i32;
        let mut schedule = Vec::new();
        for (i, b) in self.bones.iter_mut().enumerate() {
            if b.group >= n {
                b.scheduled = Some(schedule.len());
                schedule.push(i);
            } else {
                b.scheduled = None;
            }
        }
        let mut i = 0;
        while i < schedule.len() {
            let bone = schedule[i];
            for j in 0..self.bones.len() {
                if self.bones[j].group.unsigned_abs() as usize == bone
                    && self.bones[j].scheduled.is_none()
                {
                    if let (Some(parent), Some(child)) =
                        (self.bones[bone].interp_index, self.bones[j].interp_index)
                    {
                        self.antipodes.push(Antipode { parent, child });
                    }
                    self.bones[j].scheduled = Some(schedule.len());
                    schedule.push(j);
                }
            }
            if i + 1 == schedule.len() {
                let conflict = self
                    .bones
                    .iter()
                    .filter(|b| b.group < n && b.scheduled.is_none())
                    .map(|b| b.group.unsigned_abs() as usize)
                    .min();
                if let Some(conflict) = conflict {
                    if self.bones[conflict].scheduled.is_none() {
                        self.bones[conflict].scheduled = Some(schedule.len());
                        schedule.push(conflict);
                    }
                }
            }
            i += 1;
        }
    }

    /// Run once all users have registered: drops cached poses, prepares the ragdoll and
    /// recomputes the bone remapping.
    pub fn optimize(&mut self) {
        self.cleanup();
        let num_bones = self.num_bones();
        if let Some(ragdoll) = &mut self.ragdoll {
            ragdoll.setup(num_bones);
        }
        self.remap_bones();
    }

    fn expand_bone_mask(&self, expansion: &mut [bool], bone: usize, val: bool) {
        expansion[bone] = val;
        let mut child = self.bones[bone].children;
        while let Some(c) = child {
            self.expand_bone_mask(expansion, c, val);
            child = self.bones[c].next;
        }
    }

    /// Assigns `part_index` to every bone selected by `mask`.
    pub fn apply_bone_mask(&self, mask: &[BoneMaskEntry], part_mask: &mut [u8], part_index: u8) {
        let Some(first) = mask.first() else {
            return;
        };
        let mut expansion = vec![first.exclude; self.num_bones()];
        for entry in mask {
            if entry.bone < expansion.len() {
                self.expand_bone_mask(&mut expansion, entry.bone, !entry.exclude);
            }
        }
        for (dst, &selected) in part_mask.iter_mut().zip(&expansion) {
            if selected {
                *dst = part_index;
            }
        }
    }

    /// Bones available for GPU skinning under `settings`. May be negative on tiny budgets.
    pub fn avail_gpu_bones(settings: &SkinningSettings) -> i32 {
        let per_bone = SkinMode::from_mat_skel(settings.mat_skel).float4s_per_bone() as i32;
        ((settings.max_gpu_params() - settings.reserve_vp_params).min(256) - 10) / per_bone
    }

    pub fn gpu_accelerate(&self, settings: &SkinningSettings) -> bool {
        settings.render_path != RenderPath::FixedFunction
            && self.num_frames > 0
            && settings.gpu_skel
            && (self.num_gpu_bones as i64) <= i64::from(Self::avail_gpu_bones(settings))
    }

    /// True when cached poses were computed for a different skinning path than `settings`
    /// now selects.
    pub fn should_cleanup(&self, settings: &SkinningSettings) -> bool {
        self.num_frames > 0
            && (self.pose_cache.is_empty()
                || self.gpu_accelerate(settings) != self.use_gpu_skel
                || SkinMode::from_mat_skel(settings.mat_skel) != self.skin_mode)
    }

    /// Drops every cached pose and invalidates caches of the mesh groups using this skeleton.
    pub fn cleanup(&mut self) {
        if !self.pose_cache.is_empty() {
            log::debug!(
                "flushing {} cached poses for skeleton {:?}",
                self.pose_cache.len(),
                self.name
            );
        }
        self.pose_cache.clear();
        self.generation += 1;
    }

    pub fn pose(&self, slot: usize) -> Option<&BoneTransforms> {
        self.pose_cache.slot(slot).map(|s| &s.value)
    }

    pub fn pose_key(&self, slot: usize) -> Option<&AnimCacheKey> {
        self.pose_cache.slot(slot).and_then(|s| s.key.as_ref())
    }

    pub fn pose_cache_len(&self) -> usize {
        self.pose_cache.len()
    }

    fn bone_slots(&self) -> Vec<Option<usize>> {
        self.bones.iter().map(|b| b.interp_index).collect()
    }

    fn frame(&self, frame: usize, bone: usize) -> &DualQuat {
        let frame = frame.min(self.num_frames.saturating_sub(1));
        &self.frame_bones[frame * self.num_bones() + bone]
    }

    /// Finds or computes the pose for `req` and returns its cache slot.
    pub fn check_skel_cache(&mut self, req: &PoseRequest<'_>, settings: &SkinningSettings) -> usize {
        if self.pose_cache.is_empty() {
            self.use_gpu_skel = self.gpu_accelerate(settings);
            self.skin_mode = SkinMode::from_mat_skel(settings.mat_skel);
        }
        let ragdoll = req.ragdoll.filter(|r| {
            self.ragdoll
                .as_ref()
                .is_some_and(|skel| skel.loaded && skel.id == r.skel_id)
        });
        let key = AnimCacheKey::new(
            req.states,
            req.pitch,
            req.part_mask.map(|m| m.id),
            ragdoll.map(|r| RagdollKey {
                id: r.id,
                last_move: r.last_move,
            }),
        );
        let lookup = self.pose_cache.lookup(&key, req.millis);
        if let CacheLookup::Miss(index) = lookup {
            let mut data = self
                .pose_cache
                .slot_mut(index)
                .map(|s| std::mem::take(&mut s.value))
                .unwrap_or_default();
            match self.skin_mode {
                SkinMode::DualQuat => self.compute_pose::<DualQuat>(req, ragdoll, &mut data),
                SkinMode::Matrix => self.compute_pose::<Affine3A>(req, ragdoll, &mut data),
            }
            if let Some(slot) = self.pose_cache.slot_mut(index) {
                slot.value = data;
            }
        }
        lookup.index()
    }

    fn compute_pose<T: TransformStore>(
        &self,
        req: &PoseRequest<'_>,
        ragdoll: Option<&RagdollData>,
        data: &mut BoneTransforms,
    ) {
        let mut pose = T::take_vec(data);
        self.interp_bones(req, &mut pose);
        if let (Some(rd), Some(skel)) = (ragdoll, &self.ragdoll) {
            rd.gen_bones(skel, &self.bone_slots(), &mut pose, &req.placement);
        }
        for a in &self.antipodes {
            let reference = pose[a.parent];
            pose[a.child].fix_antipodal(&reference);
        }
        *data = T::wrap(pose);
    }

    /// Blends the current and previous frame pairs of each bone's animation part, composes with
    /// the parent and applies pitch correction.
    pub(crate) fn interp_bones<T: TransformStore>(&self, req: &PoseRequest<'_>, pose: &mut Vec<T>) {
        pose.clear();
        pose.resize(self.num_interp_bones, T::default());
        if self.num_frames == 0 {
            return;
        }
        let num_parts = req.states.len().clamp(1, MAX_ANIM_PARTS);
        let fallback = AnimState::default();
        for (i, b) in self.bones.iter().enumerate() {
            let Some(index) = b.interp_index else {
                continue;
            };
            let part = req.part_mask.map_or(0, |m| m.part(i)).min(num_parts - 1);
            let s = req.states.get(part).unwrap_or(&fallback);
            let mut d = self.frame(s.cur.fr1, i).scaled((1.0 - s.cur.t) * s.interp);
            d.accumulate(self.frame(s.cur.fr2, i), s.cur.t * s.interp);
            if s.interp < 1.0 {
                d.accumulate(self.frame(s.prev.fr1, i), (1.0 - s.prev.t) * (1.0 - s.interp));
                d.accumulate(self.frame(s.prev.fr2, i), s.prev.t * (1.0 - s.interp));
            }
            d.normalize();
            let local = T::from_dual_quat(&d);
            pose[index] = match b.interp_parent {
                Some(p) => T::compose(&pose[p], &local),
                None => local,
            };
            if b.pitch.is_active() {
                let angle = b.pitch.angle(req.pitch).to_radians();
                pose[index].rotate_about(glam::Quat::from_axis_angle(req.axis, angle), &b.base);
            }
        }
    }

    /// Seeds a new ragdoll instance from the pose in `slot`.
    pub fn init_ragdoll(
        &self,
        slot: usize,
        data: &mut RagdollData,
        placement: &Placement,
        millis: i32,
    ) {
        let (Some(skel), Some(pose)) = (&self.ragdoll, self.pose(slot)) else {
            return;
        };
        let slots = self.bone_slots();
        match pose {
            BoneTransforms::DualQuat(v) => data.init_from_pose(skel, &slots, v, placement, millis),
            BoneTransforms::Matrix(v) => data.init_from_pose(skel, &slots, v, placement, millis),
        }
    }

    /// Model-space transform of a tag: the bone's posed transform (or bind pose when the
    /// skeleton is unanimated or `pose` is absent), moved into the part's placement.
    pub fn tag_transform(
        &self,
        tag: usize,
        pose: Option<&BoneTransforms>,
        placement: &Placement,
    ) -> Option<Affine3A> {
        let bone = &self.bones[self.tags.get(tag)?.bone];
        let posed = pose.and_then(|p| bone.interp_index.and_then(|i| p.get(i)));
        let mut m = match posed {
            Some(t) if self.num_frames > 0 => t.to_affine() * bone.base.to_affine(),
            _ => bone.base.to_affine(),
        };
        m.translation = placement.to_model(Vec3::from(m.translation)).into();
        Some(m)
    }

    /// Composes `m` with the bind-pose transform of a tag shifted by the part's placement.
    pub fn concat_tag_transform(
        &self,
        tag: usize,
        m: &Affine3A,
        placement: &Placement,
    ) -> Option<Affine3A> {
        let bone = &self.bones[self.tags.get(tag)?.bone];
        let t = Affine3A::from_translation(placement.translate * placement.scale)
            * bone.base.to_affine();
        Some(*m * t)
    }
}
