//! Animated models: parts sharing mesh groups, clip bindings per animation part, linked parts
//! and the per-entity render entry point.

use crate::group::{FrameContext, GroupRender};
use crate::ids::next_part_id;
use crate::{
    ANIM_ALL, ANIM_CLAMP, ANIM_DIR, ANIM_FLAGS, ANIM_INDEX, ANIM_LOOP, ANIM_NOPITCH, ANIM_RAGDOLL,
    ANIM_REVERSE, ANIM_SECONDARY, ANIM_SETSPEED, ANIM_SETTIME, AnimInfo, AnimPos, AnimState,
    BoneMaskEntry, EntityState, Error, MAX_ANIM_PARTS, MeshGroup, ModelFormat, PartAnimSpec,
    PartMask, PitchParams, Placement, PoseRequest, RagdollData, RenderPath, Skeleton,
};
use glam::{Affine3A, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

/// Axis procedural pitch rotates about, in model space.
pub const PITCH_AXIS: Vec3 = Vec3::NEG_Y;

/// Per-mesh material switches of one part.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Skin {
    /// The mesh is drawn with a normal map and needs tangents.
    pub normal_map: bool,
}

/// A child part attached to one of this part's tags.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LinkedPart {
    pub part: usize,
    pub tag: usize,
    pub translate: Vec3,
}

#[derive(Debug)]
pub struct SkelPart {
    pub id: u32,
    pub index: usize,
    /// `None` when the part's mesh file failed to load.
    pub group: Option<Rc<RefCell<MeshGroup>>>,
    pub skins: Vec<Skin>,
    pub links: Vec<LinkedPart>,
    pub pitch: PitchParams,
    pub translate: Vec3,
    pub num_anim_parts: usize,
    /// `anims[anim_part][anim]` lists the clips that may play for an animation number; one is
    /// picked per entity.
    pub anims: [Vec<Vec<PartAnimSpec>>; MAX_ANIM_PARTS],
    pub part_mask: Option<Rc<PartMask>>,
    building_mask: Option<Vec<u8>>,
}

impl SkelPart {
    pub fn new(index: usize) -> Self {
        Self {
            id: next_part_id(),
            index,
            group: None,
            skins: Vec::new(),
            links: Vec::new(),
            pitch: PitchParams::default(),
            translate: Vec3::ZERO,
            num_anim_parts: 1,
            anims: Default::default(),
            part_mask: None,
            building_mask: None,
        }
    }

    /// Attaches the part's meshes, resetting skins and the animation part mask.
    pub fn set_group(&mut self, group: Rc<RefCell<MeshGroup>>) {
        {
            let g = group.borrow();
            self.skins = vec![Skin::default(); g.meshes.len()];
            self.building_mask = Some(vec![0; g.skel.borrow().num_bones()]);
        }
        self.num_anim_parts = 1;
        self.part_mask = None;
        self.group = Some(group);
    }

    pub fn skel(&self) -> Option<Rc<RefCell<Skeleton>>> {
        self.group.as_ref().map(|g| Rc::clone(&g.borrow().skel))
    }

    /// Starts a new animation part covering the bones selected by `mask`.
    pub fn add_anim_part(&mut self, mask: &[BoneMaskEntry]) -> Result<(), Error> {
        let skel = self.skel();
        let (Some(building), Some(skel)) = (self.building_mask.as_mut(), skel) else {
            return Err(Error::TooManyAnimParts { part: self.index });
        };
        if self.num_anim_parts >= MAX_ANIM_PARTS {
            return Err(Error::TooManyAnimParts { part: self.index });
        }
        skel.borrow()
            .apply_bone_mask(mask, building, self.num_anim_parts as u8);
        self.num_anim_parts += 1;
        Ok(())
    }

    /// Binds frames `frame..frame + range` to animation number `anim` of `anim_part`.
    pub fn set_anim(&mut self, anim_part: usize, anim: u32, spec: PartAnimSpec) {
        let Some(table) = self.anims.get_mut(anim_part) else {
            return;
        };
        let index = (anim & ANIM_INDEX) as usize;
        if table.len() <= index {
            table.resize_with(index + 1, Vec::new);
        }
        table[index].push(spec);
    }

    /// Shares the finished part mask with the skeleton and prepares it for rendering.
    pub fn end_anim_parts(&mut self) {
        let Some(skel) = self.skel() else {
            return;
        };
        let mut skel = skel.borrow_mut();
        if let Some(bones) = self.building_mask.take() {
            self.part_mask = Some(skel.share_part_mask(bones));
        }
        skel.optimize();
    }

    /// True when any skin asks for normal mapping.
    pub fn needs_tangents(&self) -> bool {
        self.skins.iter().any(|s| s.normal_map)
    }

    /// Resolves `anim` for one animation part into clip frames and timing, and records it in
    /// the entity's transition slot. `None` when the part has no such frames.
    #[allow(clippy::too_many_arguments)]
    fn calc_anim(
        &self,
        anim_part: usize,
        anim: u32,
        basetime: i32,
        basetime2: i32,
        total_frames: usize,
        entity: Option<&mut EntityState>,
        interp: Option<usize>,
        millis: i32,
        aitime: &mut i32,
    ) -> Option<AnimInfo> {
        let seed = entity.as_ref().map_or(0, |e| e.variant_seed);
        let mut info = AnimInfo {
            anim,
            frame: 0,
            range: 1,
            basetime,
            speed: if anim & ANIM_SETSPEED != 0 {
                basetime2 as f32
            } else {
                100.0
            },
        };
        if anim & ANIM_INDEX == ANIM_ALL {
            info.range = total_frames;
        } else {
            let table = &self.anims[anim_part];
            let pick = |index: u32, time: i32| {
                table
                    .get(index as usize)
                    .filter(|l| !l.is_empty())
                    .map(|l| l[seed.wrapping_add(time as u32) as usize % l.len()])
            };
            let mut spec = pick(anim & ANIM_INDEX, basetime);
            if (anim >> ANIM_SECONDARY) & (ANIM_INDEX | ANIM_DIR) != 0 {
                if let Some(spec2) = pick((anim >> ANIM_SECONDARY) & ANIM_INDEX, basetime2) {
                    if spec.is_none_or(|s| spec2.priority > s.priority) {
                        spec = Some(spec2);
                        info.anim >>= ANIM_SECONDARY;
                        info.basetime = basetime2;
                    }
                }
            }
            if let Some(s) = spec {
                info.frame = s.frame;
                info.range = s.range;
                if s.speed > 0.0 {
                    info.speed = 1000.0 / s.speed;
                }
            }
        }

        info.anim &= (1 << ANIM_SECONDARY) - 1;
        info.anim |= anim & ANIM_FLAGS;
        if info.anim & ANIM_LOOP != 0 {
            info.anim &= !ANIM_SETTIME;
            if info.basetime == 0 {
                info.basetime = -((seed & 0xFFF) as i32);
            }
            if info.anim & ANIM_CLAMP != 0 {
                if info.anim & ANIM_REVERSE != 0 {
                    info.frame += info.range.saturating_sub(1);
                }
                info.range = 1;
            }
        }

        if info.frame + info.range > total_frames {
            if info.frame >= total_frames {
                return None;
            }
            info.range = total_frames - info.frame;
        }

        if let (Some(e), Some(slot)) = (entity, interp) {
            if info.anim & (ANIM_LOOP | ANIM_CLAMP) == ANIM_CLAMP {
                *aitime = (*aitime).min((info.range as f32 * info.speed * 0.5) as i32);
            }
            e.anim_interp[slot].update(self.id, &info, millis, e.last_rendered, *aitime);
        }
        Some(info)
    }

    /// Animation states for every animation part, or `None` when a requested clip is missing.
    fn anim_states(
        &self,
        ctx: &FrameContext<'_>,
        req: &RenderRequest,
        anim: u32,
        total_frames: usize,
        mut entity: Option<&mut EntityState>,
    ) -> Option<Vec<AnimState>> {
        let mut states = Vec::with_capacity(self.num_anim_parts);
        for i in 0..self.num_anim_parts {
            let interp = (entity.is_some() && self.index + self.num_anim_parts <= MAX_ANIM_PARTS)
                .then_some(self.index + i);
            let mut aitime = ctx.settings.anim_interpolation_time;
            let info = self.calc_anim(
                i,
                anim,
                req.basetime,
                req.basetime2,
                total_frames,
                entity.as_deref_mut(),
                interp,
                ctx.millis,
                &mut aitime,
            )?;
            let mut state = AnimState {
                anim: info.anim,
                cur: AnimPos::from_info(&info, ctx.millis),
                ..AnimState::default()
            };
            if let (Some(e), Some(slot)) = (entity.as_deref(), interp) {
                let ai = &e.anim_interp[slot];
                if let Some(last) = ai.last_switch.filter(|_| ai.prev.range > 0) {
                    let diff = ctx.millis - last;
                    if diff < aitime {
                        state.prev = AnimPos::from_info(&ai.prev, ctx.millis);
                        state.interp = diff as f32 / aitime as f32;
                    }
                }
            }
            states.push(state);
        }
        Some(states)
    }
}

/// What to draw for one entity.
#[derive(Copy, Clone, Debug)]
pub struct RenderRequest {
    /// Animation number and `ANIM_*` flags; a secondary animation sits above `ANIM_SECONDARY`.
    pub anim: u32,
    pub basetime: i32,
    /// Start time of the secondary animation, or ms per frame with `ANIM_SETSPEED`.
    pub basetime2: i32,
    /// Entity pitch in degrees, fed to pitch-corrected parts and bones.
    pub pitch: f32,
    /// Model to world.
    pub transform: Affine3A,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            anim: 0,
            basetime: 0,
            basetime2: 0,
            pitch: 0.0,
            transform: Affine3A::IDENTITY,
        }
    }
}

/// World transform of a tag after a render, for attachments.
#[derive(Clone, Debug, PartialEq)]
pub struct TagPose {
    pub part: usize,
    pub tag: String,
    pub transform: Affine3A,
}

#[derive(Clone, Debug, Default)]
pub struct ModelRender {
    pub parts: Vec<(usize, GroupRender)>,
    pub tags: Vec<TagPose>,
}

impl ModelRender {
    pub fn tag(&self, name: &str) -> Option<&TagPose> {
        self.tags.iter().find(|t| t.tag == name)
    }
}

#[derive(Debug)]
pub struct SkelModel {
    pub name: String,
    pub format: ModelFormat,
    pub parts: Vec<SkelPart>,
    pub scale: f32,
    pub translate: Vec3,
    /// Degrees per second.
    pub spin_yaw: f32,
    pub spin_pitch: f32,
    /// Bind-pose bounds in model space, set once loading finished.
    pub bbox: Option<(Vec3, Vec3)>,
}

impl SkelModel {
    pub fn new(name: impl Into<String>, format: ModelFormat) -> Self {
        Self {
            name: name.into(),
            format,
            parts: Vec::new(),
            scale: 1.0,
            translate: Vec3::ZERO,
            spin_yaw: 0.0,
            spin_pitch: 0.0,
            bbox: None,
        }
    }

    pub fn placement(&self, part: usize) -> Placement {
        Placement {
            translate: self.parts.get(part).map_or(Vec3::ZERO, |p| p.translate),
            scale: self.scale,
        }
    }

    /// Finds a tag by name in any part, returning the part and the tag index.
    pub fn find_tag(&self, name: &str) -> Option<(usize, usize)> {
        self.parts.iter().enumerate().find_map(|(i, p)| {
            let group = p.group.as_ref()?;
            let tag = group.borrow().find_tag(name)?;
            Some((i, tag))
        })
    }

    /// Attaches part `child` to tag `tag` of part `parent`.
    pub fn link(
        &mut self,
        parent: usize,
        child: usize,
        tag: &str,
        translate: Vec3,
    ) -> Result<(), Error> {
        if child >= self.parts.len() {
            return Err(Error::UnknownTag {
                name: tag.to_string(),
            });
        }
        let part = self.parts.get_mut(parent).ok_or_else(|| Error::UnknownTag {
            name: tag.to_string(),
        })?;
        let index = part
            .group
            .as_ref()
            .and_then(|g| g.borrow().find_tag(tag))
            .ok_or_else(|| Error::UnknownTag {
                name: tag.to_string(),
            })?;
        part.links.push(LinkedPart {
            part: child,
            tag: index,
            translate,
        });
        Ok(())
    }

    /// Finishes a load: applies the asset scale and translation, shares animation part masks,
    /// optimizes every skeleton and computes the bind-pose bounds.
    pub fn end_load(&mut self) {
        self.scale /= 4.0;
        let translate = self.translate;
        if let Some(first) = self.parts.first_mut() {
            first.translate = translate;
        }
        for p in &mut self.parts {
            p.end_anim_parts();
        }
        self.bbox = self.calc_bb();
    }

    fn calc_bb(&self) -> Option<(Vec3, Vec3)> {
        let first = self.parts.first()?;
        let m = Affine3A::from_scale(Vec3::splat(self.scale))
            * Affine3A::from_translation(first.translate);
        let mut bb = None;
        self.part_bb(0, &m, &mut bb, 0);
        bb
    }

    fn part_bb(&self, index: usize, m: &Affine3A, bb: &mut Option<(Vec3, Vec3)>, depth: usize) {
        let Some(group) = self.parts.get(index).and_then(|p| p.group.as_ref()) else {
            return;
        };
        let group = group.borrow();
        if let Some((lo, hi)) = group.calc_bb(m) {
            *bb = Some(match *bb {
                Some((a, b)) => (a.min(lo), b.max(hi)),
                None => (lo, hi),
            });
        }
        if depth >= self.parts.len() {
            return;
        }
        let skel = group.skel.borrow();
        let placement = self.placement(index);
        for link in &self.parts[index].links {
            if let Some(n) = skel.concat_tag_transform(link.tag, m, &placement) {
                let n = n * Affine3A::from_translation(link.translate * self.scale);
                self.part_bb(link.part, &n, bb, depth + 1);
            }
        }
    }

    /// Releases every buffer and cached pose of the model's mesh groups.
    pub fn cleanup(&self) {
        for p in &self.parts {
            if let Some(group) = &p.group {
                let mut g = group.borrow_mut();
                g.skel.borrow_mut().cleanup();
                g.cleanup();
            }
        }
    }

    /// Draws the model for one entity (or for no entity, without transitions) and returns the
    /// tag transforms of every drawn part.
    pub fn render(
        &self,
        ctx: &mut FrameContext<'_>,
        req: &RenderRequest,
        mut entity: Option<&mut EntityState>,
    ) -> ModelRender {
        let mut out = ModelRender::default();
        if let Some(e) = entity.as_deref_mut() {
            if req.anim & ANIM_RAGDOLL == 0 && e.ragdoll.take().is_some() {
                for ai in &mut e.anim_interp {
                    ai.prev.range = 0;
                    ai.cur.range = 0;
                    ai.reset();
                }
            }
        }
        let mut transform = req.transform;
        if self.spin_yaw != 0.0 || self.spin_pitch != 0.0 {
            let secs = ctx.millis as f32 / 1000.0;
            transform = transform
                * Affine3A::from_rotation_z((self.spin_yaw * secs).to_radians())
                * Affine3A::from_rotation_y((-self.spin_pitch * secs).to_radians());
        }
        self.render_part(0, ctx, req, req.anim, &transform, entity.as_deref_mut(), &mut out, 0);
        if let Some(e) = entity {
            e.last_rendered = ctx.millis;
        }
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn render_part(
        &self,
        index: usize,
        ctx: &mut FrameContext<'_>,
        req: &RenderRequest,
        anim: u32,
        transform: &Affine3A,
        mut entity: Option<&mut EntityState>,
        out: &mut ModelRender,
        depth: usize,
    ) {
        let Some(part) = self.parts.get(index) else {
            return;
        };
        let Some(group) = &part.group else {
            return;
        };
        let skel = Rc::clone(&group.borrow().skel);
        let total_frames = skel.borrow().num_frames.max(1);
        let Some(states) = part.anim_states(ctx, req, anim, total_frames, entity.as_deref_mut())
        else {
            return;
        };

        let mut part_transform = *transform;
        if part.pitch.is_active() && anim & ANIM_NOPITCH == 0 {
            let angle = part.pitch.angle(req.pitch).to_radians();
            part_transform = part_transform * Affine3A::from_axis_angle(PITCH_AXIS, angle);
        }
        let placement = self.placement(index);
        let mesh_transform = part_transform
            * Affine3A::from_scale(Vec3::splat(self.scale))
            * Affine3A::from_translation(part.translate);
        let norms = ctx.settings.render_path == RenderPath::Shader;
        let tangents = norms && part.needs_tangents();

        let result = {
            let ragdoll = entity
                .as_deref()
                .filter(|_| anim & ANIM_RAGDOLL != 0)
                .and_then(|e| e.ragdoll.as_ref());
            let pose_req = PoseRequest {
                states: &states,
                pitch: req.pitch,
                axis: PITCH_AXIS,
                part_mask: part.part_mask.as_deref(),
                ragdoll,
                placement,
                millis: ctx.millis,
            };
            group
                .borrow_mut()
                .render(ctx, &pose_req, anim, norms, tangents, &mesh_transform)
        };
        out.parts.push((index, result));

        let skel = skel.borrow();
        let pose = result.pose_slot.and_then(|slot| skel.pose(slot));
        for (i, tag) in skel.tags.iter().enumerate() {
            if let Some(m) = skel.tag_transform(i, pose, &placement) {
                out.tags.push(TagPose {
                    part: index,
                    tag: tag.name.clone(),
                    transform: part_transform * m,
                });
            }
        }

        if anim & ANIM_RAGDOLL != 0 {
            if let (Some(e), Some(slot), Some(rskel)) =
                (entity.as_deref_mut(), result.pose_slot, skel.ragdoll.as_ref())
            {
                if rskel.loaded && e.ragdoll.is_none() {
                    let mut data = RagdollData::new(rskel);
                    skel.init_ragdoll(slot, &mut data, &placement, ctx.millis);
                    e.ragdoll = Some(data);
                }
            }
        }

        if depth >= self.parts.len() {
            return;
        }
        let links: Vec<(LinkedPart, Affine3A)> = part
            .links
            .iter()
            .filter_map(|l| {
                let m = skel.tag_transform(l.tag, pose, &placement)?;
                Some((*l, m))
            })
            .collect();
        drop(skel);
        for (link, m) in links {
            let child = part_transform
                * m
                * Affine3A::from_translation(link.translate * self.scale);
            self.render_part(
                link.part,
                ctx,
                req,
                anim,
                &child,
                entity.as_deref_mut(),
                out,
                depth + 1,
            );
        }
    }
}
