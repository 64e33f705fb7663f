//! Mesh groups: vertex buffer generation, the blend and vertex caches, and the per-frame draw
//! flow for both skinning paths.

use crate::cache::{LruCache, OwnedKey};
use crate::math::TransformStore;
use crate::mesh::GenVertex;
use crate::render::{
    BoneUniforms, BufferId, BufferKind, DrawCall, ReleaseQueue, SkinningBackend, VertexData,
    VertexFormat,
};
use crate::{
    ANIM_FULLBRIGHT, ANIM_NORENDER, BlendTable, BoneTransforms, DualQuat, PoseRequest, SkelMesh,
    SkinMode, Skeleton, SkinningSettings,
};
use glam::{Affine3A, Vec3};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Per-frame inputs shared by every draw.
pub struct FrameContext<'a> {
    pub backend: &'a mut dyn SkinningBackend,
    pub settings: &'a SkinningSettings,
    pub millis: i32,
}

/// Layout of the generated vertex and index buffers.
#[derive(Debug)]
struct VboLayout {
    format: VertexFormat,
    norms: bool,
    tangents: bool,
    /// Combos pre-blended into extra bone slots.
    vblends: usize,
    /// Weights per vertex the GPU path reads; 0 for unanimated groups.
    vweights: usize,
    index_buffer: BufferId,
    /// Bind-pose vertices: uploaded once for the GPU and static paths, and the starting point
    /// of every CPU-skinned cache entry.
    template: VertexData,
    vertex_buffer: Option<BufferId>,
}

#[derive(Debug, Default)]
struct VboEntry {
    buffer: Option<BufferId>,
    data: Option<VertexData>,
}

#[derive(Debug)]
pub struct MeshGroup {
    pub name: String,
    pub meshes: Vec<SkelMesh>,
    pub skel: Rc<RefCell<Skeleton>>,
    pub blends: Rc<RefCell<BlendTable>>,
    layout: Option<VboLayout>,
    blend_cache: LruCache<OwnedKey, BoneTransforms>,
    vbo_cache: LruCache<OwnedKey, VboEntry>,
    generation: u64,
    release: ReleaseQueue,
}

/// What a group render produced, for tag and ragdoll follow-up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GroupRender {
    /// Pose cache slot used, or `None` for an unanimated skeleton.
    pub pose_slot: Option<usize>,
    pub gpu_skinned: bool,
}

impl MeshGroup {
    pub fn new(name: impl Into<String>, skel: Rc<RefCell<Skeleton>>, release: ReleaseQueue) -> Self {
        let blends = Rc::new(RefCell::new(BlendTable::new()));
        skel.borrow_mut().add_user(&blends);
        let generation = skel.borrow().generation();
        Self {
            name: name.into(),
            meshes: Vec::new(),
            skel,
            blends,
            layout: None,
            blend_cache: LruCache::default(),
            vbo_cache: LruCache::default(),
            generation,
            release,
        }
    }

    pub fn find_tag(&self, name: &str) -> Option<usize> {
        self.skel.borrow().find_tag(name)
    }

    /// Adds a mesh, dropping it with a warning when it has no vertices or triangles.
    pub fn add_mesh(&mut self, mesh: SkelMesh) {
        if mesh.is_empty() {
            log::warn!("{}: dropping empty mesh {}", self.name, mesh.name);
            return;
        }
        self.meshes.push(mesh);
    }

    /// Sorts the blend table and renumbers every vertex's blend index to match.
    pub fn sort_blend_combos(&mut self) {
        let remap = self.blends.borrow_mut().sort_blend_combos();
        for m in &mut self.meshes {
            for v in &mut m.verts {
                if let Some(&b) = remap.get(v.blend) {
                    v.blend = b;
                }
            }
        }
    }

    /// Bind-pose bounds under `m`.
    pub fn calc_bb(&self, m: &Affine3A) -> Option<(Vec3, Vec3)> {
        if self.meshes.is_empty() {
            return None;
        }
        let mut bbmin = Vec3::splat(f32::MAX);
        let mut bbmax = Vec3::splat(f32::MIN);
        for mesh in &self.meshes {
            mesh.calc_bb(m, &mut bbmin, &mut bbmax);
        }
        Some((bbmin, bbmax))
    }

    /// Releases every buffer and cached blend. The next render regenerates them.
    pub fn cleanup(&mut self) {
        for slot in self.vbo_cache.drain() {
            if let Some(id) = slot.value.buffer {
                self.release.push(id);
            }
        }
        self.blend_cache.clear();
        if let Some(layout) = self.layout.take() {
            self.release.push(layout.index_buffer);
            if let Some(id) = layout.vertex_buffer {
                self.release.push(id);
            }
        }
    }

    pub fn vertex_format(&self) -> Option<VertexFormat> {
        self.layout.as_ref().map(|l| l.format)
    }

    pub fn vblends(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.vblends)
    }

    pub fn vweights(&self) -> usize {
        self.layout.as_ref().map_or(0, |l| l.vweights)
    }

    fn gen_vertices<V: GenVertex>(
        meshes: &mut [SkelMesh],
        table: &BlendTable,
        mode: SkinMode,
        dedup: bool,
        idxs: &mut Vec<u32>,
    ) -> Vec<V> {
        let mut out = Vec::new();
        let mut seen = HashMap::new();
        for m in meshes {
            if dedup {
                m.gen_vbo_dedup(table, idxs, &mut out, &mut seen);
            } else {
                m.gen_vbo(table, mode, idxs, &mut out);
            }
        }
        out
    }

    fn gen_vbo(&mut self, norms: bool, tangents: bool, ctx: &mut FrameContext<'_>) {
        let skel = self.skel.borrow();
        let mut table = self.blends.borrow_mut();
        let animated = skel.num_frames > 0;
        let gpu = animated && skel.use_gpu_skel();
        let mut vblends = 0;
        let vweights;
        if animated && !gpu {
            vweights = 1;
            for c in &mut table.combos {
                c.interp_index = (c.weights[1] != 0.0).then(|| {
                    vblends += 1;
                    skel.num_interp_bones + vblends - 1
                });
            }
            for m in &mut self.meshes {
                m.remap_interp(&table);
            }
        } else if animated {
            let mut w = 4;
            let mut avail = i64::from(Skeleton::avail_gpu_bones(ctx.settings))
                - skel.num_gpu_bones as i64;
            while w > 1 && avail >= table.num_blends[w - 1] as i64 {
                avail -= table.num_blends[w - 1] as i64;
                w -= 1;
            }
            vweights = w;
            for c in &mut table.combos {
                c.interp_index = (c.size() > vweights).then(|| {
                    vblends += 1;
                    skel.num_gpu_bones + vblends - 1
                });
            }
        } else {
            vweights = 0;
            for c in &mut table.combos {
                c.interp_index = None;
            }
        }

        let format = VertexFormat::select(gpu, norms, tangents);
        let mode = skel.skin_mode();
        let dedup = !animated;
        let mut idxs = Vec::new();
        let meshes = &mut self.meshes;
        let template = match format {
            VertexFormat::Static => {
                VertexData::Static(Self::gen_vertices(meshes, &table, mode, dedup, &mut idxs))
            }
            VertexFormat::Normal => {
                VertexData::Normal(Self::gen_vertices(meshes, &table, mode, dedup, &mut idxs))
            }
            VertexFormat::Bump => {
                VertexData::Bump(Self::gen_vertices(meshes, &table, mode, dedup, &mut idxs))
            }
            VertexFormat::Weighted => {
                VertexData::Weighted(Self::gen_vertices(meshes, &table, mode, dedup, &mut idxs))
            }
            VertexFormat::WeightedBump => VertexData::WeightedBump(Self::gen_vertices(
                meshes, &table, mode, dedup, &mut idxs,
            )),
        };

        let index_buffer = ctx
            .backend
            .create_buffer(BufferKind::Index, bytemuck::cast_slice(&idxs));
        let vertex_buffer = (!animated || gpu)
            .then(|| ctx.backend.create_buffer(BufferKind::Vertex, template.as_bytes()));
        log::debug!(
            "{}: generated {} vertices ({:?}, {} weights, {} pre-blended)",
            self.name,
            template.len(),
            format,
            vweights,
            vblends
        );
        self.layout = Some(VboLayout {
            format,
            norms,
            tangents,
            vblends,
            vweights,
            index_buffer,
            template,
            vertex_buffer,
        });
    }

    fn blend_bones<T: TransformStore>(
        table: &BlendTable,
        pose: &[T],
        out: &mut Vec<T>,
        prefix: usize,
        offset: usize,
        vblends: usize,
        normalize: bool,
    ) {
        out.clear();
        out.resize(prefix + vblends, T::default());
        let n = prefix.min(pose.len());
        out[..n].copy_from_slice(&pose[..n]);
        let bone = |i: usize| pose.get(i).copied().unwrap_or_default();
        for (index, c) in table.blended() {
            let mut d = bone(c.interp_bones[0]).scaled(c.weights[0]);
            d.accumulate(&bone(c.interp_bones[1]), c.weights[1]);
            if c.weights[2] != 0.0 {
                d.accumulate(&bone(c.interp_bones[2]), c.weights[2]);
                if c.weights[3] != 0.0 {
                    d.accumulate(&bone(c.interp_bones[3]), c.weights[3]);
                }
            }
            if normalize {
                d.normalize();
            }
            if let Some(dst) = index.checked_sub(offset).and_then(|i| out.get_mut(i)) {
                *dst = d;
            }
        }
    }

    fn compute_blends<T: TransformStore>(
        &self,
        skel: &Skeleton,
        pose: &BoneTransforms,
        data: &mut BoneTransforms,
        layout: &VboLayout,
    ) {
        let pose = T::slice(pose).unwrap_or(&[]);
        let gpu = skel.use_gpu_skel();
        let (prefix, offset) = if gpu {
            (skel.num_gpu_bones, 0)
        } else {
            (0, skel.num_interp_bones)
        };
        let mut out = T::take_vec(data);
        Self::blend_bones(
            &self.blends.borrow(),
            pose,
            &mut out,
            prefix,
            offset,
            layout.vblends,
            !gpu || layout.vweights <= 1,
        );
        *data = T::wrap(out);
    }

    fn skin_vertices<T: TransformStore>(
        &self,
        skel: &Skeleton,
        pose: &BoneTransforms,
        blends: Option<&BoneTransforms>,
        out: &mut VertexData,
    ) {
        let pose = T::slice(pose).unwrap_or(&[]);
        let blends = blends.and_then(T::slice).unwrap_or(&[]);
        for m in &self.meshes {
            m.interp_verts(pose, blends, skel.num_interp_bones, out);
        }
    }

    fn draw_meshes(
        &self,
        ctx: &mut FrameContext<'_>,
        vertex_buffer: BufferId,
        bones: Option<BoneUniforms<'_>>,
        transform: &Affine3A,
        anim: u32,
    ) {
        let Some(layout) = &self.layout else {
            return;
        };
        for m in &self.meshes {
            let bones = bones.map(|b| BoneUniforms {
                weights: m.max_weights.min(layout.vweights).max(1),
                ..b
            });
            ctx.backend.draw(&DrawCall {
                mesh: &m.name,
                vertex_buffer,
                index_buffer: layout.index_buffer,
                format: layout.format,
                first_index: m.range.eoffset as u32,
                index_count: m.range.elen as u32,
                min_vertex: m.range.min_vert as u32,
                max_vertex: m.range.max_vert as u32,
                bones,
                transform: *transform,
                fullbright: anim & ANIM_FULLBRIGHT != 0,
            });
        }
    }

    /// Draws the group for one entity. Chooses between GPU and CPU skinning, filling the pose,
    /// blend and vertex caches on the way.
    pub fn render(
        &mut self,
        ctx: &mut FrameContext<'_>,
        req: &PoseRequest<'_>,
        anim: u32,
        norms: bool,
        tangents: bool,
        transform: &Affine3A,
    ) -> GroupRender {
        {
            let mut skel = self.skel.borrow_mut();
            if skel.should_cleanup(ctx.settings) {
                skel.cleanup();
            }
        }
        let generation = self.skel.borrow().generation();
        let layout_stale = self
            .layout
            .as_ref()
            .is_some_and(|l| l.norms != norms || l.tangents != tangents);
        if generation != self.generation || layout_stale {
            self.cleanup();
            self.generation = generation;
        }

        if self.skel.borrow().num_frames == 0 {
            if anim & ANIM_NORENDER == 0 {
                if self.layout.is_none() {
                    self.gen_vbo(norms, tangents, ctx);
                }
                if let Some(vb) = self.layout.as_ref().and_then(|l| l.vertex_buffer) {
                    self.draw_meshes(ctx, vb, None, transform, anim);
                }
            }
            return GroupRender {
                pose_slot: None,
                gpu_skinned: false,
            };
        }

        let slot = self.skel.borrow_mut().check_skel_cache(req, ctx.settings);
        let gpu = self.skel.borrow().use_gpu_skel();
        if anim & ANIM_NORENDER == 0 {
            if self.layout.is_none() {
                self.gen_vbo(norms, tangents, ctx);
            }
            self.render_posed(ctx, slot, gpu, transform, anim);
        }
        GroupRender {
            pose_slot: Some(slot),
            gpu_skinned: gpu,
        }
    }

    fn render_posed(
        &mut self,
        ctx: &mut FrameContext<'_>,
        slot: usize,
        gpu: bool,
        transform: &Affine3A,
        anim: u32,
    ) {
        let skel_rc = Rc::clone(&self.skel);
        let skel = skel_rc.borrow();
        let (Some(pose), Some(pose_key)) = (skel.pose(slot), skel.pose_key(slot)) else {
            return;
        };
        let Some(layout) = self.layout.take() else {
            return;
        };
        let key = OwnedKey {
            owner: slot,
            pose: pose_key.clone(),
        };

        let mut blend_index = None;
        if layout.vblends > 0 {
            let lookup = self.blend_cache.lookup(&key, ctx.millis);
            let index = lookup.index();
            if !lookup.is_hit() {
                let mut data = self
                    .blend_cache
                    .slot_mut(index)
                    .map(|s| std::mem::take(&mut s.value))
                    .unwrap_or_default();
                match skel.skin_mode() {
                    SkinMode::DualQuat => {
                        self.compute_blends::<DualQuat>(&skel, pose, &mut data, &layout)
                    }
                    SkinMode::Matrix => {
                        self.compute_blends::<Affine3A>(&skel, pose, &mut data, &layout)
                    }
                }
                if let Some(s) = self.blend_cache.slot_mut(index) {
                    s.value = data;
                }
            }
            blend_index = Some(index);
        }
        let blends = blend_index
            .and_then(|i| self.blend_cache.slot(i))
            .map(|s| &s.value);

        if gpu {
            let mut registers = Vec::new();
            let count = skel.num_gpu_bones + layout.vblends;
            match blends {
                Some(b) => b.write_gpu(0..count.min(b.len()), &mut registers),
                None => pose.write_gpu(0..skel.num_gpu_bones.min(pose.len()), &mut registers),
            }
            let bones = BoneUniforms {
                mode: skel.skin_mode(),
                weights: layout.vweights,
                data: &registers,
            };
            let vb = layout.vertex_buffer;
            self.layout = Some(layout);
            if let Some(vb) = vb {
                self.draw_meshes(ctx, vb, Some(bones), transform, anim);
            }
            return;
        }

        let lookup = self.vbo_cache.lookup(&key, ctx.millis);
        let index = lookup.index();
        if !lookup.is_hit() {
            let mut entry = self
                .vbo_cache
                .slot_mut(index)
                .map(|s| std::mem::take(&mut s.value))
                .unwrap_or_default();
            let mut data = entry
                .data
                .take()
                .filter(|d| d.format() == layout.format && d.len() == layout.template.len())
                .unwrap_or_else(|| layout.template.clone());
            match skel.skin_mode() {
                SkinMode::DualQuat => self.skin_vertices::<DualQuat>(&skel, pose, blends, &mut data),
                SkinMode::Matrix => self.skin_vertices::<Affine3A>(&skel, pose, blends, &mut data),
            }
            match entry.buffer {
                Some(id) => ctx.backend.update_buffer(id, data.as_bytes()),
                None => {
                    entry.buffer = Some(ctx.backend.create_buffer(BufferKind::Vertex, data.as_bytes()))
                }
            }
            entry.data = Some(data);
            if let Some(s) = self.vbo_cache.slot_mut(index) {
                s.value = entry;
            }
        }
        let vb = self.vbo_cache.slot(index).and_then(|s| s.value.buffer);
        self.layout = Some(layout);
        if let Some(vb) = vb {
            self.draw_meshes(ctx, vb, None, transform, anim);
        }
    }

    /// CPU-skinned vertices currently cached for pose slot `owner`, if any.
    pub fn skinned_vertices(&self, owner: usize) -> Option<&VertexData> {
        self.vbo_cache
            .iter()
            .find(|s| s.key.as_ref().is_some_and(|k| k.owner == owner))
            .and_then(|s| s.value.data.as_ref())
    }
}

impl Drop for MeshGroup {
    fn drop(&mut self) {
        self.cleanup();
    }
}
