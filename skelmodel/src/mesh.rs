use crate::render::{
    BumpVertex, NormalVertex, StaticVertex, VertexData, VertexFormat, WeightedBumpVertex,
    WeightedVertex,
};
use crate::{BlendCombo, BlendTable, BumpVert, SkinMode, SkinTransform, Tri, Vert};
use glam::{Affine3A, Vec3};
use std::collections::HashMap;

/// Vertex layouts a mesh can emit into a vertex buffer.
pub(crate) trait GenVertex: bytemuck::Pod + Default {
    fn assign(v: &Vert, bump: Option<&BumpVert>, combo: &BlendCombo, mode: SkinMode) -> Self;
    /// Whether `v` would emit this exact vertex, for deduplicating static meshes.
    fn same(&self, v: &Vert, bump: Option<&BumpVert>) -> bool;
}

fn bump_parts(bump: Option<&BumpVert>) -> ([f32; 3], f32) {
    bump.map_or(([0.0; 3], 0.0), |b| (b.tangent.to_array(), b.bitangent))
}

impl GenVertex for StaticVertex {
    fn assign(v: &Vert, _: Option<&BumpVert>, _: &BlendCombo, _: SkinMode) -> Self {
        Self {
            pos: v.pos.to_array(),
            uv: [v.u, v.v],
        }
    }

    fn same(&self, v: &Vert, _: Option<&BumpVert>) -> bool {
        self.uv == [v.u, v.v] && self.pos == v.pos.to_array()
    }
}

impl GenVertex for NormalVertex {
    fn assign(v: &Vert, _: Option<&BumpVert>, _: &BlendCombo, _: SkinMode) -> Self {
        Self {
            pos: v.pos.to_array(),
            norm: v.norm.to_array(),
            uv: [v.u, v.v],
        }
    }

    fn same(&self, v: &Vert, _: Option<&BumpVert>) -> bool {
        self.uv == [v.u, v.v] && self.pos == v.pos.to_array() && self.norm == v.norm.to_array()
    }
}

impl GenVertex for BumpVertex {
    fn assign(v: &Vert, bump: Option<&BumpVert>, _: &BlendCombo, _: SkinMode) -> Self {
        let (tangent, bitangent) = bump_parts(bump);
        Self {
            pos: v.pos.to_array(),
            norm: v.norm.to_array(),
            uv: [v.u, v.v],
            tangent,
            bitangent,
        }
    }

    fn same(&self, v: &Vert, bump: Option<&BumpVert>) -> bool {
        self.uv == [v.u, v.v]
            && self.pos == v.pos.to_array()
            && self.norm == v.norm.to_array()
            && bump.is_none_or(|b| self.tangent == b.tangent.to_array() && self.bitangent == b.bitangent)
    }
}

impl GenVertex for WeightedVertex {
    fn assign(v: &Vert, _: Option<&BumpVert>, combo: &BlendCombo, mode: SkinMode) -> Self {
        let (weights, bones) = combo.serialize(mode);
        Self {
            pos: v.pos.to_array(),
            norm: v.norm.to_array(),
            uv: [v.u, v.v],
            weights,
            bones,
        }
    }

    fn same(&self, _: &Vert, _: Option<&BumpVert>) -> bool {
        false
    }
}

impl GenVertex for WeightedBumpVertex {
    fn assign(v: &Vert, bump: Option<&BumpVert>, combo: &BlendCombo, mode: SkinMode) -> Self {
        let (weights, bones) = combo.serialize(mode);
        let (tangent, bitangent) = bump_parts(bump);
        Self {
            pos: v.pos.to_array(),
            norm: v.norm.to_array(),
            uv: [v.u, v.v],
            tangent,
            bitangent,
            weights,
            bones,
        }
    }

    fn same(&self, _: &Vert, _: Option<&BumpVert>) -> bool {
        false
    }
}

fn pos_key(p: Vec3) -> [u32; 3] {
    p.to_array().map(f32::to_bits)
}

/// Range of a mesh inside its group's shared vertex and index buffers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshRange {
    pub voffset: usize,
    pub eoffset: usize,
    pub elen: usize,
    pub min_vert: usize,
    pub max_vert: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SkelMesh {
    pub name: String,
    pub verts: Vec<Vert>,
    pub bump_verts: Option<Vec<BumpVert>>,
    pub tris: Vec<Tri>,
    /// Largest blend size any vertex of this mesh uses.
    pub max_weights: usize,
    pub noclip: bool,
    pub range: MeshRange,
}

impl SkelMesh {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.verts.is_empty() || self.tris.is_empty()
    }

    fn tri_verts(&self, t: &Tri) -> [usize; 3] {
        t.vert.map(|v| v as usize)
    }

    fn face_normal(&self, t: &Tri, area_weight: bool) -> Vec3 {
        let [a, b, c] = self.tri_verts(t).map(|i| self.verts[i].pos);
        let n = (b - a).cross(c - a);
        if area_weight { n } else { n.normalize_or_zero() }
    }

    /// Face normals summed per vertex, then shared between vertices at the same position whose
    /// normals lie within `limit` (a cosine) of each other.
    pub fn smooth_norms(&mut self, limit: f32, area_weight: bool) {
        let mut share: HashMap<[u32; 3], usize> = HashMap::new();
        let mut next: Vec<Option<usize>> = vec![None; self.verts.len()];
        for i in 0..self.verts.len() {
            self.verts[i].norm = Vec3::ZERO;
            let idx = *share.entry(pos_key(self.verts[i].pos)).or_insert(i);
            if idx != i {
                next[i] = next[idx];
                next[idx] = Some(i);
            }
        }
        for ti in 0..self.tris.len() {
            let t = self.tris[ti];
            let n = self.face_normal(&t, area_weight);
            for v in self.tri_verts(&t) {
                self.verts[v].norm += n;
            }
        }
        let mut norms = vec![Vec3::ZERO; self.verts.len()];
        for i in 0..self.verts.len() {
            let v = self.verts[i].norm;
            norms[i] += v;
            let vlimit = limit * v.length();
            let mut j = next[i];
            while let Some(jj) = j {
                let o = self.verts[jj].norm;
                if v.dot(o) >= vlimit * o.length() {
                    norms[i] += o;
                    norms[jj] += v;
                }
                j = next[jj];
            }
        }
        for (v, n) in self.verts.iter_mut().zip(norms) {
            v.norm = n.normalize_or_zero();
        }
    }

    pub fn build_norms(&mut self, area_weight: bool) {
        for v in &mut self.verts {
            v.norm = Vec3::ZERO;
        }
        for ti in 0..self.tris.len() {
            let t = self.tris[ti];
            let n = self.face_normal(&t, area_weight);
            for v in self.tri_verts(&t) {
                self.verts[v].norm += n;
            }
        }
        for v in &mut self.verts {
            v.norm = v.norm.normalize_or_zero();
        }
    }

    /// Per-vertex tangent (orthogonalized against the normal) and bitangent sign. Computed once.
    pub fn calc_tangents(&mut self, area_weight: bool) {
        if self.bump_verts.is_some() {
            return;
        }
        let n = self.verts.len();
        let mut tangent = vec![Vec3::ZERO; n];
        let mut bitangent = vec![Vec3::ZERO; n];
        for t in &self.tris {
            let idx = self.tri_verts(t);
            let [av, bv, cv] = idx.map(|i| &self.verts[i]);
            let e1 = bv.pos - av.pos;
            let e2 = cv.pos - av.pos;
            let (u1, v1) = (bv.u - av.u, bv.v - av.v);
            let (u2, v2) = (cv.u - av.u, cv.v - av.v);
            let scale = u1 * v2 - u2 * v1;
            let scale = if scale != 0.0 { 1.0 / scale } else { 0.0 };
            let mut u = (e1 * v2 - e2 * v1) * scale;
            let mut v = (e2 * u1 - e1 * u2) * scale;
            if !area_weight {
                u = u.normalize_or_zero();
                v = v.normalize_or_zero();
            }
            for i in idx {
                tangent[i] += u;
                bitangent[i] += v;
            }
        }
        let bump = self
            .verts
            .iter()
            .enumerate()
            .map(|(i, vert)| {
                let (nrm, t, bt) = (vert.norm, tangent[i], bitangent[i]);
                BumpVert {
                    tangent: (t - nrm * nrm.dot(t)).normalize_or_zero(),
                    bitangent: if nrm.cross(t).dot(bt) < 0.0 { -1.0 } else { 1.0 },
                }
            })
            .collect();
        self.bump_verts = Some(bump);
    }

    pub fn calc_bb(&self, m: &Affine3A, bbmin: &mut Vec3, bbmax: &mut Vec3) {
        for v in &self.verts {
            let p = m.transform_point3(v.pos);
            *bbmin = bbmin.min(p);
            *bbmax = bbmax.max(p);
        }
    }

    fn bump(&self, i: usize) -> Option<&BumpVert> {
        self.bump_verts.as_ref().and_then(|b| b.get(i))
    }

    /// Appends one vertex per source vertex plus this mesh's indices.
    pub(crate) fn gen_vbo<V: GenVertex>(
        &mut self,
        table: &BlendTable,
        mode: SkinMode,
        idxs: &mut Vec<u32>,
        out: &mut Vec<V>,
    ) -> usize {
        let voffset = out.len();
        let eoffset = idxs.len();
        for (i, v) in self.verts.iter().enumerate() {
            let combo = table.combos.get(v.blend).cloned().unwrap_or_default();
            out.push(V::assign(v, self.bump(i), &combo, mode));
        }
        for t in &self.tris {
            idxs.extend(t.vert.map(|v| (voffset + v as usize) as u32));
        }
        self.range = MeshRange {
            voffset,
            eoffset,
            elen: idxs.len() - eoffset,
            min_vert: voffset,
            max_vert: voffset + self.verts.len().saturating_sub(1),
        };
        self.verts.len()
    }

    /// Appends vertices shared by position, UV and (per layout) normal and tangent identity.
    /// `seen` persists across the meshes of a group so duplicates merge group-wide.
    pub(crate) fn gen_vbo_dedup<V: GenVertex>(
        &mut self,
        table: &BlendTable,
        idxs: &mut Vec<u32>,
        out: &mut Vec<V>,
        seen: &mut HashMap<[u32; 3], Vec<u32>>,
    ) -> usize {
        let voffset = out.len();
        let eoffset = idxs.len();
        let mut min_vert = usize::MAX;
        for t in &self.tris {
            for index in self.tri_verts(t) {
                let v = &self.verts[index];
                let bump = self.bump(index);
                let bucket = seen.entry(pos_key(v.pos)).or_default();
                match bucket.iter().find(|&&e| out[e as usize].same(v, bump)) {
                    Some(&existing) => {
                        min_vert = min_vert.min(existing as usize);
                        idxs.push(existing);
                    }
                    None => {
                        let combo = table.combos.get(v.blend).cloned().unwrap_or_default();
                        let new = out.len() as u32;
                        out.push(V::assign(v, bump, &combo, SkinMode::DualQuat));
                        bucket.push(new);
                        idxs.push(new);
                    }
                }
            }
        }
        let min_vert = min_vert.min(voffset);
        self.range = MeshRange {
            voffset,
            eoffset,
            elen: idxs.len() - eoffset,
            min_vert,
            max_vert: min_vert.max(out.len().saturating_sub(1)),
        };
        out.len() - voffset
    }

    /// Points every vertex at the bone or pre-blended slot it is skinned with on the CPU.
    pub(crate) fn remap_interp(&mut self, table: &BlendTable) {
        for v in &mut self.verts {
            v.interp_index = table.remap_blend(v.blend);
        }
    }

    /// CPU skinning: writes posed positions (and normals and tangents where the layout has
    /// them) over this mesh's range of `out`. Slots below `blend_offset` index `pose`, the rest
    /// index `blends`.
    pub fn interp_verts<M: SkinTransform>(
        &self,
        pose: &[M],
        blends: &[M],
        blend_offset: usize,
        out: &mut VertexData,
    ) {
        let xform = |i: usize| -> M {
            if i < blend_offset {
                pose.get(i).copied().unwrap_or_default()
            } else {
                blends.get(i - blend_offset).copied().unwrap_or_default()
            }
        };
        let range = self.range.voffset..self.range.voffset + self.verts.len();
        match out {
            VertexData::Static(dst) => {
                for (d, src) in dst[range].iter_mut().zip(&self.verts) {
                    d.pos = xform(src.interp_index).transform_point3(src.pos).to_array();
                }
            }
            VertexData::Normal(dst) => {
                for (d, src) in dst[range].iter_mut().zip(&self.verts) {
                    let m = xform(src.interp_index);
                    d.pos = m.transform_point3(src.pos).to_array();
                    d.norm = m.transform_vector3(src.norm).to_array();
                }
            }
            VertexData::Bump(dst) => {
                for (i, (d, src)) in dst[range].iter_mut().zip(&self.verts).enumerate() {
                    let m = xform(src.interp_index);
                    d.pos = m.transform_point3(src.pos).to_array();
                    d.norm = m.transform_vector3(src.norm).to_array();
                    if let Some(b) = self.bump(i) {
                        d.tangent = m.transform_vector3(b.tangent).to_array();
                    }
                }
            }
            VertexData::Weighted(_) | VertexData::WeightedBump(_) => {
                log::warn!("mesh {}: CPU skinning into a GPU-weighted layout", self.name);
            }
        }
    }
}
