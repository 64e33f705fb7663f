//! Format loaders. Each parses an in-memory file into an import that is committed to the
//! skeleton and mesh group only after the whole file parsed, so a failed load leaves both as
//! they were.

mod iqm;
mod md5;
mod smd;
mod text;

pub use iqm::IqmLoader;
pub use md5::Md5Loader;
pub use smd::SmdLoader;

use crate::{
    Adjustments, AnimSpec, BlendCombo, BoneInfo, BumpVert, DualQuat, Error, MeshGroup, SkelMesh,
    Skeleton, Tri, Vert,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Md5,
    Smd,
    Iqm,
}

impl ModelFormat {
    /// Order tried when a model is requested by name.
    pub const ALL: [ModelFormat; 3] = [ModelFormat::Md5, ModelFormat::Smd, ModelFormat::Iqm];

    pub fn name(self) -> &'static str {
        match self {
            ModelFormat::Md5 => "md5",
            ModelFormat::Smd => "smd",
            ModelFormat::Iqm => "iqm",
        }
    }

    /// Extension of the default mesh file.
    pub fn mesh_extension(self) -> &'static str {
        match self {
            ModelFormat::Md5 => "md5mesh",
            ModelFormat::Smd => "smd",
            ModelFormat::Iqm => "iqm",
        }
    }

    /// Loader for this format. `smooth` is the MD5 normal smoothing angle in degrees; zero or
    /// less builds plain per-vertex normals.
    pub fn loader(self, smooth: f32) -> Box<dyn SkelLoader> {
        match self {
            ModelFormat::Md5 => Box::new(Md5Loader::new(smooth)),
            ModelFormat::Smd => Box::new(SmdLoader),
            ModelFormat::Iqm => Box::new(IqmLoader),
        }
    }
}

/// How a mesh gets its vertex normals once committed.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Normals {
    /// Taken from the file.
    #[default]
    Provided,
    /// Smoothed across vertices sharing a position within this cosine.
    Smooth(f32),
    /// Summed face normals per vertex.
    Build,
}

/// A mesh as parsed; `blends[i]` is the weight set of `verts[i]`.
#[derive(Clone, Debug, Default)]
pub struct ImportedMesh {
    pub name: String,
    pub verts: Vec<Vert>,
    pub blends: Vec<BlendCombo>,
    pub bump_verts: Option<Vec<BumpVert>>,
    pub tris: Vec<Tri>,
    pub normals: Normals,
}

#[derive(Clone, Debug, Default)]
pub struct MeshImport {
    /// Bind-pose bones, present when the file defines them and the skeleton has none yet.
    pub bones: Option<Vec<BoneInfo>>,
    pub meshes: Vec<ImportedMesh>,
}

#[derive(Clone, Debug, Default)]
pub struct AnimImport {
    /// Clip names with `frames * num_bones` transforms each.
    pub clips: Vec<(String, Vec<DualQuat>)>,
}

/// Common contract of the IQM, MD5 and SMD loaders. Implementations only read the skeleton.
pub trait SkelLoader {
    fn format(&self) -> ModelFormat;

    fn load_mesh(&self, file: &str, data: &[u8], skel: &Skeleton) -> Result<MeshImport, Error>;

    fn load_anim(
        &self,
        file: &str,
        data: &[u8],
        skel: &Skeleton,
        adjustments: &Adjustments,
    ) -> Result<AnimImport, Error>;
}

/// Rejects parents that do not precede their child, which pose composition relies on.
pub(crate) fn check_bone_order(bones: &[BoneInfo]) -> Result<(), String> {
    for (i, b) in bones.iter().enumerate() {
        if b.parent.is_some_and(|p| p >= i) {
            return Err(format!("bone {} ({}) has parent {:?} after it", i, b.name, b.parent));
        }
    }
    Ok(())
}

/// Builds a bone list whose bases are composed from parent-relative transforms.
pub(crate) fn bones_from_local(joints: &[(String, Option<usize>, DualQuat)]) -> Vec<BoneInfo> {
    let mut bones: Vec<BoneInfo> = Vec::with_capacity(joints.len());
    for (name, parent, local) in joints {
        let mut b = BoneInfo::new(name.clone(), *parent);
        let base = match parent.and_then(|p| bones.get(p)) {
            Some(pb) => pb.base * *local,
            None => *local,
        };
        b.set_base(base);
        bones.push(b);
    }
    bones
}

/// Converts a parent-relative animated transform into the stored frame form
/// `parent_base * adjusted * inv_base`, sign-aligned with `reference`.
pub(crate) fn frame_from_local(
    skel_bones: &[BoneInfo],
    bone: usize,
    mut local: DualQuat,
    adjustments: &Adjustments,
    reference: Option<&DualQuat>,
) -> DualQuat {
    adjustments.apply(bone, &mut local);
    let b = &skel_bones[bone];
    let mut frame = local * b.inv_base;
    if let Some(parent) = b.parent {
        frame = skel_bones[parent].base * frame;
    }
    if let Some(reference) = reference {
        frame.fix_antipodal(reference);
    }
    frame
}

/// Installs a successful mesh import: bones (for an empty skeleton), meshes and blend combos.
pub fn commit_mesh(group: &mut MeshGroup, import: MeshImport) {
    {
        let mut skel = group.skel.borrow_mut();
        if let Some(bones) = import.bones {
            if skel.bones.is_empty() {
                skel.bones = bones;
            }
        }
        if skel.shared() <= 1 {
            skel.link_children();
        }
    }
    for im in import.meshes {
        if im.verts.is_empty() || im.tris.is_empty() {
            log::warn!("empty mesh {} in {}", im.name, group.name);
            continue;
        }
        let mut mesh = SkelMesh::new(im.name);
        mesh.bump_verts = im.bump_verts;
        mesh.tris = im.tris;
        {
            let mut table = group.blends.borrow_mut();
            for (mut v, c) in im.verts.into_iter().zip(im.blends) {
                mesh.max_weights = mesh.max_weights.max(c.size());
                v.blend = table.add_blend_combo(c);
                mesh.verts.push(v);
            }
        }
        match im.normals {
            Normals::Provided => {}
            Normals::Smooth(limit) => mesh.smooth_norms(limit, true),
            Normals::Build => mesh.build_norms(true),
        }
        group.add_mesh(mesh);
    }
    group.sort_blend_combos();
}

/// Appends every clip of a successful animation import and returns their specs.
pub fn commit_anim(skel: &mut Skeleton, import: AnimImport) -> Vec<AnimSpec> {
    import
        .clips
        .into_iter()
        .map(|(name, frames)| skel.add_anim(&name, frames))
        .collect()
}
