//! Renderer-facing types: vertex layouts and the backend trait the driver draws through.

use crate::SkinMode;
use bytemuck::{Pod, Zeroable};
use glam::Affine3A;
use std::cell::RefCell;
use std::rc::Rc;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct StaticVertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct NormalVertex {
    pub pos: [f32; 3],
    pub norm: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BumpVertex {
    pub pos: [f32; 3],
    pub norm: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
    pub bitangent: f32,
}

/// GPU-skinned vertex: byte weights summing to 255 and shader bone register offsets.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WeightedVertex {
    pub pos: [f32; 3],
    pub norm: [f32; 3],
    pub uv: [f32; 2],
    pub weights: [u8; 4],
    pub bones: [u8; 4],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct WeightedBumpVertex {
    pub pos: [f32; 3],
    pub norm: [f32; 3],
    pub uv: [f32; 2],
    pub tangent: [f32; 3],
    pub bitangent: f32,
    pub weights: [u8; 4],
    pub bones: [u8; 4],
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Static,
    Normal,
    Bump,
    Weighted,
    WeightedBump,
}

impl VertexFormat {
    /// Layout chosen for a mesh group: weighted layouts on the GPU path, otherwise the smallest
    /// layout carrying what the skins need.
    pub fn select(gpu: bool, norms: bool, tangents: bool) -> Self {
        match (gpu, tangents, norms) {
            (true, true, _) => VertexFormat::WeightedBump,
            (true, false, _) => VertexFormat::Weighted,
            (false, true, _) => VertexFormat::Bump,
            (false, false, true) => VertexFormat::Normal,
            (false, false, false) => VertexFormat::Static,
        }
    }

    pub fn stride(self) -> usize {
        match self {
            VertexFormat::Static => size_of::<StaticVertex>(),
            VertexFormat::Normal => size_of::<NormalVertex>(),
            VertexFormat::Bump => size_of::<BumpVertex>(),
            VertexFormat::Weighted => size_of::<WeightedVertex>(),
            VertexFormat::WeightedBump => size_of::<WeightedBumpVertex>(),
        }
    }

    pub fn is_weighted(self) -> bool {
        matches!(self, VertexFormat::Weighted | VertexFormat::WeightedBump)
    }

    pub fn has_normals(self) -> bool {
        !matches!(self, VertexFormat::Static)
    }

    pub fn has_tangents(self) -> bool {
        matches!(self, VertexFormat::Bump | VertexFormat::WeightedBump)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum VertexData {
    Static(Vec<StaticVertex>),
    Normal(Vec<NormalVertex>),
    Bump(Vec<BumpVertex>),
    Weighted(Vec<WeightedVertex>),
    WeightedBump(Vec<WeightedBumpVertex>),
}

impl VertexData {
    pub fn new(format: VertexFormat) -> Self {
        match format {
            VertexFormat::Static => VertexData::Static(Vec::new()),
            VertexFormat::Normal => VertexData::Normal(Vec::new()),
            VertexFormat::Bump => VertexData::Bump(Vec::new()),
            VertexFormat::Weighted => VertexData::Weighted(Vec::new()),
            VertexFormat::WeightedBump => VertexData::WeightedBump(Vec::new()),
        }
    }

    pub fn format(&self) -> VertexFormat {
        match self {
            VertexData::Static(_) => VertexFormat::Static,
            VertexData::Normal(_) => VertexFormat::Normal,
            VertexData::Bump(_) => VertexFormat::Bump,
            VertexData::Weighted(_) => VertexFormat::Weighted,
            VertexData::WeightedBump(_) => VertexFormat::WeightedBump,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VertexData::Static(v) => v.len(),
            VertexData::Normal(v) => v.len(),
            VertexData::Bump(v) => v.len(),
            VertexData::Weighted(v) => v.len(),
            VertexData::WeightedBump(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VertexData::Static(v) => bytemuck::cast_slice(v),
            VertexData::Normal(v) => bytemuck::cast_slice(v),
            VertexData::Bump(v) => bytemuck::cast_slice(v),
            VertexData::Weighted(v) => bytemuck::cast_slice(v),
            VertexData::WeightedBump(v) => bytemuck::cast_slice(v),
        }
    }

    /// Object-space position of vertex `i`.
    pub fn position(&self, i: usize) -> Option<[f32; 3]> {
        match self {
            VertexData::Static(v) => v.get(i).map(|v| v.pos),
            VertexData::Normal(v) => v.get(i).map(|v| v.pos),
            VertexData::Bump(v) => v.get(i).map(|v| v.pos),
            VertexData::Weighted(v) => v.get(i).map(|v| v.pos),
            VertexData::WeightedBump(v) => v.get(i).map(|v| v.pos),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
}

/// Bone registers for one GPU-skinned draw, laid out as `SkinMode::float4s_per_bone` float4s
/// per bone.
#[derive(Copy, Clone, Debug)]
pub struct BoneUniforms<'a> {
    pub mode: SkinMode,
    /// Weights per vertex the shader variant reads.
    pub weights: usize,
    pub data: &'a [[f32; 4]],
}

#[derive(Copy, Clone, Debug)]
pub struct DrawCall<'a> {
    pub mesh: &'a str,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub format: VertexFormat,
    pub first_index: u32,
    pub index_count: u32,
    pub min_vertex: u32,
    pub max_vertex: u32,
    pub bones: Option<BoneUniforms<'a>>,
    pub transform: Affine3A,
    pub fullbright: bool,
}

/// GPU side of the renderer driver. Buffers are created and released by the mesh groups.
pub trait SkinningBackend {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId;
    fn update_buffer(&mut self, id: BufferId, data: &[u8]);
    fn release_buffer(&mut self, id: BufferId);
    fn draw(&mut self, call: &DrawCall<'_>);
}

/// Buffer ids whose owners went away. Draws recorded earlier in the frame may still read them, so
/// the queue is only flushed between frames (see `ModelRegistry::release_buffers`).
#[derive(Clone, Debug, Default)]
pub struct ReleaseQueue(Rc<RefCell<Vec<BufferId>>>);

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: BufferId) {
        self.0.borrow_mut().push(id);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn flush(&self, backend: &mut dyn SkinningBackend) {
        let ids = std::mem::take(&mut *self.0.borrow_mut());
        for id in ids {
            backend.release_buffer(id);
        }
    }
}
