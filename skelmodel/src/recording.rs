//! An in-memory backend that keeps buffer contents and draw calls, for headless tests.

use crate::{BufferId, BufferKind, DrawCall, SkinMode, SkinningBackend, VertexFormat};
use glam::Affine3A;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedDraw {
    pub mesh: String,
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub format: VertexFormat,
    pub first_index: u32,
    pub index_count: u32,
    pub bones: Option<(SkinMode, usize, Vec<[f32; 4]>)>,
    pub transform: Affine3A,
}

/// Keeps buffer contents and draw calls in memory.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    next_id: u64,
    pub buffers: HashMap<BufferId, (BufferKind, Vec<u8>)>,
    pub uploads: usize,
    pub released: Vec<BufferId>,
    pub draws: Vec<RecordedDraw>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|(_, data)| data.as_slice())
    }

    /// Reads vertex `index` of a buffer holding `format` vertices back as a position.
    pub fn vertex_position(&self, id: BufferId, format: VertexFormat, index: usize) -> Option<[f32; 3]> {
        let data = self.buffer(id)?;
        let start = index * format.stride();
        let bytes = data.get(start..start + 12)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }
}

impl SkinningBackend for RecordingBackend {
    fn create_buffer(&mut self, kind: BufferKind, data: &[u8]) -> BufferId {
        self.next_id += 1;
        let id = BufferId(self.next_id);
        self.buffers.insert(id, (kind, data.to_vec()));
        self.uploads += 1;
        id
    }

    fn update_buffer(&mut self, id: BufferId, data: &[u8]) {
        if let Some((_, buf)) = self.buffers.get_mut(&id) {
            buf.clear();
            buf.extend_from_slice(data);
            self.uploads += 1;
        }
    }

    fn release_buffer(&mut self, id: BufferId) {
        if self.buffers.remove(&id).is_some() {
            self.released.push(id);
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        self.draws.push(RecordedDraw {
            mesh: call.mesh.to_string(),
            vertex_buffer: call.vertex_buffer,
            index_buffer: call.index_buffer,
            format: call.format,
            first_index: call.first_index,
            index_count: call.index_count,
            bones: call.bones.map(|b| (b.mode, b.weights, b.data.to_vec())),
            transform: call.transform,
        });
    }
}
