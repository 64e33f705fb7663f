//! wgpu skinning backend for `skelmodel`.
//!
//! [`SkinRenderer`] implements [`skelmodel::SkinningBackend`]: mesh groups create and update
//! their vertex and index buffers through it, and every draw is recorded with its bone
//! registers so it can be replayed into a render pass. Dual-quaternion and matrix skinning run
//! in the vertex shader for one to four weights per vertex.

#![forbid(unsafe_code)]

mod renderer;
mod shader;

pub use renderer::*;
pub use shader::MAX_BONE_REGISTERS;
