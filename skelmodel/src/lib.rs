//! Skeletal model runtime: IQM, MD5 and SMD loading, dual-quaternion and matrix skinning on the
//! GPU or the CPU, and the pose, blend and vertex caches shared between rendered instances.
//!
//! This crate is renderer-agnostic. It talks to the GPU through [`SkinningBackend`]; rendering
//! integrations live in separate crates (e.g. `skelmodel-wgpu`).

#![forbid(unsafe_code)]

mod anim;
mod animmodel;
mod blend;
mod cache;
mod config;
mod error;
mod group;
mod ids;
pub mod loaders;
mod math;
mod mesh;
mod model;
mod ragdoll;
#[cfg(any(test, feature = "testing"))]
mod recording;
mod registry;
mod render;
mod settings;
mod skeleton;

pub use anim::*;
pub use animmodel::*;
pub use blend::*;
pub use cache::*;
pub use config::*;
pub use error::*;
pub use group::*;
pub use loaders::{
    AnimImport, ImportedMesh, IqmLoader, Md5Loader, MeshImport, ModelFormat, Normals, SkelLoader,
    SmdLoader, commit_anim, commit_mesh,
};
pub use math::*;
pub use mesh::*;
pub use model::*;
pub use ragdoll::*;
#[cfg(any(test, feature = "testing"))]
pub use recording::*;
pub use registry::*;
pub use render::*;
pub use settings::*;
pub use skeleton::*;

#[cfg(test)]
mod test_fixtures;

#[cfg(test)]
mod math_tests;

#[cfg(test)]
mod blend_tests;


#[cfg(test)]
mod cache_tests;





#[cfg(test)]
mod smd_tests;



#[cfg(test)]
mod model_tests;

#[cfg(test)]
mod registry_tests;

#[cfg(all(test, feature = "json"))]
mod config_tests;
