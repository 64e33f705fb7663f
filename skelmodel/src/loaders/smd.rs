//! Valve StudioMDL (`.smd`) reference meshes and animation sequences.

use super::text::{tokens, LineReader, Tokens};
use super::{
    check_bone_order, frame_from_local, AnimImport, ImportedMesh, MeshImport, ModelFormat,
    SkelLoader,
};
use crate::{
    quat_from_smd_euler, Adjustments, BlendCombo, BoneInfo, DualQuat, Error, Skeleton, Tri, Vert,
};
use std::collections::HashMap;

pub const SMD_VERSION: i32 = 1;
const MAX_NODES: usize = 256;

#[derive(Clone, Debug, Default)]
struct Node {
    name: String,
    parent: Option<usize>,
}

/// Hashable identity of a vertex within one material.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VertKey {
    pos: [u32; 3],
    norm: [u32; 3],
    uv: [u32; 2],
    bones: [usize; 4],
    weights: [u32; 4],
}

impl VertKey {
    fn new(v: &Vert, c: &BlendCombo) -> Self {
        Self {
            pos: v.pos.to_array().map(f32::to_bits),
            norm: v.norm.to_array().map(f32::to_bits),
            uv: [v.u.to_bits(), v.v.to_bits()],
            bones: c.bones,
            weights: c.weights.map(f32::to_bits),
        }
    }
}

#[derive(Default)]
struct Material {
    mesh: ImportedMesh,
    index: HashMap<VertKey, u32>,
}

impl Material {
    fn add_vert(&mut self, v: Vert, c: BlendCombo) -> u32 {
        let next = self.mesh.verts.len() as u32;
        let index = *self.index.entry(VertKey::new(&v, &c)).or_insert(next);
        if index == next {
            self.mesh.verts.push(v);
            self.mesh.blends.push(c);
        }
        index
    }
}

/// `bone px py pz rx ry rz` as a parent-relative transform in the engine frame.
fn parse_key(toks: &mut Tokens<'_>) -> Result<(usize, DualQuat), String> {
    let bone: i64 = toks.parse("bone")?;
    let mut pos = toks.vec3("position")?;
    let rot = toks.vec3("rotation")?;
    pos.y = -pos.y;
    let bone = usize::try_from(bone).map_err(|_| format!("bone {bone} out of range"))?;
    Ok((bone, DualQuat::from_rotation_translation(quat_from_smd_euler(rot), pos)))
}

fn section_end(line: &str) -> bool {
    line.trim_start().starts_with("end")
}

fn skip_section(r: &mut LineReader<'_>) {
    while let Some(line) = r.next_content() {
        if section_end(line) {
            break;
        }
    }
}

fn read_nodes(r: &mut LineReader<'_>) -> Result<Vec<Node>, String> {
    let mut nodes: Vec<Node> = Vec::new();
    while let Some(line) = r.next_content() {
        if section_end(line) {
            break;
        }
        let mut toks = tokens(line);
        let id: i64 = toks.parse("node id").map_err(|e| r.error(e))?;
        let name = toks.next().unwrap_or_default();
        let parent: i64 = toks.parse("node parent").map_err(|e| r.error(e))?;
        let Ok(id) = usize::try_from(id) else { continue };
        if id >= MAX_NODES || parent >= MAX_NODES as i64 || name.is_empty() {
            continue;
        }
        if nodes.len() <= id {
            nodes.resize(id + 1, Node::default());
        }
        nodes[id] = Node {
            name: name.to_string(),
            parent: usize::try_from(parent).ok(),
        };
    }
    Ok(nodes)
}

/// Material name up to the first `.` or whitespace.
fn material_name(line: &str) -> &str {
    let line = line.trim_start();
    let end = line
        .find(|c: char| c == '.' || c.is_whitespace())
        .unwrap_or(line.len());
    &line[..end]
}

fn read_vertex(line: &str, num_bones: usize) -> Result<(Vert, BlendCombo), String> {
    let mut toks = tokens(line);
    let parent: i64 = toks.parse("vertex parent")?;
    let mut v = Vert {
        pos: toks.vec3("vertex position")?,
        norm: toks.vec3("vertex normal")?,
        u: toks.parse("u")?,
        v: toks.parse("v")?,
        ..Vert::default()
    };
    v.pos.y = -v.pos.y;
    v.norm.y = -v.norm.y;
    v.v = 1.0 - v.v;

    let parent = usize::try_from(parent)
        .ok()
        .filter(|&p| p < num_bones)
        .ok_or_else(|| format!("vertex parent {parent} out of range"))?;
    let num_links: usize = toks.parse::<i64>("link count").map_or(0, |n| n.max(0) as usize);
    let mut combo = BlendCombo::default();
    let mut sorted = 0;
    let (mut pweight, mut tweight) = (0.0, 0.0);
    for _ in 0..num_links {
        let (Ok(bone), Ok(weight)) = (toks.parse::<usize>("link bone"), toks.parse::<f32>("link weight")) else {
            break;
        };
        if bone >= num_bones {
            return Err(format!("link bone {bone} out of range"));
        }
        tweight += weight;
        if bone == parent {
            pweight += weight;
        } else {
            sorted = combo.add_weight(sorted, weight, bone);
        }
    }
    if tweight < 1.0 {
        pweight += 1.0 - tweight;
    }
    if pweight > 0.0 {
        sorted = combo.add_weight(sorted, pweight, parent);
    }
    combo.finalize(sorted);
    Ok((v, combo))
}

fn read_triangles(r: &mut LineReader<'_>, num_bones: usize) -> Result<Vec<ImportedMesh>, String> {
    let mut materials: Vec<Material> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();
    while let Some(line) = r.next_content() {
        if section_end(line) {
            break;
        }
        let name = material_name(line);
        let mi = *by_name.entry(name.to_string()).or_insert_with(|| {
            materials.push(Material {
                mesh: ImportedMesh {
                    name: name.to_string(),
                    ..ImportedMesh::default()
                },
                ..Material::default()
            });
            materials.len() - 1
        });
        let mut tri = Tri::default();
        for i in 0..3 {
            let line = r
                .next_content()
                .ok_or_else(|| r.error("unexpected end of triangle"))?;
            let (v, c) = read_vertex(line, num_bones).map_err(|e| r.error(e))?;
            tri.vert[2 - i] = materials[mi].add_vert(v, c);
        }
        materials[mi].mesh.tris.push(tri);
    }
    Ok(materials.into_iter().map(|m| m.mesh).collect())
}

/// Bind pose from the `time 0` keys of a skeleton section.
fn read_skeleton(r: &mut LineReader<'_>, nodes: &[Node]) -> Result<Vec<BoneInfo>, String> {
    let mut locals = vec![None; nodes.len()];
    let mut time = None;
    while let Some(line) = r.next_content() {
        let mut toks = tokens(line);
        match toks.clone().next() {
            Some("time") => {
                toks.next();
                time = Some(toks.parse::<i64>("time").map_err(|e| r.error(e))?);
                continue;
            }
            Some("end") => break,
            _ if time != Some(0) => continue,
            _ => {}
        }
        let Ok((bone, dq)) = parse_key(&mut toks) else { continue };
        if let Some(slot) = locals.get_mut(bone) {
            *slot = Some(dq);
        }
    }
    let mut bones: Vec<BoneInfo> = Vec::with_capacity(nodes.len());
    for (node, local) in nodes.iter().zip(locals) {
        let mut b = BoneInfo::new(node.name.clone(), node.parent);
        let local = local.unwrap_or_default();
        let base = match node.parent.and_then(|p| bones.get(p)) {
            Some(parent) => parent.base * local,
            None => local,
        };
        b.set_base(base);
        bones.push(b);
    }
    Ok(bones)
}

/// Per-frame keys of an animation skeleton section, converted to stored frames.
fn read_frames(
    r: &mut LineReader<'_>,
    skel: &Skeleton,
    adjustments: &Adjustments,
) -> Result<Vec<DualQuat>, String> {
    let num_bones = skel.num_bones();
    let reference = skel.reference_frame();
    let mut frames: Vec<Option<Vec<Option<DualQuat>>>> = Vec::new();
    let mut frame: Option<usize> = None;
    while let Some(line) = r.next_content() {
        let mut toks = tokens(line);
        match toks.clone().next() {
            Some("time") => {
                toks.next();
                let t: i64 = toks.parse("time").map_err(|e| r.error(e))?;
                if t < 0 {
                    return Err(r.error(format!("negative time {t}")));
                }
                let t = r.declared(t, "time").map_err(|e| r.error(e))?;
                if frames.len() <= t {
                    frames.resize(t + 1, None);
                }
                frames[t].get_or_insert_with(|| vec![None; num_bones]);
                frame = Some(t);
                continue;
            }
            Some("end") => break,
            _ => {}
        }
        let Some(f) = frame else { continue };
        let Ok((bone, local)) = parse_key(&mut toks) else { continue };
        if bone >= num_bones {
            continue;
        }
        let first = frames.first().and_then(|f| f.as_ref()).and_then(|f| f[bone]);
        let fix = reference.map(|r| r[bone]).or(first);
        let dq = frame_from_local(&skel.bones, bone, local, adjustments, fix.as_ref());
        if let Some(Some(bones)) = frames.get_mut(f) {
            bones[bone] = Some(dq);
        }
    }

    // missing frames and bones repeat frame 0; frame 0 gaps hold the bind pose
    let first: Vec<DualQuat> = match frames.first() {
        Some(Some(f)) => f.iter().map(|b| b.unwrap_or_default()).collect(),
        _ => vec![DualQuat::IDENTITY; num_bones],
    };
    let mut out = Vec::with_capacity(frames.len() * num_bones);
    for f in &frames {
        match f {
            Some(bones) => out.extend(bones.iter().zip(&first).map(|(b, d)| b.unwrap_or(*d))),
            None => out.extend_from_slice(&first),
        }
    }
    Ok(out)
}

/// Loader for `.smd` files. Animations are named after their file.
#[derive(Copy, Clone, Debug, Default)]
pub struct SmdLoader;

impl SmdLoader {
    fn parse_error(file: &str, message: String) -> Error {
        Error::SmdParse {
            file: file.to_string(),
            message,
        }
    }

    fn check_version(file: &str, toks: &mut Tokens<'_>) -> Result<(), Error> {
        let version: i32 = toks
            .parse("version")
            .map_err(|e| Self::parse_error(file, e))?;
        if version != SMD_VERSION {
            return Err(Error::SmdVersion {
                file: file.to_string(),
                version,
            });
        }
        Ok(())
    }
}

impl SkelLoader for SmdLoader {
    fn format(&self) -> ModelFormat {
        ModelFormat::Smd
    }

    fn load_mesh(&self, file: &str, data: &[u8], skel: &Skeleton) -> Result<MeshImport, Error> {
        let err = |m: String| Self::parse_error(file, m);
        let mut r = LineReader::new(data).map_err(err)?;
        let mut nodes: Vec<Node> = Vec::new();
        let mut bones: Option<Vec<BoneInfo>> = None;
        let mut meshes = Vec::new();
        let install = skel.bones.is_empty();

        while let Some(line) = r.next_content() {
            let mut toks = tokens(line);
            match toks.next() {
                Some("version") => Self::check_version(file, &mut toks)?,
                Some("nodes") if install => nodes = read_nodes(&mut r).map_err(err)?,
                Some("triangles") => {
                    let num_bones = if install { nodes.len() } else { skel.num_bones() };
                    meshes.extend(read_triangles(&mut r, num_bones).map_err(err)?);
                }
                Some("skeleton") if install => {
                    bones = Some(read_skeleton(&mut r, &nodes).map_err(err)?);
                }
                Some("nodes" | "skeleton" | "vertexanimation") => skip_section(&mut r),
                _ => {}
            }
        }

        if install && !nodes.is_empty() {
            let bones = bones.unwrap_or_else(|| {
                nodes
                    .iter()
                    .map(|n| BoneInfo::new(n.name.clone(), n.parent))
                    .collect()
            });
            check_bone_order(&bones).map_err(err)?;
            log::debug!("read {} smd nodes from {}", bones.len(), file);
            Ok(MeshImport {
                bones: Some(bones),
                meshes,
            })
        } else {
            Ok(MeshImport {
                bones: None,
                meshes,
            })
        }
    }

    fn load_anim(
        &self,
        file: &str,
        data: &[u8],
        skel: &Skeleton,
        adjustments: &Adjustments,
    ) -> Result<AnimImport, Error> {
        if skel.find_anim(file, false).is_some() {
            return Ok(AnimImport::default());
        }
        let err = |m: String| Self::parse_error(file, m);
        if skel.bones.is_empty() {
            return Err(err("skeleton has no bones".to_string()));
        }
        let mut r = LineReader::new(data).map_err(err)?;
        let mut frames = Vec::new();
        while let Some(line) = r.next_content() {
            let mut toks = tokens(line);
            match toks.next() {
                Some("version") => Self::check_version(file, &mut toks)?,
                Some("nodes") => {
                    let nodes = read_nodes(&mut r).map_err(err)?;
                    if nodes.len() != skel.num_bones() {
                        return Err(Error::BoneCountMismatch {
                            file: file.to_string(),
                            expected: skel.num_bones(),
                            found: nodes.len(),
                        });
                    }
                }
                Some("skeleton") => frames = read_frames(&mut r, skel, adjustments).map_err(err)?,
                Some("triangles" | "vertexanimation") => skip_section(&mut r),
                _ => {}
            }
        }
        if frames.is_empty() {
            return Err(err("no animation frames".to_string()));
        }
        log::debug!(
            "loaded smd animation {} with {} frames",
            file,
            frames.len() / skel.num_bones()
        );
        Ok(AnimImport {
            clips: vec![(file.to_string(), frames)],
        })
    }
}
