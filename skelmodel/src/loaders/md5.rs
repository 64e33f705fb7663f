//! MD5 version 10 text meshes (`.md5mesh`) and animations (`.md5anim`).

use super::text::{tokens, LineReader};
use super::{
    check_bone_order, frame_from_local, AnimImport, ImportedMesh, MeshImport, ModelFormat,
    Normals, SkelLoader,
};
use crate::{quat_from_xyz, Adjustments, BlendCombo, BoneInfo, DualQuat, Error, Skeleton, Tri, Vert};
use glam::{Quat, Vec3};

pub const MD5_VERSION: i32 = 10;

#[derive(Copy, Clone, Debug)]
struct Joint {
    pos: Vec3,
    orient: Quat,
}

/// Reads `( x y z ) ( x y z )`, converting into the engine frame.
fn parse_joint(toks: &mut super::text::Tokens<'_>) -> Result<Joint, String> {
    let mut pos = toks.bracketed_vec3("joint position")?;
    let o = toks.bracketed_vec3("joint orientation")?;
    pos.y = -pos.y;
    Ok(Joint {
        pos,
        orient: quat_from_xyz(-o.x, o.y, -o.z),
    })
}

fn block_end(line: &str) -> bool {
    line.trim_start().starts_with('}')
}

#[derive(Copy, Clone, Debug, Default)]
struct Weight {
    joint: usize,
    bias: f32,
    pos: Vec3,
}

#[derive(Copy, Clone, Debug, Default)]
struct VertInfo {
    u: f32,
    v: f32,
    start: usize,
    count: usize,
}

#[derive(Debug, Default)]
struct MeshBlock {
    name: Option<String>,
    shader: Option<String>,
    verts: Vec<VertInfo>,
    tris: Vec<Tri>,
    weights: Vec<Weight>,
}

impl MeshBlock {
    fn read(r: &mut LineReader<'_>) -> Result<Self, String> {
        let mut m = MeshBlock::default();
        while let Some(line) = r.next_line() {
            if block_end(line) {
                break;
            }
            if let Some(idx) = line.find("// meshes:") {
                let name = line[idx + "// meshes:".len()..].trim();
                m.name = Some(name.to_string());
                continue;
            }
            let mut toks = tokens(line);
            let res: Result<(), String> = match toks.next() {
                Some("shader") => {
                    m.shader = toks.next().map(str::to_string);
                    Ok(())
                }
                Some("numverts") => toks
                    .parse::<i64>("numverts")
                    .and_then(|n| r.declared(n, "numverts"))
                    .map(|n| m.verts = vec![VertInfo::default(); n]),
                Some("numtris") => toks
                    .parse::<i64>("numtris")
                    .and_then(|n| r.declared(n, "numtris"))
                    .map(|n| m.tris = vec![Tri::default(); n]),
                Some("numweights") => toks
                    .parse::<i64>("numweights")
                    .and_then(|n| r.declared(n, "numweights"))
                    .map(|n| m.weights = vec![Weight::default(); n]),
                Some("vert") => (|| -> Result<(), String> {
                    let index: usize = toks.parse("vert index")?;
                    toks.expect("(")?;
                    let u = toks.parse("u")?;
                    let v = toks.parse("v")?;
                    toks.expect(")")?;
                    let v = VertInfo {
                        u,
                        v,
                        start: toks.parse("weight start")?,
                        count: toks.parse("weight count")?,
                    };
                    let slot = m.verts.get_mut(index).ok_or("vert index out of range")?;
                    *slot = v;
                    Ok(())
                })(),
                Some("tri") => (|| -> Result<(), String> {
                    let index: usize = toks.parse("tri index")?;
                    let mut t = Tri::default();
                    for v in &mut t.vert {
                        *v = toks.parse("tri vertex")?;
                    }
                    let slot = m.tris.get_mut(index).ok_or("tri index out of range")?;
                    *slot = t;
                    Ok(())
                })(),
                Some("weight") => (|| -> Result<(), String> {
                    let index: usize = toks.parse("weight index")?;
                    let joint = toks.parse("weight joint")?;
                    let bias = toks.parse("weight bias")?;
                    let mut pos = toks.bracketed_vec3("weight position")?;
                    pos.y = -pos.y;
                    let slot = m.weights.get_mut(index).ok_or("weight index out of range")?;
                    *slot = Weight { joint, bias, pos };
                    Ok(())
                })(),
                _ => Ok(()),
            };
            res.map_err(|e| r.error(e))?;
        }
        Ok(m)
    }

    /// Positions from the weighted joint-space offsets and blend combos from the biases.
    fn build(self, joints: &[Joint]) -> Result<ImportedMesh, String> {
        let name = self.name.or(self.shader).unwrap_or_default();
        let mut mesh = ImportedMesh {
            name,
            tris: self.tris,
            ..ImportedMesh::default()
        };
        for vi in &self.verts {
            let weights = vi
                .start
                .checked_add(vi.count)
                .and_then(|end| self.weights.get(vi.start..end))
                .ok_or_else(|| {
                    format!(
                        "vertex weights {}+{} out of range of {}",
                        vi.start,
                        vi.count,
                        self.weights.len()
                    )
                })?;
            let mut pos = Vec3::ZERO;
            let mut combo = BlendCombo::default();
            let mut sorted = 0;
            for w in weights {
                let j = joints
                    .get(w.joint)
                    .ok_or_else(|| format!("weight joint {} out of range", w.joint))?;
                pos += (j.orient * w.pos + j.pos) * w.bias;
                sorted = combo.add_weight(sorted, w.bias, w.joint);
            }
            combo.finalize(sorted);
            mesh.verts.push(Vert {
                pos,
                u: vi.u,
                v: vi.v,
                ..Vert::default()
            });
            mesh.blends.push(combo);
        }
        let n = mesh.verts.len() as u32;
        if mesh.tris.iter().any(|t| t.vert.iter().any(|&v| v >= n)) {
            return Err(format!("triangle vertex out of range in mesh {}", mesh.name));
        }
        Ok(mesh)
    }
}

/// Loader for `.md5mesh`/`.md5anim` pairs. Animations are named after their file.
#[derive(Copy, Clone, Debug)]
pub struct Md5Loader {
    /// Cosine limit for normal smoothing; above 1 builds unsmoothed normals.
    smooth: f32,
}

impl Md5Loader {
    /// `smooth` is the smoothing angle in degrees, zero or less for none.
    pub fn new(smooth: f32) -> Self {
        let smooth = if smooth > 0.0 {
            smooth.clamp(0.0, 180.0).to_radians().cos()
        } else {
            2.0
        };
        Self { smooth }
    }

    fn parse_error(file: &str, message: String) -> Error {
        Error::Md5Parse {
            file: file.to_string(),
            message,
        }
    }

    fn check_version(file: &str, toks: &mut super::text::Tokens<'_>) -> Result<(), Error> {
        let version: i32 = toks
            .parse("MD5Version")
            .map_err(|e| Self::parse_error(file, e))?;
        if version != MD5_VERSION {
            return Err(Error::Md5Version {
                file: file.to_string(),
                version,
            });
        }
        Ok(())
    }
}

impl Default for Md5Loader {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl SkelLoader for Md5Loader {
    fn format(&self) -> ModelFormat {
        ModelFormat::Md5
    }

    fn load_mesh(&self, file: &str, data: &[u8], skel: &Skeleton) -> Result<MeshImport, Error> {
        let err = |m: String| Self::parse_error(file, m);
        let mut r = LineReader::new(data).map_err(err)?;
        let mut num_joints = None;
        let mut joints: Vec<Joint> = Vec::new();
        let mut bones: Vec<BoneInfo> = Vec::new();
        let mut blocks = Vec::new();

        while let Some(line) = r.next_line() {
            let mut toks = tokens(line);
            match toks.next() {
                Some("MD5Version") => Self::check_version(file, &mut toks)?,
                Some("numJoints") => {
                    let n: i64 = toks.parse("numJoints").map_err(|e| err(r.error(e)))?;
                    if n < 1 {
                        return Err(err(r.error("numJoints must be positive")));
                    }
                    num_joints = Some(n as usize);
                }
                Some("numMeshes") => {
                    let n: i64 = toks.parse("numMeshes").map_err(|e| err(r.error(e)))?;
                    if n < 1 {
                        return Err(err(r.error("numMeshes must be positive")));
                    }
                }
                Some("joints") => {
                    while let Some(line) = r.next_line() {
                        if block_end(line) {
                            break;
                        }
                        let mut toks = tokens(line);
                        let Some(name) = toks.next() else { continue };
                        let parent: i32 = toks.parse("joint parent").map_err(|e| err(r.error(e)))?;
                        let joint = parse_joint(&mut toks).map_err(|e| err(r.error(e)))?;
                        let mut b = BoneInfo::new(name, usize::try_from(parent).ok());
                        b.set_base(DualQuat::from_rotation_translation(joint.orient, joint.pos));
                        bones.push(b);
                        joints.push(joint);
                    }
                    let expected = if skel.bones.is_empty() {
                        num_joints.unwrap_or(joints.len())
                    } else {
                        skel.num_bones()
                    };
                    if joints.len() != expected {
                        return Err(Error::BoneCountMismatch {
                            file: file.to_string(),
                            expected,
                            found: joints.len(),
                        });
                    }
                }
                Some("mesh") => blocks.push(MeshBlock::read(&mut r).map_err(err)?),
                _ => {}
            }
        }

        if joints.is_empty() {
            return Err(err("no joints".to_string()));
        }
        let mut import = MeshImport::default();
        if skel.bones.is_empty() {
            check_bone_order(&bones).map_err(err)?;
            import.bones = Some(bones);
        }
        let normals = if self.smooth <= 1.0 {
            Normals::Smooth(self.smooth)
        } else {
            Normals::Build
        };
        for block in blocks {
            let mut mesh = block.build(&joints).map_err(err)?;
            mesh.normals = normals;
            import.meshes.push(mesh);
        }
        Ok(import)
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
        let num_bones = skel.num_bones();
        let mut r = LineReader::new(data).map_err(err)?;
        let mut num_frames = 0usize;
        let mut num_components = 0usize;
        // (parent, flags, start)
        let mut hierarchy: Vec<(i32, u32, usize)> = Vec::new();
        let mut base: Vec<Joint> = Vec::new();
        let mut frames: Vec<Option<Vec<DualQuat>>> = Vec::new();
        let reference = skel.reference_frame().map(<[_]>::to_vec);

        while let Some(line) = r.next_line() {
            let mut toks = tokens(line);
            match toks.next() {
                Some("MD5Version") => Self::check_version(file, &mut toks)?,
                Some("numJoints") => {
                    let n: usize = toks.parse("numJoints").map_err(|e| err(r.error(e)))?;
                    if n != num_bones {
                        return Err(Error::BoneCountMismatch {
                            file: file.to_string(),
                            expected: num_bones,
                            found: n,
                        });
                    }
                }
                Some("numFrames") => {
                    let n: i64 = toks.parse("numFrames").map_err(|e| err(r.error(e)))?;
                    if n < 1 {
                        return Err(err(r.error("numFrames must be positive")));
                    }
                    num_frames = r.declared(n, "numFrames").map_err(|e| err(r.error(e)))?;
                    frames = vec![None; num_frames];
                }
                Some("numAnimatedComponents") => {
                    num_components = toks
                        .parse::<i64>("numAnimatedComponents")
                        .map_err(|e| err(r.error(e)))?
                        .max(0) as usize;
                }
                Some("bounds") => while r.next_line().is_some_and(|l| !block_end(l)) {},
                Some("hierarchy") => {
                    while let Some(line) = r.next_line() {
                        if block_end(line) {
                            break;
                        }
                        let mut toks = tokens(line);
                        if toks.next().is_none() {
                            continue;
                        }
                        let entry = (|| {
                            Ok::<_, String>((
                                toks.parse("parent")?,
                                toks.parse("flags")?,
                                toks.parse("start")?,
                            ))
                        })()
                        .map_err(|e| err(r.error(e)))?;
                        hierarchy.push(entry);
                    }
                }
                Some("baseframe") => {
                    while let Some(line) = r.next_line() {
                        if block_end(line) {
                            break;
                        }
                        let mut toks = tokens(line);
                        if line.trim().is_empty() {
                            continue;
                        }
                        base.push(parse_joint(&mut toks).map_err(|e| err(r.error(e)))?);
                    }
                    if base.len() != num_bones {
                        return Err(Error::BoneCountMismatch {
                            file: file.to_string(),
                            expected: num_bones,
                            found: base.len(),
                        });
                    }
                }
                Some("frame") => {
                    let index: usize = toks.parse("frame index").map_err(|e| err(r.error(e)))?;
                    let mut values = Vec::new();
                    while let Some(line) = r.next_line() {
                        if block_end(line) {
                            break;
                        }
                        for tok in line.split_whitespace() {
                            if values.len() >= num_components {
                                break;
                            }
                            let v: f32 = tok
                                .parse()
                                .map_err(|_| err(r.error(format!("invalid frame value '{tok}'"))))?;
                            values.push(v);
                        }
                    }
                    if hierarchy.len() != num_bones || base.len() != num_bones {
                        return Err(err(r.error("frame before hierarchy and baseframe")));
                    }
                    if index >= num_frames {
                        return Err(err(r.error(format!("frame {index} out of range"))));
                    }
                    let mut out = Vec::with_capacity(num_bones);
                    for (i, (&(_, flags, start), joint)) in hierarchy.iter().zip(&base).enumerate() {
                        let mut pos = joint.pos;
                        let mut orient = joint.orient;
                        if flags != 0 && start < values.len() {
                            let mut data = values[start..].iter().copied();
                            let mut o = Vec3::new(orient.x, orient.y, orient.z);
                            let mut take = |bit: u32, dst: &mut f32, sign: f32| {
                                if flags & bit != 0 {
                                    if let Some(v) = data.next() {
                                        *dst = sign * v;
                                    }
                                }
                            };
                            take(1, &mut pos.x, 1.0);
                            take(2, &mut pos.y, -1.0);
                            take(4, &mut pos.z, 1.0);
                            take(8, &mut o.x, -1.0);
                            take(16, &mut o.y, 1.0);
                            take(32, &mut o.z, -1.0);
                            orient = quat_from_xyz(o.x, o.y, o.z);
                        }
                        let local = DualQuat::from_rotation_translation(orient, pos);
                        let reference_bone = match &reference {
                            Some(r) => Some(r[i]),
                            None => frames.first().and_then(|f| f.as_ref()).map(|f| f[i]),
                        };
                        out.push(frame_from_local(
                            &skel.bones,
                            i,
                            local,
                            adjustments,
                            reference_bone.as_ref(),
                        ));
                    }
                    frames[index] = Some(out);
                }
                _ => {}
            }
        }

        if num_frames == 0 {
            return Err(err("missing numFrames".to_string()));
        }
        if base.len() != num_bones {
            return Err(err("missing baseframe".to_string()));
        }
        // frames the file never lists hold the base pose
        let base_frame: Vec<DualQuat> = base
            .iter()
            .enumerate()
            .map(|(i, j)| {
                frame_from_local(
                    &skel.bones,
                    i,
                    DualQuat::from_rotation_translation(j.orient, j.pos),
                    adjustments,
                    None,
                )
            })
            .collect();
        let mut all = Vec::with_capacity(num_frames * num_bones);
        for f in frames {
            all.extend(f.unwrap_or_else(|| base_frame.clone()));
        }
        log::debug!("loaded md5 animation {} with {} frames", file, num_frames);
        Ok(AnimImport {
            clips: vec![(file.to_string(), all)],
        })
    }
}
