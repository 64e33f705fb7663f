//! Inter-Quake Model (version 1) binary meshes and animations.

use super::{
    bones_from_local, check_bone_order, AnimImport, ImportedMesh, MeshImport, ModelFormat,
    Normals, SkelLoader,
};
use crate::{
    quat_from_xyz, Adjustments, BlendCombo, BumpVert, DualQuat, Error, Skeleton, Tri, Vert,
};
use byteorder::{ByteOrder, LittleEndian};
use glam::Vec3;

pub const IQM_MAGIC: &[u8; 16] = b"INTERQUAKEMODEL\0";
pub const IQM_VERSION: u32 = 1;
pub const IQM_MAX_FILE_SIZE: u32 = 16 << 20;
pub const IQM_HEADER_SIZE: usize = 16 + 27 * 4;

pub(crate) const IQM_POSITION: u32 = 0;
pub(crate) const IQM_TEXCOORD: u32 = 1;
pub(crate) const IQM_NORMAL: u32 = 2;
pub(crate) const IQM_TANGENT: u32 = 3;
pub(crate) const IQM_BLENDINDEXES: u32 = 4;
pub(crate) const IQM_BLENDWEIGHTS: u32 = 5;

pub(crate) const IQM_UBYTE: u32 = 1;
pub(crate) const IQM_FLOAT: u32 = 7;

const MESH_SIZE: usize = 24;
const VERTEX_ARRAY_SIZE: usize = 20;
const TRIANGLE_SIZE: usize = 12;
const JOINT_SIZE: usize = 44;
const POSE_SIZE: usize = 80;
const ANIM_SIZE: usize = 20;

#[derive(Clone, Debug, Default)]
struct Header {
    num_text: u32,
    ofs_text: u32,
    num_meshes: u32,
    ofs_meshes: u32,
    num_vertexarrays: u32,
    num_vertexes: u32,
    ofs_vertexarrays: u32,
    num_triangles: u32,
    ofs_triangles: u32,
    num_joints: u32,
    ofs_joints: u32,
    num_poses: u32,
    ofs_poses: u32,
    num_anims: u32,
    ofs_anims: u32,
    num_frames: u32,
    num_framechannels: u32,
    ofs_frames: u32,
}

/// Validated view over an IQM file's bytes.
struct IqmFile<'a> {
    file: &'a str,
    buf: &'a [u8],
    hdr: Header,
}

impl<'a> IqmFile<'a> {
    fn parse(file: &'a str, data: &'a [u8]) -> Result<Self, Error> {
        let err = |message: &str| Error::IqmParse {
            file: file.to_string(),
            message: message.to_string(),
        };
        if data.len() < IQM_HEADER_SIZE || &data[..16] != IQM_MAGIC {
            return Err(err("bad magic"));
        }
        let mut words = [0u32; 27];
        LittleEndian::read_u32_into(&data[16..IQM_HEADER_SIZE], &mut words);
        let version = words[0];
        if version != IQM_VERSION {
            return Err(Error::IqmVersion {
                file: file.to_string(),
                version,
            });
        }
        let filesize = words[1];
        if filesize > IQM_MAX_FILE_SIZE {
            return Err(Error::IqmFileTooLarge {
                file: file.to_string(),
                size: filesize,
            });
        }
        if (filesize as usize) < IQM_HEADER_SIZE || data.len() < filesize as usize {
            return Err(err("truncated file"));
        }
        let hdr = Header {
            num_text: words[3],
            ofs_text: words[4],
            num_meshes: words[5],
            ofs_meshes: words[6],
            num_vertexarrays: words[7],
            num_vertexes: words[8],
            ofs_vertexarrays: words[9],
            num_triangles: words[10],
            ofs_triangles: words[11],
            num_joints: words[13],
            ofs_joints: words[14],
            num_poses: words[15],
            ofs_poses: words[16],
            num_anims: words[17],
            ofs_anims: words[18],
            num_frames: words[19],
            num_framechannels: words[20],
            ofs_frames: words[21],
        };
        Ok(Self {
            file,
            buf: &data[..filesize as usize],
            hdr,
        })
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::IqmParse {
            file: self.file.to_string(),
            message: message.into(),
        }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8], Error> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or_else(|| self.error(format!("read of {len} bytes at {offset} out of range")))
    }

    /// `count * size` bytes, or a parse error when that cannot fit in the file.
    fn span(&self, count: usize, size: usize) -> Result<usize, Error> {
        count
            .checked_mul(size)
            .filter(|&n| n <= self.buf.len())
            .ok_or_else(|| self.error(format!("{count} records of {size} bytes exceed the file")))
    }

    /// Bounds-checked table of `count` records of `size` bytes starting at `offset`.
    fn table(&self, offset: u32, count: u32, size: usize) -> Result<&'a [u8], Error> {
        self.bytes(offset as usize, self.span(count as usize, size)?)
    }

    fn u32(b: &[u8], word: usize) -> u32 {
        LittleEndian::read_u32(&b[word * 4..])
    }

    fn i32(b: &[u8], word: usize) -> i32 {
        LittleEndian::read_i32(&b[word * 4..])
    }

    fn f32(b: &[u8], word: usize) -> f32 {
        LittleEndian::read_f32(&b[word * 4..])
    }

    fn vec3(b: &[u8], word: usize) -> Vec3 {
        Vec3::new(Self::f32(b, word), Self::f32(b, word + 1), Self::f32(b, word + 2))
    }

    /// NUL-terminated string from the text block.
    fn string(&self, ofs: u32) -> Result<String, Error> {
        if self.hdr.num_text == 0 {
            return Ok(String::new());
        }
        let text = self.table(self.hdr.ofs_text, self.hdr.num_text, 1)?;
        let start = text
            .get(ofs as usize..)
            .ok_or_else(|| self.error(format!("string offset {ofs} out of range")))?;
        let end = start.iter().position(|&c| c == 0).unwrap_or(start.len());
        Ok(String::from_utf8_lossy(&start[..end]).into_owned())
    }

    /// Float vertex attribute with `size` components per vertex.
    fn float_array(&self, offset: u32, size: usize) -> Result<Vec<f32>, Error> {
        let raw = self.table(offset, self.hdr.num_vertexes, size * 4)?;
        let n = raw.len() / 4;
        let mut out = vec![0.0; n];
        LittleEndian::read_f32_into(raw, &mut out);
        Ok(out)
    }

    fn byte_array(&self, offset: u32) -> Result<&'a [u8], Error> {
        self.table(offset, self.hdr.num_vertexes, 4)
    }

    fn joints(&self) -> Result<Vec<(String, Option<usize>, DualQuat)>, Error> {
        let table = self.table(self.hdr.ofs_joints, self.hdr.num_joints, JOINT_SIZE)?;
        table
            .chunks_exact(JOINT_SIZE)
            .map(|j| {
                let name = self.string(Self::u32(j, 0))?;
                let parent = usize::try_from(Self::i32(j, 1)).ok();
                let mut pos = Self::vec3(j, 2);
                let orient = Self::vec3(j, 5);
                pos.y = -pos.y;
                let local =
                    DualQuat::from_rotation_translation(quat_from_xyz(-orient.x, orient.y, -orient.z), pos);
                Ok((name, parent, local))
            })
            .collect()
    }

    fn meshes(&self, num_bones: usize) -> Result<Vec<ImportedMesh>, Error> {
        let (mut vpos, mut vnorm, mut vtan, mut vtc) = (None, None, None, None);
        let (mut vindex, mut vweight) = (None, None);
        let arrays = self.table(
            self.hdr.ofs_vertexarrays,
            self.hdr.num_vertexarrays,
            VERTEX_ARRAY_SIZE,
        )?;
        for va in arrays.chunks_exact(VERTEX_ARRAY_SIZE) {
            let (kind, format, size, offset) =
                (Self::u32(va, 0), Self::u32(va, 2), Self::u32(va, 3), Self::u32(va, 4));
            let expect = |want_format: u32, want_size: u32| {
                if format == want_format && size == want_size {
                    Ok(())
                } else {
                    Err(self.error(format!(
                        "vertex array {kind} has format {format} size {size}"
                    )))
                }
            };
            match kind {
                IQM_POSITION => {
                    expect(IQM_FLOAT, 3)?;
                    vpos = Some(self.float_array(offset, 3)?);
                }
                IQM_NORMAL => {
                    expect(IQM_FLOAT, 3)?;
                    vnorm = Some(self.float_array(offset, 3)?);
                }
                IQM_TANGENT => {
                    expect(IQM_FLOAT, 4)?;
                    vtan = Some(self.float_array(offset, 4)?);
                }
                IQM_TEXCOORD => {
                    expect(IQM_FLOAT, 2)?;
                    vtc = Some(self.float_array(offset, 2)?);
                }
                IQM_BLENDINDEXES => {
                    expect(IQM_UBYTE, 4)?;
                    vindex = Some(self.byte_array(offset)?);
                }
                IQM_BLENDWEIGHTS => {
                    expect(IQM_UBYTE, 4)?;
                    vweight = Some(self.byte_array(offset)?);
                }
                _ => {}
            }
        }

        let tris = self.table(self.hdr.ofs_triangles, self.hdr.num_triangles, TRIANGLE_SIZE)?;
        let imeshes = self.table(self.hdr.ofs_meshes, self.hdr.num_meshes, MESH_SIZE)?;
        let num_vertexes = self.hdr.num_vertexes;
        let mut out = Vec::with_capacity(self.hdr.num_meshes as usize);
        for im in imeshes.chunks_exact(MESH_SIZE) {
            let name = self.string(Self::u32(im, 0))?;
            let (first_vertex, num_verts) = (Self::u32(im, 2), Self::u32(im, 3));
            let (first_tri, num_tris) = (Self::u32(im, 4), Self::u32(im, 5));
            if first_vertex.checked_add(num_verts).is_none_or(|end| end > num_vertexes) {
                return Err(self.error(format!("mesh {name} vertex range out of bounds")));
            }
            if first_tri
                .checked_add(num_tris)
                .is_none_or(|end| end > self.hdr.num_triangles)
            {
                return Err(self.error(format!("mesh {name} triangle range out of bounds")));
            }
            let vpos: &[f32] = match &vpos {
                Some(p) => p,
                None if num_verts == 0 => &[],
                None => return Err(self.error("missing vertex positions")),
            };

            let mut mesh = ImportedMesh {
                name,
                normals: if vnorm.is_some() {
                    Normals::Provided
                } else {
                    Normals::Build
                },
                ..ImportedMesh::default()
            };
            let mut bump = Vec::new();
            for fj in first_vertex as usize..(first_vertex + num_verts) as usize {
                let mut v = Vert {
                    pos: Vec3::from_slice(&vpos[3 * fj..]),
                    ..Vert::default()
                };
                v.pos.y = -v.pos.y;
                if let Some(tc) = &vtc {
                    v.u = tc[2 * fj];
                    v.v = tc[2 * fj + 1];
                }
                if let Some(n) = &vnorm {
                    v.norm = Vec3::from_slice(&n[3 * fj..]);
                    v.norm.y = -v.norm.y;
                    if let Some(t) = &vtan {
                        bump.push(BumpVert {
                            tangent: Vec3::new(-t[4 * fj], t[4 * fj + 1], -t[4 * fj + 2]),
                            bitangent: t[4 * fj + 3],
                        });
                    }
                }
                let mut combo = BlendCombo::default();
                let mut sorted = 0;
                if let (Some(index), Some(weight)) = (vindex, vweight) {
                    for k in 0..4 {
                        let bone = usize::from(index[4 * fj + k]);
                        let w = f32::from(weight[4 * fj + k]);
                        if w > 0.0 && bone >= num_bones {
                            return Err(self.error(format!("blend index {bone} out of range")));
                        }
                        sorted = combo.add_weight(sorted, w, bone);
                    }
                }
                combo.finalize(sorted);
                mesh.verts.push(v);
                mesh.blends.push(combo);
            }
            if !bump.is_empty() {
                mesh.bump_verts = Some(bump);
            }
            let tri_bytes = &tris[first_tri as usize * TRIANGLE_SIZE..];
            for t in tri_bytes.chunks_exact(TRIANGLE_SIZE).take(num_tris as usize) {
                let mut tri = Tri::default();
                for k in 0..3 {
                    let index = Self::u32(t, k);
                    tri.vert[k] = index
                        .checked_sub(first_vertex)
                        .filter(|&i| i < num_verts)
                        .ok_or_else(|| self.error(format!("triangle index {index} out of mesh")))?;
                }
                mesh.tris.push(tri);
            }
            out.push(mesh);
        }
        Ok(out)
    }

    fn anims(&self, skel: &Skeleton, adjustments: &Adjustments) -> Result<AnimImport, Error> {
        let num_bones = skel.num_bones();
        if self.hdr.num_anims == 0 {
            return Ok(AnimImport::default());
        }
        if self.hdr.num_poses as usize != num_bones {
            return Err(Error::BoneCountMismatch {
                file: self.file.to_string(),
                expected: num_bones,
                found: self.hdr.num_poses as usize,
            });
        }
        let poses = self.table(self.hdr.ofs_poses, self.hdr.num_poses, POSE_SIZE)?;
        let anims = self.table(self.hdr.ofs_anims, self.hdr.num_anims, ANIM_SIZE)?;
        let channels = self.hdr.num_framechannels as usize;

        let mut import = AnimImport::default();
        let mut reference: Option<Vec<DualQuat>> = skel.reference_frame().map(<[_]>::to_vec);
        for a in anims.chunks_exact(ANIM_SIZE) {
            let name = format!("{}:{}", self.file, self.string(Self::u32(a, 0))?);
            if skel.find_anim(&name, false).is_some()
                || import.clips.iter().any(|(n, _)| *n == name)
            {
                continue;
            }
            let (first_frame, num_frames) = (Self::u32(a, 1), Self::u32(a, 2));
            if first_frame
                .checked_add(num_frames)
                .is_none_or(|end| end > self.hdr.num_frames)
            {
                return Err(self.error(format!("frames of {name} out of range")));
            }
            let (first_frame, num_frames) = (first_frame as usize, num_frames as usize);
            if num_frames.saturating_mul(num_bones) > IQM_MAX_FILE_SIZE as usize {
                return Err(self.error(format!("{name} has too many frames")));
            }
            let frame_size = self.span(channels, 2)?;
            let start = self.span(first_frame, frame_size)?;
            let raw = self.bytes(
                (self.hdr.ofs_frames as usize).saturating_add(start),
                self.span(num_frames, frame_size)?,
            )?;
            let mut data = vec![0u16; num_frames * channels];
            LittleEndian::read_u16_into(raw, &mut data);
            let mut data = data.into_iter();
            let mut next = || {
                data.next()
                    .map(f32::from)
                    .ok_or_else(|| self.error(format!("frame data of {name} too short")))
            };

            let mut frames = Vec::with_capacity(num_frames * num_bones);
            for _ in 0..num_frames {
                for (k, p) in poses.chunks_exact(POSE_SIZE).enumerate() {
                    let mask = Self::u32(p, 1);
                    let (offpos, offorient) = (Self::vec3(p, 2), Self::vec3(p, 5));
                    let (scalepos, scaleorient) = (Self::vec3(p, 11), Self::vec3(p, 14));
                    let mut pos = Vec3::new(offpos.x, -offpos.y, offpos.z);
                    let mut orient = Vec3::new(-offorient.x, offorient.y, -offorient.z);
                    if mask & 0x01 != 0 {
                        pos.x += next()? * scalepos.x;
                    }
                    if mask & 0x02 != 0 {
                        pos.y -= next()? * scalepos.y;
                    }
                    if mask & 0x04 != 0 {
                        pos.z += next()? * scalepos.z;
                    }
                    if mask & 0x08 != 0 {
                        orient.x -= next()? * scaleorient.x;
                    }
                    if mask & 0x10 != 0 {
                        orient.y += next()? * scaleorient.y;
                    }
                    if mask & 0x20 != 0 {
                        orient.z -= next()? * scaleorient.z;
                    }
                    // scale channels are read past
                    for bit in [0x40, 0x80, 0x100] {
                        if mask & bit != 0 {
                            next()?;
                        }
                    }
                    let local = DualQuat::from_rotation_translation(
                        quat_from_xyz(orient.x, orient.y, orient.z),
                        pos,
                    );
                    let frame = frames.len();
                    let reference_bone = reference.as_ref().map(|r| r[k]);
                    let dq = super::frame_from_local(
                        &skel.bones,
                        k,
                        local,
                        adjustments,
                        reference_bone.as_ref(),
                    );
                    frames.push(dq);
                    if reference.is_none() && frame + 1 == num_bones {
                        reference = Some(frames.clone());
                    }
                }
            }
            import.clips.push((name, frames));
        }
        Ok(import)
    }
}

/// Loader for `.iqm` files. Animations are named `file:clip`.
#[derive(Copy, Clone, Debug, Default)]
pub struct IqmLoader;

impl SkelLoader for IqmLoader {
    fn format(&self) -> ModelFormat {
        ModelFormat::Iqm
    }

    fn load_mesh(&self, file: &str, data: &[u8], skel: &Skeleton) -> Result<MeshImport, Error> {
        let iqm = IqmFile::parse(file, data)?;
        let mut import = MeshImport::default();
        let mut num_bones = skel.num_bones();
        if iqm.hdr.num_joints > 0 {
            let joints = iqm.joints()?;
            if skel.bones.is_empty() {
                let bones = bones_from_local(&joints);
                check_bone_order(&bones).map_err(|m| iqm.error(m))?;
                num_bones = bones.len();
                import.bones = Some(bones);
            } else if joints.len() != num_bones {
                return Err(Error::BoneCountMismatch {
                    file: file.to_string(),
                    expected: num_bones,
                    found: joints.len(),
                });
            }
        }
        import.meshes = iqm.meshes(num_bones)?;
        log::debug!(
            "loaded {} meshes and {} joints from {}",
            import.meshes.len(),
            iqm.hdr.num_joints,
            file
        );
        Ok(import)
    }

    fn load_anim(
        &self,
        file: &str,
        data: &[u8],
        skel: &Skeleton,
        adjustments: &Adjustments,
    ) -> Result<AnimImport, Error> {
        let iqm = IqmFile::parse(file, data)?;
        iqm.anims(skel, adjustments)
    }
}
