//! Shared test data: an in-memory IQM writer and one three-bone rig (root, spine, head) written
//! in every supported format.
//!
//! The rig's bind pose puts the spine 2 units above the root and the head 1 unit above the
//! spine. Its two-frame animation holds the bind pose in frame 0 and bends the spine +90 degrees
//! about X in frame 1, which moves the head from (0, 0, 3) to (0, -1, 2).

use byteorder::{LittleEndian, WriteBytesExt};
use glam::Vec3;

pub(crate) fn assert_approx(actual: f32, expected: f32) {
    let eps = 1e-3;
    let diff = (actual - expected).abs();
    assert!(
        diff <= eps,
        "expected {expected}, got {actual} (diff {diff})"
    );
}

pub(crate) fn assert_vec3_approx(actual: Vec3, expected: Vec3) {
    assert_approx(actual.x, expected.x);
    assert_approx(actual.y, expected.y);
    assert_approx(actual.z, expected.z);
}

#[derive(Clone, Debug)]
pub(crate) struct IqmJoint {
    pub name: String,
    pub parent: i32,
    pub pos: [f32; 3],
    /// Vector part of the orientation; the scalar is rebuilt on load.
    pub orient: [f32; 3],
}

impl IqmJoint {
    pub fn new(name: &str, parent: i32, pos: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            parent,
            pos,
            orient: [0.0; 3],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct IqmVertex {
    pub pos: [f32; 3],
    pub uv: [f32; 2],
    pub norm: Option<[f32; 3]>,
    pub bones: [u8; 4],
    pub weights: [u8; 4],
}

impl IqmVertex {
    pub fn on_bone(pos: [f32; 3], bone: u8) -> Self {
        Self {
            pos,
            bones: [bone, 0, 0, 0],
            weights: [255, 0, 0, 0],
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct IqmMesh {
    pub name: String,
    pub verts: Vec<IqmVertex>,
    /// Mesh-local vertex indices.
    pub tris: Vec<[u32; 3]>,
}

/// One pose per joint: (position, orientation vector part).
pub(crate) type IqmFrame = Vec<([f32; 3], [f32; 3])>;

#[derive(Clone, Debug, Default)]
pub(crate) struct IqmAnim {
    pub name: String,
    pub frames: Vec<IqmFrame>,
}

/// Builds version 1 IQM files. Every joint animates all six position and orientation channels.
#[derive(Clone, Debug)]
pub(crate) struct IqmWriter {
    pub version: u32,
    pub joints: Vec<IqmJoint>,
    pub meshes: Vec<IqmMesh>,
    pub anims: Vec<IqmAnim>,
}

impl Default for IqmWriter {
    fn default() -> Self {
        Self {
            version: 1,
            joints: Vec::new(),
            meshes: Vec::new(),
            anims: Vec::new(),
        }
    }
}

const HEADER_SIZE: usize = 16 + 27 * 4;

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.write_u32::<LittleEndian>(v).unwrap();
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.write_i32::<LittleEndian>(v).unwrap();
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.write_f32::<LittleEndian>(v).unwrap();
}

fn float_array(values: impl Iterator<Item = f32>) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        put_f32(&mut out, v);
    }
    out
}

impl IqmWriter {
    pub fn build(&self) -> Vec<u8> {
        let mut text = vec![0u8];
        let mut name = |s: &str| {
            let ofs = text.len() as u32;
            text.extend_from_slice(s.as_bytes());
            text.push(0);
            ofs
        };
        let mesh_names: Vec<u32> = self.meshes.iter().map(|m| name(&m.name)).collect();
        let joint_names: Vec<u32> = self.joints.iter().map(|j| name(&j.name)).collect();
        let anim_names: Vec<u32> = self.anims.iter().map(|a| name(&a.name)).collect();

        let verts: Vec<&IqmVertex> = self.meshes.iter().flat_map(|m| &m.verts).collect();
        let num_verts = verts.len() as u32;
        let has_norms = verts.iter().all(|v| v.norm.is_some()) && !verts.is_empty();
        let num_tris: usize = self.meshes.iter().map(|m| m.tris.len()).sum();

        let mut body = Vec::new();
        let at = |body: &Vec<u8>| (HEADER_SIZE + body.len()) as u32;

        let ofs_text = at(&body);
        body.extend_from_slice(&text);
        while body.len() % 4 != 0 {
            body.push(0);
        }

        let ofs_meshes = at(&body);
        let (mut first_vertex, mut first_tri) = (0u32, 0u32);
        for (m, &n) in self.meshes.iter().zip(&mesh_names) {
            put_u32(&mut body, n);
            put_u32(&mut body, 0);
            put_u32(&mut body, first_vertex);
            put_u32(&mut body, m.verts.len() as u32);
            put_u32(&mut body, first_tri);
            put_u32(&mut body, m.tris.len() as u32);
            first_vertex += m.verts.len() as u32;
            first_tri += m.tris.len() as u32;
        }

        // (type, format, size, data)
        let mut arrays: Vec<(u32, u32, u32, Vec<u8>)> = Vec::new();
        let positions = float_array(verts.iter().flat_map(|v| v.pos));
        let texcoords = float_array(verts.iter().flat_map(|v| v.uv));
        let normals = float_array(verts.iter().flat_map(|v| v.norm.unwrap_or_default()));
        arrays.push((0, 7, 3, positions));
        arrays.push((1, 7, 2, texcoords));
        if has_norms {
            arrays.push((2, 7, 3, normals));
        }
        if !self.joints.is_empty() {
            arrays.push((4, 1, 4, verts.iter().flat_map(|v| v.bones).collect()));
            arrays.push((5, 1, 4, verts.iter().flat_map(|v| v.weights).collect()));
        }
        let ofs_vertexarrays = at(&body);
        let mut data_ofs = ofs_vertexarrays + (arrays.len() * 20) as u32;
        for (kind, format, size, data) in &arrays {
            put_u32(&mut body, *kind);
            put_u32(&mut body, 0);
            put_u32(&mut body, *format);
            put_u32(&mut body, *size);
            put_u32(&mut body, data_ofs);
            data_ofs += data.len() as u32;
        }
        for (_, _, _, data) in &arrays {
            body.extend_from_slice(data);
        }
        while body.len() % 4 != 0 {
            body.push(0);
        }

        let ofs_triangles = at(&body);
        let mut base = 0u32;
        for m in &self.meshes {
            for t in &m.tris {
                for &i in t {
                    put_u32(&mut body, base + i);
                }
            }
            base += m.verts.len() as u32;
        }

        let ofs_joints = at(&body);
        for (j, &n) in self.joints.iter().zip(&joint_names) {
            put_u32(&mut body, n);
            put_i32(&mut body, j.parent);
            for x in j.pos.iter().chain(&j.orient) {
                put_f32(&mut body, *x);
            }
            for _ in 0..3 {
                put_f32(&mut body, 1.0);
            }
        }

        // per joint and channel: (offset, scale) covering every frame of every anim
        let num_joints = self.joints.len();
        let mut ranges = vec![[(f32::MAX, f32::MIN); 6]; num_joints];
        for frame in self.anims.iter().flat_map(|a| &a.frames) {
            for (k, (pos, orient)) in frame.iter().enumerate() {
                for (c, v) in pos.iter().chain(orient).enumerate() {
                    let r = &mut ranges[k][c];
                    r.0 = r.0.min(*v);
                    r.1 = r.1.max(*v);
                }
            }
        }
        let channel = |k: usize, c: usize| {
            let (lo, hi) = ranges[k][c];
            if lo > hi {
                (0.0, 0.0)
            } else {
                (lo, (hi - lo) / 65535.0)
            }
        };

        let has_anims = !self.anims.is_empty();
        let ofs_poses = at(&body);
        if has_anims {
            for (k, j) in self.joints.iter().enumerate() {
                put_i32(&mut body, j.parent);
                put_u32(&mut body, 0x3F);
                for c in 0..6 {
                    put_f32(&mut body, channel(k, c).0);
                }
                for _ in 0..3 {
                    put_f32(&mut body, 1.0);
                }
                for c in 0..6 {
                    put_f32(&mut body, channel(k, c).1);
                }
                for _ in 0..3 {
                    put_f32(&mut body, 0.0);
                }
            }
        }

        let ofs_anims = at(&body);
        let mut first_frame = 0u32;
        for (a, &n) in self.anims.iter().zip(&anim_names) {
            put_u32(&mut body, n);
            put_u32(&mut body, first_frame);
            put_u32(&mut body, a.frames.len() as u32);
            put_f32(&mut body, 10.0);
            put_u32(&mut body, 0);
            first_frame += a.frames.len() as u32;
        }

        let ofs_frames = at(&body);
        for frame in self.anims.iter().flat_map(|a| &a.frames) {
            for (k, (pos, orient)) in frame.iter().enumerate() {
                for (c, v) in pos.iter().chain(orient).enumerate() {
                    let (offset, scale) = channel(k, c);
                    let q = if scale > 0.0 {
                        ((v - offset) / scale).round() as u16
                    } else {
                        0
                    };
                    body.write_u16::<LittleEndian>(q).unwrap();
                }
            }
        }
        while body.len() % 4 != 0 {
            body.push(0);
        }

        let filesize = (HEADER_SIZE + body.len()) as u32;
        let num_poses = if has_anims { num_joints as u32 } else { 0 };
        let mut out = Vec::with_capacity(filesize as usize);
        out.extend_from_slice(b"INTERQUAKEMODEL\0");
        for word in [
            self.version,
            filesize,
            0,
            text.len() as u32,
            ofs_text,
            self.meshes.len() as u32,
            ofs_meshes,
            arrays.len() as u32,
            num_verts,
            ofs_vertexarrays,
            num_tris as u32,
            ofs_triangles,
            0,
            num_joints as u32,
            ofs_joints,
            num_poses,
            ofs_poses,
            self.anims.len() as u32,
            ofs_anims,
            first_frame,
            if has_anims { (num_joints * 6) as u32 } else { 0 },
            ofs_frames,
            0,
            0,
            0,
            0,
            0,
        ] {
            put_u32(&mut out, word);
        }
        out.extend_from_slice(&body);
        out
    }
}

/// sin(45 degrees): the orientation vector part of a 90 degree rotation.
pub(crate) const S45: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Head position of the rig in animation frame 1.
pub(crate) const BENT_HEAD: Vec3 = Vec3::new(0.0, -1.0, 2.0);

/// Head position of the rig in its bind pose.
pub(crate) const BIND_HEAD: Vec3 = Vec3::new(0.0, 0.0, 3.0);

/// Rig joints in IQM form: positions relative to the parent.
pub(crate) fn rig_joints() -> Vec<IqmJoint> {
    vec![
        IqmJoint::new("root", -1, [0.0, 0.0, 0.0]),
        IqmJoint::new("spine", 0, [0.0, 0.0, 2.0]),
        IqmJoint::new("head", 1, [0.0, 0.0, 1.0]),
    ]
}

/// One triangle with a corner on each rig bone.
pub(crate) fn rig_mesh() -> IqmMesh {
    IqmMesh {
        name: "body".to_string(),
        verts: vec![
            IqmVertex::on_bone([1.0, 0.0, 0.0], 0),
            IqmVertex::on_bone([1.0, 0.0, 2.0], 1),
            IqmVertex::on_bone([1.0, 0.0, 3.0], 2),
        ],
        tris: vec![[0, 1, 2]],
    }
}

pub(crate) fn rig_anim(name: &str) -> IqmAnim {
    let bind: IqmFrame = rig_joints().iter().map(|j| (j.pos, j.orient)).collect();
    let mut bent = bind.clone();
    bent[1].1 = [S45, 0.0, 0.0];
    IqmAnim {
        name: name.to_string(),
        frames: vec![bind, bent],
    }
}

/// The rig as one IQM file holding the mesh and a clip named `move`.
pub(crate) fn rig_iqm() -> Vec<u8> {
    IqmWriter {
        joints: rig_joints(),
        meshes: vec![rig_mesh()],
        anims: vec![rig_anim("move")],
        ..IqmWriter::default()
    }
    .build()
}

pub(crate) const RIG_MD5MESH: &str = r#"MD5Version 10
commandline ""

numJoints 3
numMeshes 1

joints {
	"root"	-1 ( 0 0 0 ) ( 0 0 0 )		// absolute
	"spine"	0 ( 0 0 2 ) ( 0 0 0 )
	"head"	1 ( 0 0 3 ) ( 0 0 0 )
}

mesh {
	// meshes: body
	shader "body"

	numverts 3
	vert 0 ( 0 0 ) 0 1
	vert 1 ( 0 0 ) 1 1
	vert 2 ( 0 0 ) 2 1

	numtris 1
	tri 0 0 1 2

	numweights 3
	weight 0 0 1 ( 1 0 0 )
	weight 1 1 1 ( 1 0 0 )
	weight 2 2 1 ( 1 0 0 )
}
"#;

pub(crate) const RIG_MD5ANIM: &str = r#"MD5Version 10
commandline ""

numFrames 2
numJoints 3
frameRate 24
numAnimatedComponents 3

hierarchy {
	"root"	-1 0 0
	"spine"	0 56 0
	"head"	1 0 0
}

bounds {
	( -1 -1 -1 ) ( 1 1 3 )
	( -1 -1 -1 ) ( 1 1 3 )
}

baseframe {
	( 0 0 0 ) ( 0 0 0 )
	( 0 0 2 ) ( 0 0 0 )
	( 0 0 1 ) ( 0 0 0 )
}

frame 0 {
	0 0 0
}

frame 1 {
	0.70710677 0 0
}
"#;

pub(crate) const RIG_SMD: &str = "version 1
nodes
0 \"root\" -1
1 \"spine\" 0
2 \"head\" 1
end
skeleton
time 0
0 0 0 0 0 0 0
1 0 0 2 0 0 0
2 0 0 1 0 0 0
end
triangles
body.bmp
0 1 0 0 0 0 1 0 0
1 1 0 2 0 0 1 0 0
2 1 0 3 0 0 1 0 0
end
";

pub(crate) const RIG_SMD_ANIM: &str = "version 1
nodes
0 \"root\" -1
1 \"spine\" 0
2 \"head\" 1
end
skeleton
time 0
0 0 0 0 0 0 0
1 0 0 2 0 0 0
2 0 0 1 0 0 0
time 1
1 0 0 2 -1.5707964 0 0
end
";

/// The rig built directly in engine space, without going through a loader. Frame 0 is the
/// bind pose and frame 1 bends the spine.
pub(crate) fn rig_skeleton() -> crate::Skeleton {
    use crate::{BoneInfo, DualQuat};
    let mut skel = crate::Skeleton::named("rig");
    for (name, parent, z) in [("root", None, 0.0), ("spine", Some(0), 2.0), ("head", Some(1), 3.0)] {
        let mut bone = BoneInfo::new(name, parent);
        bone.set_base(DualQuat::from_translation(Vec3::new(0.0, 0.0, z)));
        skel.bones.push(bone);
    }
    skel.link_children();
    let pivot = Vec3::new(0.0, 0.0, 2.0);
    let bend = DualQuat::from_translation(pivot)
        * DualQuat::from_rotation(glam::Quat::from_rotation_x(std::f32::consts::FRAC_PI_2))
        * DualQuat::from_translation(-pivot);
    let id = DualQuat::IDENTITY;
    skel.add_anim("bend", vec![id, id, id, id, bend, id]);
    skel
}
