use crate::test_fixtures::{RIG_SMD, RIG_SMD_ANIM, assert_approx, assert_vec3_approx};
use crate::{Adjustments, Error, SkelLoader, Skeleton, SmdLoader};
use glam::Vec3;

fn loaded_rig() -> Skeleton {
    let mut skel = Skeleton::new();
    let import = SmdLoader.load_mesh("rig.smd", RIG_SMD.as_bytes(), &skel).unwrap();
    skel.bones = import.bones.unwrap();
    skel.link_children();
    skel
}

fn load(text: &str) -> Result<crate::MeshImport, Error> {
    SmdLoader.load_mesh("test.smd", text.as_bytes(), &Skeleton::new())
}

#[test]
fn reference_mesh_builds_bones_and_reversed_triangles() {
    let import = load(RIG_SMD).unwrap();
    let bones = import.bones.unwrap();
    let names: Vec<&str> = bones.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["root", "spine", "head"]);
    assert_vec3_approx(bones[2].base.translation(), Vec3::new(0.0, 0.0, 3.0));

    let mesh = &import.meshes[0];
    assert_eq!(mesh.name, "body");
    assert_vec3_approx(mesh.verts[0].pos, Vec3::new(1.0, 0.0, 0.0));
    assert_eq!(mesh.tris[0].vert, [2, 1, 0]);
    assert_approx(mesh.verts[0].v, 1.0);
}

#[test]
fn repeated_vertices_are_shared_within_a_material() {
    let extra = "body.bmp
0 1 0 0 0 0 1 0 0
1 1 0 2 0 0 1 0 0
2 1 0 3 0 0 1 0 0
end
";
    let text = RIG_SMD.replacen("2 1 0 3 0 0 1 0 0\nend\n", &format!("2 1 0 3 0 0 1 0 0\n{extra}"), 1);
    let mesh = &load(&text).unwrap().meshes[0];
    assert_eq!(mesh.verts.len(), 3);
    assert_eq!(mesh.tris.len(), 2);
}

#[test]
fn links_share_the_remaining_weight_with_the_parent() {
    let text = RIG_SMD.replace(
        "0 1 0 0 0 0 1 0 0\n",
        "0 1 0 0 0 0 1 0 0 2 1 0.25 2 0.25\n",
    );
    let mesh = &load(&text).unwrap().meshes[0];
    let combo = &mesh.blends[0];
    assert_eq!(combo.bones[..3], [0, 1, 2]);
    assert_approx(combo.weights[0], 0.5);
    assert_approx(combo.weights[1], 0.25);
    assert_approx(combo.weights[2], 0.25);
}

#[test]
fn other_versions_are_rejected() {
    let err = load(&RIG_SMD.replace("version 1", "version 2")).unwrap_err();
    assert!(matches!(err, Error::SmdVersion { version: 2, .. }), "{err}");
}

#[test]
fn malformed_vertex_lines_are_parse_errors() {
    let err = load(&RIG_SMD.replace("1 1 0 2 0 0 1 0 0", "1 1 0")).unwrap_err();
    assert!(matches!(err, Error::SmdParse { .. }), "{err}");

    let err = load(&RIG_SMD.replace("1 1 0 2 0 0 1 0 0", "9 1 0 2 0 0 1 0 0")).unwrap_err();
    assert!(matches!(err, Error::SmdParse { .. }), "{err}");
}

#[test]
fn animation_bones_missing_from_a_frame_repeat_frame_zero() {
    let skel = loaded_rig();
    let import = SmdLoader
        .load_anim("rig_anim.smd", RIG_SMD_ANIM.as_bytes(), &skel, &Adjustments::default())
        .unwrap();
    assert_eq!(import.clips[0].0, "rig_anim.smd");
    let frames = &import.clips[0].1;
    assert_eq!(frames.len(), 2 * 3);
    let head = Vec3::new(0.0, 0.0, 3.0);
    assert_vec3_approx(frames[3 + 1].transform_point3(head), Vec3::new(0.0, -1.0, 2.0));
    assert_eq!(frames[3 + 2], frames[2]);
    assert_eq!(frames[3], frames[0]);
}

#[test]
fn missing_frames_repeat_frame_zero() {
    let skel = loaded_rig();
    let text = RIG_SMD_ANIM.replace("time 1", "time 2");
    let import = SmdLoader
        .load_anim("gap.smd", text.as_bytes(), &skel, &Adjustments::default())
        .unwrap();
    let frames = &import.clips[0].1;
    assert_eq!(frames.len(), 3 * 3);
    assert_eq!(frames[3..6], frames[0..3]);
}

#[test]
fn animation_node_count_must_match() {
    let skel = loaded_rig();
    let text = RIG_SMD_ANIM.replace("2 \"head\" 1\n", "");
    let err = SmdLoader
        .load_anim("short.smd", text.as_bytes(), &skel, &Adjustments::default())
        .unwrap_err();
    assert!(
        matches!(err, Error::BoneCountMismatch { expected: 3, found: 2, .. }),
        "{err}"
    );
}

#[test]
fn animations_need_a_skeleton() {
    let err = SmdLoader
        .load_anim("rig_anim.smd", RIG_SMD_ANIM.as_bytes(), &Skeleton::new(), &Adjustments::default())
        .unwrap_err();
    assert!(matches!(err, Error::SmdParse { .. }), "{err}");
}

#[test]
fn times_beyond_the_file_are_parse_errors() {
    let skel = loaded_rig();
    for time in ["time 4000000000", "time 9223372036854775807"] {
        let text = RIG_SMD_ANIM.replace("time 1", time);
        let err = SmdLoader
            .load_anim("far.smd", text.as_bytes(), &skel, &Adjustments::default())
            .unwrap_err();
        assert!(matches!(err, Error::SmdParse { .. }), "{time}: {err}");
    }
}
