use crate::registry::join_path;
use crate::test_fixtures::{RIG_MD5ANIM, RIG_MD5MESH, RIG_SMD, rig_iqm};
use crate::{
    Adjustments, AssetCache, AssetSource, Error, FrameContext, FsSource, MemorySource,
    ModelFormat, ModelRegistry, RecordingBackend, RenderRequest, SkinningSettings,
};
use std::rc::Rc;

fn registry() -> ModelRegistry {
    ModelRegistry::new(
        MemorySource::new()
            .with("rig/rig.iqm", rig_iqm())
            .with("md5rig/md5rig.md5mesh", RIG_MD5MESH)
            .with("md5rig/md5rig.md5anim", RIG_MD5ANIM)
            .with("smdrig/smdrig.smd", RIG_SMD),
    )
}

#[test]
fn models_load_from_their_default_file() {
    let mut reg = registry();
    for (name, format) in [
        ("rig", ModelFormat::Iqm),
        ("md5rig", ModelFormat::Md5),
        ("smdrig", ModelFormat::Smd),
    ] {
        let model = reg.load_model(name).unwrap_or_else(|| panic!("{name} did not load"));
        assert_eq!(model.format, format);
        assert_eq!(model.parts.len(), 1);
        let group = model.parts[0].group.as_ref().unwrap();
        assert_eq!(group.borrow().meshes.len(), 1);
        assert!(model.bbox.is_some());
    }
}

#[test]
fn md5_models_pick_up_their_default_animation() {
    let mut reg = registry();
    let model = reg.load_model("md5rig").unwrap();
    let skel = model.parts[0].skel().unwrap();
    let skel = skel.borrow();
    assert_eq!(skel.num_frames, 2);
    assert!(skel.find_anim("md5rig/md5rig.md5anim", false).is_some());
}

#[test]
fn loaded_models_are_shared() {
    let mut reg = registry();
    assert!(!reg.is_loaded("rig"));
    assert!(reg.find_model("rig").is_none());
    let a = reg.load_model("rig").unwrap();
    let b = reg.load_model("rig").unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert!(Rc::ptr_eq(&a, &reg.find_model("rig").unwrap()));
}

#[test]
fn failed_loads_are_remembered_until_cleared() {
    let mut reg = registry();
    assert!(reg.load_model("ghost").is_none());
    assert!(reg.is_loaded("ghost"));
    assert!(reg.find_model("ghost").is_none());
    assert!(reg.load_model("ghost").is_none());

    assert!(reg.clear_model("ghost"));
    assert!(!reg.is_loaded("ghost"));
    assert!(!reg.clear_model("ghost"));
}

#[test]
fn empty_names_are_never_loaded() {
    let mut reg = registry();
    assert!(reg.load_model("").is_none());
    assert!(!reg.is_loaded(""));
}

#[test]
fn preloads_wait_for_a_flush() {
    let mut reg = registry();
    reg.preload_model("rig");
    reg.preload_model("rig");
    reg.preload_model("ghost");
    assert!(!reg.is_loaded("rig"));
    reg.flush_preloaded_models();
    assert!(reg.find_model("rig").is_some());
    assert!(reg.is_loaded("ghost"));
}

#[test]
fn cleared_models_hand_their_buffers_back() {
    let mut reg = registry();
    let model = reg.load_model("rig").unwrap();
    let settings = SkinningSettings::default();
    let mut backend = RecordingBackend::new();
    {
        let mut ctx = FrameContext {
            backend: &mut backend,
            settings: &settings,
            millis: 0,
        };
        model.render(&mut ctx, &RenderRequest::default(), None);
    }
    assert_eq!(backend.buffers.len(), 2);

    reg.cleanup_models();
    assert_eq!(reg.assets().release.len(), 2);
    reg.release_buffers(&mut backend);
    assert!(backend.buffers.is_empty());
    assert!(reg.assets().release.is_empty());

    assert!(reg.clear_model("rig"));
    drop(model);
    reg.release_buffers(&mut backend);
    assert_eq!(backend.released.len(), 2);
}

#[test]
fn groups_and_skeletons_are_shared_while_alive() {
    let src = MemorySource::new().with("rig.iqm", rig_iqm());
    let mut assets = AssetCache::new();
    let a = assets
        .share_group(&src, ModelFormat::Iqm, "rig.iqm", Some("player"), 0.0)
        .unwrap();
    let b = assets
        .share_group(&src, ModelFormat::Iqm, "rig.iqm", None, 0.0)
        .unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    let skel = assets.share_skeleton("player");
    assert!(Rc::ptr_eq(&skel, &a.borrow().skel));
    assert_eq!(skel.borrow().num_bones(), 3);

    drop((a, b, skel));
    let fresh = assets.share_skeleton("player");
    assert_eq!(fresh.borrow().num_bones(), 0);
}

#[test]
fn failed_groups_are_not_registered() {
    let mut broken = rig_iqm();
    broken[0] = b'X';
    let src = MemorySource::new().with("rig.iqm", broken);
    let mut assets = AssetCache::new();
    for _ in 0..2 {
        let err = assets
            .share_group(&src, ModelFormat::Iqm, "rig.iqm", Some("player"), 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::IqmParse { .. }), "{err}");
    }
    assert_eq!(assets.share_skeleton("player").borrow().num_bones(), 0);
}

#[test]
fn iqm_clips_can_be_named() {
    let src = MemorySource::new().with("rig.iqm", rig_iqm());
    let mut assets = AssetCache::new();
    let group = assets
        .share_group(&src, ModelFormat::Iqm, "rig.iqm", None, 0.0)
        .unwrap();
    let none = Adjustments::default();

    let named = assets
        .load_anim(&src, ModelFormat::Iqm, &group, "rig.iqm:move", &none)
        .unwrap();
    assert_eq!(named.name, "rig.iqm:move");
    let first = assets
        .load_anim(&src, ModelFormat::Iqm, &group, "rig.iqm", &none)
        .unwrap();
    assert_eq!(first, named);
    assert_eq!(group.borrow().skel.borrow().num_frames, 2);

    let err = assets
        .load_anim(&src, ModelFormat::Iqm, &group, "rig.iqm:wave", &none)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownAnimation { .. }), "{err}");
}

#[test]
fn missing_files_are_reported_by_path() {
    let err = MemorySource::new().read("a/b.iqm").unwrap_err();
    assert!(matches!(&err, Error::AssetMissing { path } if path == "a/b.iqm"), "{err}");

    let fs = FsSource::new(std::env::temp_dir().join("skelmodel-missing-root"));
    let err = fs.read("rig/rig.iqm").unwrap_err();
    assert!(matches!(&err, Error::AssetMissing { path } if path == "rig/rig.iqm"), "{err}");
}

#[test]
fn filesystem_sources_read_below_their_root() {
    let root = std::env::temp_dir().join(format!("skelmodel-fs-{}", std::process::id()));
    std::fs::create_dir_all(root.join("rig")).unwrap();
    std::fs::write(root.join("rig/rig.iqm"), rig_iqm()).unwrap();

    let mut reg = ModelRegistry::new(FsSource::new(&root));
    let model = reg.load_model("rig");
    std::fs::remove_dir_all(&root).unwrap();
    assert_eq!(model.unwrap().format, ModelFormat::Iqm);
}

#[test]
fn paths_join_with_a_single_separator() {
    assert_eq!(join_path("", "a.iqm"), "a.iqm");
    assert_eq!(join_path("rig", "a.iqm"), "rig/a.iqm");
    assert_eq!(join_path("rig/", "a.iqm"), "rig/a.iqm");
}
