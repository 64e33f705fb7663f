use crate::test_fixtures::{S45, assert_approx, assert_vec3_approx, rig_iqm};
use crate::{
    ANIM_END, ANIM_LOOP, ANIM_NOPITCH, ANIM_NORENDER, ANIM_RAGDOLL, ANIM_SECONDARY, ANIM_START,
    AssetCache, EntityState, Error, FrameContext, LoadContext, MemorySource, ModelFormat,
    ModelRender, PartAnimSpec, RecordingBackend, RenderRequest, SkelModel, SkinningSettings,
};
use glam::Vec3;

const IDLE: u32 = 3;
const FORWARD: u32 = 4;
const JUMP: u32 = 9;

fn source() -> MemorySource {
    MemorySource::new().with("rig/rig.iqm", rig_iqm())
}

/// The rig loaded as one part with a `tag_head` tag, then whatever `build` adds.
fn rig_model(build: impl FnOnce(&mut LoadContext<'_>)) -> SkelModel {
    let src = source();
    let mut assets = AssetCache::new();
    let mut ctx = LoadContext::new(&src, &mut assets);
    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    ctx.load_part("rig.iqm", None, 0.0).unwrap();
    ctx.tag("head", "tag_head").unwrap();
    build(&mut ctx);
    ctx.finish().unwrap()
}

fn draw(
    model: &SkelModel,
    req: &RenderRequest,
    entity: Option<&mut EntityState>,
    millis: i32,
) -> (ModelRender, RecordingBackend) {
    let settings = SkinningSettings::default();
    let mut backend = RecordingBackend::new();
    let out = {
        let mut ctx = FrameContext {
            backend: &mut backend,
            settings: &settings,
            millis,
        };
        model.render(&mut ctx, req, entity)
    };
    (out, backend)
}

fn head(model: &SkelModel, anim: u32, millis: i32) -> Vec3 {
    let req = RenderRequest {
        anim,
        ..RenderRequest::default()
    };
    let (out, _) = draw(model, &req, None, millis);
    out.tag("tag_head").unwrap().transform.translation.into()
}

// Rig tag positions at the load-time scale of a quarter.
const BIND: Vec3 = Vec3::new(0.0, 0.0, 0.75);
const BENT: Vec3 = Vec3::new(0.0, -0.25, 0.5);

fn halfway() -> Vec3 {
    Vec3::new(0.0, -S45, 2.0 + S45) * 0.25
}

#[test]
fn clip_speed_sets_the_frame_duration() {
    let model = rig_model(|ctx| ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap());
    let anim = IDLE | ANIM_LOOP;
    assert_vec3_approx(head(&model, anim, 0), BIND);
    assert_vec3_approx(head(&model, anim, 100), BENT);
    assert_vec3_approx(head(&model, anim, 150), halfway());
    assert_vec3_approx(head(&model, anim, 200), BIND);
}

#[test]
fn clamped_loops_hold_the_first_or_last_frame() {
    let model = rig_model(|ctx| ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap());
    for millis in [0, 100, 1234] {
        assert_vec3_approx(head(&model, IDLE | ANIM_START, millis), BIND);
        assert_vec3_approx(head(&model, IDLE | ANIM_END, millis), BENT);
    }
}

#[test]
fn unbound_animations_show_the_clip_start() {
    let model = rig_model(|ctx| ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap());
    assert_vec3_approx(head(&model, JUMP | ANIM_LOOP, 100), BIND);
}

#[test]
fn secondary_animation_wins_on_priority() {
    let build = |priority: i32| {
        rig_model(move |ctx| {
            ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap();
            ctx.anim("forward", "rig.iqm", 5.0, priority).unwrap();
        })
    };
    let anim = IDLE | ANIM_LOOP | ((FORWARD | ANIM_LOOP) << ANIM_SECONDARY);

    // forward runs at 200ms a frame
    assert_vec3_approx(head(&build(1), anim, 100), halfway());
    assert_vec3_approx(head(&build(-1), anim, 100), BENT);
}

#[test]
fn frames_past_the_store_skip_the_part() {
    let mut model = rig_model(|_| {});
    model.parts[0].set_anim(
        0,
        JUMP,
        PartAnimSpec {
            frame: 5,
            range: 2,
            speed: 0.0,
            priority: 0,
        },
    );
    let req = RenderRequest {
        anim: JUMP,
        ..RenderRequest::default()
    };
    let (out, backend) = draw(&model, &req, None, 0);
    assert!(out.parts.is_empty());
    assert!(out.tags.is_empty());
    assert!(backend.draws.is_empty());
}

#[test]
fn unanimated_models_still_report_tags() {
    let model = rig_model(|_| {});
    let req = RenderRequest::default();
    let (out, backend) = draw(&model, &req, None, 0);
    assert_eq!(out.parts.len(), 1);
    assert_eq!(out.parts[0].1.pose_slot, None);
    assert_eq!(backend.draws.len(), 1);
    assert_vec3_approx(out.tag("tag_head").unwrap().transform.translation.into(), BIND);
}

#[test]
fn norender_still_returns_tags() {
    let model = rig_model(|ctx| ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap());
    let req = RenderRequest {
        anim: IDLE | ANIM_END | ANIM_NORENDER,
        ..RenderRequest::default()
    };
    let (out, backend) = draw(&model, &req, None, 0);
    assert!(backend.draws.is_empty());
    assert_vec3_approx(out.tag("tag_head").unwrap().transform.translation.into(), BENT);
}

#[test]
fn linked_parts_hang_from_the_parent_tag() {
    let model = rig_model(|ctx| {
        ctx.load_part("rig.iqm", None, 0.0).unwrap();
        ctx.link(0, 1, "tag_head", Vec3::ZERO).unwrap();
    });
    let (out, backend) = draw(&model, &RenderRequest::default(), None, 0);
    assert_eq!(backend.draws.len(), 2);
    let parts: Vec<usize> = out.parts.iter().map(|(p, _)| *p).collect();
    assert_eq!(parts, [0, 1]);
    let child = out.tags.iter().find(|t| t.part == 1).unwrap();
    assert_vec3_approx(child.transform.translation.into(), Vec3::new(0.0, 0.0, 1.5));

    let model = rig_model(|ctx| {
        ctx.load_part("rig.iqm", None, 0.0).unwrap();
        ctx.link(0, 1, "tag_head", Vec3::new(4.0, 0.0, 0.0)).unwrap();
    });
    let (out, _) = draw(&model, &RenderRequest::default(), None, 0);
    let child = out.tags.iter().find(|t| t.part == 1).unwrap();
    assert_vec3_approx(child.transform.translation.into(), Vec3::new(1.0, 0.0, 1.5));
}

#[test]
fn links_need_a_known_tag_and_part() {
    let src = source();
    let mut assets = AssetCache::new();
    let mut ctx = LoadContext::new(&src, &mut assets);
    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    ctx.load_part("rig.iqm", None, 0.0).unwrap();
    ctx.tag("head", "tag_head").unwrap();
    let err = ctx.link(0, 1, "tag_head", Vec3::ZERO).unwrap_err();
    assert!(matches!(err, Error::UnknownTag { .. }), "{err}");
    ctx.load_part("rig.iqm", None, 0.0).unwrap();
    let err = ctx.link(0, 1, "tag_hand", Vec3::ZERO).unwrap_err();
    assert!(matches!(err, Error::UnknownTag { .. }), "{err}");
}

#[test]
fn part_pitch_tilts_the_whole_part() {
    let model = rig_model(|ctx| ctx.pitch("", 1.0, 0.0, 0.0, 0.0).unwrap());
    let req = RenderRequest {
        pitch: 90.0,
        ..RenderRequest::default()
    };
    let (out, _) = draw(&model, &req, None, 0);
    assert_vec3_approx(
        out.tag("tag_head").unwrap().transform.translation.into(),
        Vec3::new(-0.75, 0.0, 0.0),
    );

    let req = RenderRequest {
        anim: ANIM_NOPITCH,
        ..req
    };
    let (out, _) = draw(&model, &req, None, 0);
    assert_vec3_approx(out.tag("tag_head").unwrap().transform.translation.into(), BIND);
}

#[test]
fn spin_turns_the_model_over_time() {
    let model = rig_model(|ctx| ctx.spin(90.0, 90.0).unwrap());
    assert_vec3_approx(head(&model, 0, 0), BIND);
    assert_vec3_approx(head(&model, 0, 1000), Vec3::new(0.0, -0.75, 0.0));
}

#[test]
fn bounds_cover_the_scaled_bind_pose() {
    let model = rig_model(|_| {});
    let (lo, hi) = model.bbox.unwrap();
    assert_vec3_approx(lo, Vec3::new(0.25, 0.0, 0.0));
    assert_vec3_approx(hi, Vec3::new(0.25, 0.0, 0.75));

    let model = rig_model(|ctx| ctx.translate(Vec3::new(0.0, 0.0, 4.0)).unwrap());
    assert_eq!(model.parts[0].translate, Vec3::new(0.0, 0.0, 4.0));
    let (lo, hi) = model.bbox.unwrap();
    assert_vec3_approx(lo, Vec3::new(0.25, 0.0, 1.0));
    assert_vec3_approx(hi, Vec3::new(0.25, 0.0, 1.75));
    assert_vec3_approx(head(&model, 0, 0), Vec3::new(0.0, 0.0, 1.75));
}

#[test]
fn switching_animations_blends_over_the_interpolation_time() {
    let model = rig_model(|ctx| ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap());
    let mut entity = EntityState::default();
    let start = RenderRequest {
        anim: IDLE | ANIM_START,
        ..RenderRequest::default()
    };
    let end = RenderRequest {
        anim: IDLE | ANIM_END,
        ..RenderRequest::default()
    };
    let tag = |out: &ModelRender| -> Vec3 { out.tag("tag_head").unwrap().transform.translation.into() };

    let (out, _) = draw(&model, &start, Some(&mut entity), 0);
    assert_vec3_approx(tag(&out), BIND);
    assert_eq!(entity.last_rendered, 0);

    let (out, _) = draw(&model, &end, Some(&mut entity), 100);
    assert_vec3_approx(tag(&out), BIND);
    let (out, _) = draw(&model, &end, Some(&mut entity), 175);
    assert_vec3_approx(tag(&out), halfway());
    let (out, _) = draw(&model, &end, Some(&mut entity), 300);
    assert_vec3_approx(tag(&out), BENT);
    assert_eq!(entity.last_rendered, 300);
}

#[test]
fn ragdoll_is_seeded_on_request_and_dropped_without_it() {
    let model = rig_model(|ctx| {
        ctx.anim("idle", "rig.iqm", 10.0, 0).unwrap();
        ctx.rd_vert(Vec3::new(-1.0, 0.0, 0.0), 0.0).unwrap();
        ctx.rd_vert(Vec3::new(1.0, 0.0, 0.0), 0.0).unwrap();
        ctx.rd_vert(Vec3::new(0.0, 1.0, 0.0), 0.0).unwrap();
        ctx.rd_tri([0, 1, 2]).unwrap();
        ctx.rd_joint(0, 0, [0, 1, 2]).unwrap();
        ctx.rd_joint(7, 0, [0, 1, 2]).unwrap();
    });
    let skel = model.parts[0].skel().unwrap();
    assert!(skel.borrow().ragdoll.as_ref().unwrap().loaded);
    assert_eq!(skel.borrow().ragdoll.as_ref().unwrap().joints.len(), 1);

    let mut entity = EntityState::default();
    let req = RenderRequest {
        anim: ANIM_RAGDOLL,
        ..RenderRequest::default()
    };
    draw(&model, &req, Some(&mut entity), 0);
    assert!(entity.ragdoll.is_some());

    draw(&model, &RenderRequest::default(), Some(&mut entity), 10);
    assert!(entity.ragdoll.is_none());
}

#[test]
fn one_load_at_a_time() {
    let src = source();
    let mut assets = AssetCache::new();
    let mut ctx = LoadContext::new(&src, &mut assets);
    let err = ctx.tag("head", "tag_head").unwrap_err();
    assert!(matches!(err, Error::NotLoading { .. }), "{err}");
    assert!(matches!(ctx.finish(), Err(Error::NotLoading { .. })));

    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    let err = ctx.begin("other", ModelFormat::Iqm).unwrap_err();
    assert!(
        matches!(&err, Error::NestedLoad { requested, loading } if requested == "other" && loading == "rig"),
        "{err}"
    );
    ctx.abort();
    assert!(!ctx.is_loading());
}

#[test]
fn models_need_loaded_parts() {
    let src = source();
    let mut assets = AssetCache::new();
    let mut ctx = LoadContext::new(&src, &mut assets);
    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    assert!(matches!(ctx.finish(), Err(Error::ModelNotFound { .. })));

    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    ctx.load_part("missing.iqm", None, 0.0).unwrap();
    assert!(matches!(ctx.finish(), Err(Error::ModelNotFound { .. })));
}

#[test]
fn part_commands_report_unknown_names() {
    let src = source();
    let mut assets = AssetCache::new();
    let mut ctx = LoadContext::new(&src, &mut assets);
    ctx.begin("rig", ModelFormat::Iqm).unwrap();
    let err = ctx.tag("head", "tag_head").unwrap_err();
    assert!(matches!(err, Error::NotLoading { .. }), "{err}");

    ctx.load_part("rig.iqm", None, 0.0).unwrap();
    let err = ctx.tag("neck", "tag_neck").unwrap_err();
    assert!(matches!(err, Error::UnknownBone { .. }), "{err}");
    let err = ctx.anim("no such anim", "rig.iqm", 0.0, 0).unwrap_err();
    assert!(matches!(err, Error::UnknownAnimation { .. }), "{err}");
    let err = ctx.anim("idle", "rig.iqm:nod", 0.0, 0).unwrap_err();
    assert!(matches!(err, Error::UnknownAnimation { .. }), "{err}");
    ctx.anim("idle", "rig.iqm:move", 0.0, 0).unwrap();
}

#[test]
fn scale_is_a_percentage_applied_at_a_quarter() {
    let scaled = |percent| rig_model(|ctx| ctx.scale(percent).unwrap()).scale;
    assert_approx(scaled(100), 0.25);
    assert_approx(scaled(50), 0.125);
    assert_approx(scaled(0), 0.075);
    assert_approx(scaled(-5), 0.0);
}

#[test]
fn anim_parts_split_the_skeleton_by_bone_mask() {
    let model = rig_model(|ctx| {
        ctx.anim_part(&["!head".to_string(), "spine".to_string()]).unwrap();
        ctx.anim_part(&["head".to_string()]).unwrap();
        let err = ctx.anim_part(&["root".to_string()]).unwrap_err();
        assert!(matches!(err, Error::TooManyAnimParts { part: 0 }), "{err}");
    });
    let part = &model.parts[0];
    assert_eq!(part.num_anim_parts, 3);
    assert_eq!(part.part_mask.as_ref().unwrap().bones, [0, 1, 2]);
}
