use crate::test_fixtures::{assert_approx, rig_iqm};
use crate::{
    Error, MemorySource, ModelCommand, ModelConfig, ModelFormat, ModelRegistry, RenderPath,
    SkinningSettings,
};

const RIG_CONFIG: &str = r#"{ "commands": [
    { "cmd": "load", "file": "rig.iqm", "skel": "rig" },
    { "cmd": "tag", "bone": "head", "name": "tag_head" },
    { "cmd": "animpart", "bones": ["!head", "spine"] },
    { "cmd": "anim", "anim": "idle", "file": "rig.iqm", "speed": 10 },
    { "cmd": "pitch", "bone": "spine", "scale": 0.5 },
    { "cmd": "scale", "percent": 50 }
] }"#;

fn registry(config: &str) -> ModelRegistry {
    ModelRegistry::new(
        MemorySource::new()
            .with("rig/rig.iqm", rig_iqm())
            .with("rig/iqm.json", config),
    )
}

#[test]
fn commands_parse_with_defaults() {
    let config = ModelConfig::from_json_str("rig.json", RIG_CONFIG).unwrap();
    assert_eq!(config.commands.len(), 6);
    assert_eq!(
        config.commands[0],
        ModelCommand::Load {
            file: "rig.iqm".to_string(),
            skel: Some("rig".to_string()),
            smooth: 0.0,
        }
    );
    assert_eq!(
        config.commands[3],
        ModelCommand::Anim {
            anim: "idle".to_string(),
            file: "rig.iqm".to_string(),
            speed: 10.0,
            priority: 0,
        }
    );
    let names: Vec<&str> = config.commands.iter().map(ModelCommand::name).collect();
    assert_eq!(names, ["load", "tag", "animpart", "anim", "pitch", "scale"]);
}

#[test]
fn malformed_configs_are_parse_errors() {
    for text in [
        "{ \"commands\": [",
        r#"{ "commands": [{ "cmd": "explode" }] }"#,
        r#"{ "commands": [{ "cmd": "tag", "bone": "head" }] }"#,
    ] {
        let err = ModelConfig::from_json_str("bad.json", text).unwrap_err();
        assert!(matches!(&err, Error::ConfigParse { file, .. } if file == "bad.json"), "{err}");
    }
}

#[test]
fn registry_replays_the_format_config() {
    let mut reg = registry(RIG_CONFIG);
    let model = reg.load_model("rig").unwrap();
    assert_eq!(model.format, ModelFormat::Iqm);
    assert_approx(model.scale, 0.125);
    assert!(model.find_tag("tag_head").is_some());

    let part = &model.parts[0];
    assert_eq!(part.num_anim_parts, 2);
    assert_eq!(part.part_mask.as_ref().unwrap().bones, [0, 1, 0]);
    assert!(part.anims[0].get(3).is_none_or(Vec::is_empty));
    assert_eq!(part.anims[1][3].len(), 1);
    assert_eq!(part.anims[1][3][0].range, 2);

    let skel = part.skel().unwrap();
    let skel = skel.borrow();
    let spine = skel.find_bone("spine").unwrap();
    assert_approx(skel.bones[spine].pitch.scale, 0.5);
    assert_approx(skel.bones[spine].pitch.max, 180.0);
}

#[test]
fn failing_commands_are_skipped() {
    let config = r#"{ "commands": [
        { "cmd": "tag", "bone": "head", "name": "too_early" },
        { "cmd": "load", "file": "rig.iqm" },
        { "cmd": "tag", "bone": "neck", "name": "tag_neck" },
        { "cmd": "anim", "anim": "no such anim", "file": "rig.iqm" },
        { "cmd": "tag", "bone": "head", "name": "tag_head" }
    ] }"#;
    let mut reg = registry(config);
    let model = reg.load_model("rig").unwrap();
    assert!(model.find_tag("tag_head").is_some());
    assert!(model.find_tag("tag_neck").is_none());
    assert!(model.find_tag("too_early").is_none());
}

#[test]
fn configs_without_parts_fall_back_to_the_default_mesh() {
    let mut reg = registry(r#"{ "commands": [{ "cmd": "scale", "percent": 50 }] }"#);
    let model = reg.load_model("rig").unwrap();
    assert_eq!(model.parts.len(), 1);
    assert_approx(model.scale, 0.125);
}

#[test]
fn broken_configs_fail_the_format() {
    let mut reg = registry("not json");
    assert!(reg.load_model("rig").is_none());
}

#[test]
fn settings_read_from_json() {
    let settings = SkinningSettings::from_json_str(
        r#"{ "mat_skel": true, "max_vs_uniforms": 256, "render_path": "fixed_function" }"#,
    )
    .unwrap();
    assert!(settings.mat_skel);
    assert!(settings.gpu_skel);
    assert_eq!(settings.max_vs_uniforms, 256);
    assert_eq!(settings.anim_interpolation_time, 150);
    assert_eq!(settings.render_path, RenderPath::FixedFunction);
    assert_eq!(settings.max_gpu_params(), 0);

    for text in ["[]", "[true, false, 256]", "7", "{ \"gpu_skel\": 1 }"] {
        let err = SkinningSettings::from_json_str(text).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }), "{text}: {err}");
    }
    assert_eq!(
        SkinningSettings::from_json_str("{}").unwrap(),
        SkinningSettings::default()
    );
}
