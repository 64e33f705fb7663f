//! Model configuration: the ordered commands that build a model, and the load context they run
//! against.
//!
//! A configuration is a JSON document (`json` feature) such as
//!
//! ```json
//! { "commands": [
//!     { "cmd": "load", "file": "body.md5mesh", "skel": "player" },
//!     { "cmd": "tag", "bone": "Head", "name": "tag_head" },
//!     { "cmd": "anim", "anim": "idle", "file": "idle.md5anim", "speed": 30 }
//! ] }
//! ```
//!
//! Commands can also be built directly and applied through [`LoadContext::apply`].

use crate::registry::{AssetCache, AssetSource, join_path};
use crate::{
    Adjustments, BoneAdjustment, BoneMaskEntry, Error, ModelFormat, PartAnimSpec, PitchParams,
    SkelModel, SkelPart,
};
use glam::{Quat, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

#[cfg(feature = "json")]
use serde::Deserialize;

/// One configuration command.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Deserialize))]
#[cfg_attr(feature = "json", serde(tag = "cmd", rename_all = "lowercase"))]
pub enum ModelCommand {
    /// Directory later file names are relative to.
    Dir { name: String },
    /// Adds a part whose meshes come from `file`. `skel` shares the skeleton with every other
    /// mesh naming it; `smooth` is the MD5 normal smoothing angle in degrees.
    Load {
        file: String,
        #[cfg_attr(feature = "json", serde(default))]
        skel: Option<String>,
        #[cfg_attr(feature = "json", serde(default))]
        smooth: f32,
    },
    Tag { bone: String, name: String },
    /// Pitch correction for a bone, or for the whole part when `bone` is empty.
    Pitch {
        #[cfg_attr(feature = "json", serde(default))]
        bone: String,
        scale: f32,
        #[cfg_attr(feature = "json", serde(default))]
        offset: f32,
        #[cfg_attr(feature = "json", serde(default))]
        min: f32,
        #[cfg_attr(feature = "json", serde(default))]
        max: f32,
    },
    /// Correction for a bone's frames in animations loaded afterwards by the current part.
    Adjust {
        bone: String,
        #[cfg_attr(feature = "json", serde(default))]
        yaw: f32,
        #[cfg_attr(feature = "json", serde(default))]
        pitch: f32,
        #[cfg_attr(feature = "json", serde(default))]
        roll: f32,
        #[cfg_attr(feature = "json", serde(default))]
        translate: [f32; 3],
    },
    /// Binds the clip in `file` to every animation name matching `anim`.
    Anim {
        anim: String,
        file: String,
        #[cfg_attr(feature = "json", serde(default))]
        speed: f32,
        #[cfg_attr(feature = "json", serde(default))]
        priority: i32,
    },
    /// Starts a new animation part; `!name` excludes a bone's subtree.
    AnimPart { bones: Vec<String> },
    Link {
        parent: usize,
        child: usize,
        tag: String,
        #[cfg_attr(feature = "json", serde(default))]
        translate: [f32; 3],
    },
    /// Skin settings for a mesh name, or `*` for every mesh of the current part.
    Skin {
        mesh: String,
        #[cfg_attr(feature = "json", serde(default))]
        normal_map: bool,
    },
    NoClip { mesh: String, noclip: bool },
    /// Model scale in percent.
    Scale { percent: i32 },
    Translate { offset: [f32; 3] },
    /// Spin speed in degrees per second.
    Spin {
        yaw: f32,
        #[cfg_attr(feature = "json", serde(default))]
        pitch: f32,
    },
    RdVert {
        pos: [f32; 3],
        #[cfg_attr(feature = "json", serde(default))]
        radius: f32,
    },
    RdTri { verts: [usize; 3] },
    RdJoint {
        bone: i32,
        tri: usize,
        verts: [i32; 3],
    },
    RdLimitDist {
        verts: [usize; 2],
        min: f32,
        max: f32,
    },
    /// `max_angle` in degrees; `middle` is an `x y z w` quaternion.
    RdLimitRot {
        tris: [usize; 2],
        max_angle: f32,
        middle: [f32; 4],
    },
    RdAnimJoints { on: bool },
}

impl ModelCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ModelCommand::Dir { .. } => "dir",
            ModelCommand::Load { .. } => "load",
            ModelCommand::Tag { .. } => "tag",
            ModelCommand::Pitch { .. } => "pitch",
            ModelCommand::Adjust { .. } => "adjust",
            ModelCommand::Anim { .. } => "anim",
            ModelCommand::AnimPart { .. } => "animpart",
            ModelCommand::Link { .. } => "link",
            ModelCommand::Skin { .. } => "skin",
            ModelCommand::NoClip { .. } => "noclip",
            ModelCommand::Scale { .. } => "scale",
            ModelCommand::Translate { .. } => "translate",
            ModelCommand::Spin { .. } => "spin",
            ModelCommand::RdVert { .. } => "rdvert",
            ModelCommand::RdTri { .. } => "rdtri",
            ModelCommand::RdJoint { .. } => "rdjoint",
            ModelCommand::RdLimitDist { .. } => "rdlimitdist",
            ModelCommand::RdLimitRot { .. } => "rdlimitrot",
            ModelCommand::RdAnimJoints { .. } => "rdanimjoints",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Deserialize))]
pub struct ModelConfig {
    pub commands: Vec<ModelCommand>,
}

impl ModelConfig {
    #[cfg(feature = "json")]
    pub fn from_json_str(file: &str, s: &str) -> Result<Self, Error> {
        serde_json::from_str(s).map_err(|e| Error::ConfigParse {
            file: file.to_string(),
            message: e.to_string(),
        })
    }

    #[cfg(feature = "json")]
    pub fn from_json_slice(file: &str, data: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(data).map_err(|e| Error::ConfigParse {
            file: file.to_string(),
            message: e.to_string(),
        })
    }
}

#[derive(Debug)]
struct Loading {
    model: SkelModel,
    dir: String,
    adjustments: Adjustments,
}

fn loading<'l>(loading: &'l mut Option<Loading>, command: &str) -> Result<&'l mut Loading, Error> {
    loading.as_mut().ok_or_else(|| Error::NotLoading {
        command: command.to_string(),
    })
}

/// The part commands apply to: the most recently loaded one.
fn current_part<'l>(loading: &'l mut Loading, command: &str) -> Result<&'l mut SkelPart, Error> {
    loading
        .model
        .parts
        .last_mut()
        .ok_or_else(|| Error::NotLoading {
            command: command.to_string(),
        })
}

fn unknown_bone(bone: &str, context: &str) -> Error {
    Error::UnknownBone {
        bone: bone.to_string(),
        context: context.to_string(),
    }
}

/// Builder for one model load. Only one load can be in progress at a time.
pub struct LoadContext<'a> {
    source: &'a dyn AssetSource,
    assets: &'a mut AssetCache,
    loading: Option<Loading>,
}

impl<'a> LoadContext<'a> {
    pub fn new(source: &'a dyn AssetSource, assets: &'a mut AssetCache) -> Self {
        Self {
            source,
            assets,
            loading: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.is_some()
    }

    /// The model being built.
    pub fn model(&self) -> Option<&SkelModel> {
        self.loading.as_ref().map(|l| &l.model)
    }

    pub fn begin(&mut self, name: &str, format: ModelFormat) -> Result<(), Error> {
        if let Some(l) = &self.loading {
            return Err(Error::NestedLoad {
                requested: name.to_string(),
                loading: l.model.name.clone(),
            });
        }
        self.loading = Some(Loading {
            model: SkelModel::new(name, format),
            dir: name.to_string(),
            adjustments: Adjustments::default(),
        });
        Ok(())
    }

    /// Ends the load. Fails when no part was defined or a part has no meshes.
    pub fn finish(&mut self) -> Result<SkelModel, Error> {
        let Loading { mut model, .. } = self.loading.take().ok_or_else(|| Error::NotLoading {
            command: "finish".to_string(),
        })?;
        if model.parts.is_empty() || model.parts.iter().any(|p| p.group.is_none()) {
            return Err(Error::ModelNotFound { name: model.name });
        }
        model.end_load();
        Ok(model)
    }

    /// Drops the model being built.
    pub fn abort(&mut self) {
        self.loading = None;
    }

    /// Replays every command in order. Commands that fail (a missing bone, tag or clip, or a
    /// part command before any `load`) are logged and skipped.
    pub fn run(&mut self, config: &ModelConfig) -> Result<(), Error> {
        if !self.is_loading() {
            return Err(Error::NotLoading {
                command: "run".to_string(),
            });
        }
        for cmd in &config.commands {
            if let Err(e) = self.apply(cmd) {
                log::warn!("{}: {e}", cmd.name());
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, cmd: &ModelCommand) -> Result<(), Error> {
        match cmd {
            ModelCommand::Dir { name } => self.set_dir(name),
            ModelCommand::Load { file, skel, smooth } => {
                self.load_part(file, skel.as_deref(), *smooth)
            }
            ModelCommand::Tag { bone, name } => self.tag(bone, name),
            ModelCommand::Pitch {
                bone,
                scale,
                offset,
                min,
                max,
            } => self.pitch(bone, *scale, *offset, *min, *max),
            ModelCommand::Adjust {
                bone,
                yaw,
                pitch,
                roll,
                translate,
            } => self.adjust(bone, *yaw, *pitch, *roll, Vec3::from(*translate)),
            ModelCommand::Anim {
                anim,
                file,
                speed,
                priority,
            } => self.anim(anim, file, *speed, *priority),
            ModelCommand::AnimPart { bones } => self.anim_part(bones),
            ModelCommand::Link {
                parent,
                child,
                tag,
                translate,
            } => self.link(*parent, *child, tag, Vec3::from(*translate)),
            ModelCommand::Skin { mesh, normal_map } => self.skin(mesh, *normal_map),
            ModelCommand::NoClip { mesh, noclip } => self.noclip(mesh, *noclip),
            ModelCommand::Scale { percent } => self.scale(*percent),
            ModelCommand::Translate { offset } => self.translate(Vec3::from(*offset)),
            ModelCommand::Spin { yaw, pitch } => self.spin(*yaw, *pitch),
            ModelCommand::RdVert { pos, radius } => self.rd_vert(Vec3::from(*pos), *radius),
            ModelCommand::RdTri { verts } => self.rd_tri(*verts),
            ModelCommand::RdJoint { bone, tri, verts } => self.rd_joint(*bone, *tri, *verts),
            ModelCommand::RdLimitDist { verts, min, max } => {
                self.rd_limit_dist(*verts, *min, *max)
            }
            ModelCommand::RdLimitRot {
                tris,
                max_angle,
                middle,
            } => self.rd_limit_rot(*tris, *max_angle, Quat::from_array(*middle).normalize()),
            ModelCommand::RdAnimJoints { on } => self.rd_anim_joints(*on),
        }
    }

    pub fn set_dir(&mut self, name: &str) -> Result<(), Error> {
        loading(&mut self.loading, "dir")?.dir = name.to_string();
        Ok(())
    }

    /// Adds a part. A mesh file that fails to load is logged and leaves the part without
    /// meshes, which fails the model when the load finishes.
    pub fn load_part(
        &mut self,
        file: &str,
        skel: Option<&str>,
        smooth: f32,
    ) -> Result<(), Error> {
        let l = loading(&mut self.loading, "load")?;
        let path = join_path(&l.dir, file);
        l.adjustments.clear();
        let mut part = SkelPart::new(l.model.parts.len());
        match self
            .assets
            .share_group(self.source, l.model.format, &path, skel, smooth)
        {
            Ok(group) => part.set_group(group),
            Err(e) => log::warn!("could not load {path}: {e}"),
        }
        l.model.parts.push(part);
        Ok(())
    }

    /// Single part loaded from `<name>/<basename>.<ext>`, plus `<basename>.md5anim` for MD5.
    pub fn load_default_parts(&mut self) -> Result<(), Error> {
        let l = loading(&mut self.loading, "load")?;
        let name = l.model.name.clone();
        let base = name.rsplit(['/', '\\']).next().unwrap_or(&name);
        let format = l.model.format;
        let path = join_path(&name, &format!("{base}.{}", format.mesh_extension()));
        l.adjustments.clear();
        let group = self.assets.share_group(self.source, format, &path, None, 0.0)?;
        if format == ModelFormat::Md5 {
            let anim = join_path(&name, &format!("{base}.md5anim"));
            if let Err(e) =
                self.assets
                    .load_anim(self.source, format, &group, &anim, &l.adjustments)
            {
                log::debug!("{anim}: {e}");
            }
        }
        let mut part = SkelPart::new(l.model.parts.len());
        part.set_group(group);
        l.model.parts.push(part);
        Ok(())
    }

    pub fn tag(&mut self, bone: &str, name: &str) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, "tag")?, "tag")?;
        let Some(skel) = part.skel() else {
            return Ok(());
        };
        let mut skel = skel.borrow_mut();
        let index = skel
            .find_bone(bone)
            .ok_or_else(|| unknown_bone(bone, &format!("tag {name}")))?;
        skel.add_tag(name, index);
        Ok(())
    }

    pub fn pitch(
        &mut self,
        bone: &str,
        scale: f32,
        offset: f32,
        min: f32,
        max: f32,
    ) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, "pitch")?, "pitch")?;
        if bone.is_empty() {
            part.pitch = PitchParams::new(scale, offset, min, max);
            return Ok(());
        }
        let Some(skel) = part.skel() else {
            return Ok(());
        };
        let mut skel = skel.borrow_mut();
        let index = skel
            .find_bone(bone)
            .ok_or_else(|| unknown_bone(bone, "pitch"))?;
        skel.bones[index].pitch = if min != 0.0 || max != 0.0 {
            PitchParams {
                scale,
                offset,
                min,
                max,
            }
        } else {
            PitchParams {
                scale,
                offset,
                min: -360.0 * scale.abs() + offset,
                max: 360.0 * scale.abs() + offset,
            }
        };
        Ok(())
    }

    /// `translate` is in asset units and stored at a quarter, matching the load-time scale.
    pub fn adjust(
        &mut self,
        bone: &str,
        yaw: f32,
        pitch: f32,
        roll: f32,
        translate: Vec3,
    ) -> Result<(), Error> {
        let l = loading(&mut self.loading, "adjust")?;
        let Some(skel) = current_part(l, "adjust")?.skel() else {
            return Ok(());
        };
        let index = skel
            .borrow()
            .find_bone(bone)
            .ok_or_else(|| unknown_bone(bone, "adjust"))?;
        l.adjustments.set(
            index,
            BoneAdjustment {
                yaw,
                pitch,
                roll,
                translate: translate / 4.0,
            },
        );
        Ok(())
    }

    pub fn anim(&mut self, anim: &str, file: &str, speed: f32, priority: i32) -> Result<(), Error> {
        let l = loading(&mut self.loading, "anim")?;
        let anims = self.assets.anim_names.find(anim);
        if anims.is_empty() {
            return Err(Error::UnknownAnimation {
                name: anim.to_string(),
            });
        }
        let path = join_path(&l.dir, file);
        let format = l.model.format;
        let adjustments = l.adjustments.clone();
        let part = current_part(l, "anim")?;
        let Some(group) = part.group.clone() else {
            return Ok(());
        };
        let spec = self
            .assets
            .load_anim(self.source, format, &group, &path, &adjustments)?;
        let anim_part = part.num_anim_parts - 1;
        for a in anims {
            part.set_anim(
                anim_part,
                a,
                PartAnimSpec {
                    frame: spec.frame,
                    range: spec.range,
                    speed,
                    priority,
                },
            );
        }
        Ok(())
    }

    pub fn anim_part(&mut self, bones: &[String]) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, "animpart")?, "animpart")?;
        let Some(skel) = part.skel() else {
            return Ok(());
        };
        let mut mask = Vec::with_capacity(bones.len());
        {
            let skel = skel.borrow();
            for b in bones {
                let (exclude, name) = match b.strip_prefix('!') {
                    Some(name) => (true, name),
                    None => (false, b.as_str()),
                };
                let bone = skel
                    .find_bone(name)
                    .ok_or_else(|| unknown_bone(b, &format!("anim part [{}]", bones.join(" "))))?;
                mask.push(BoneMaskEntry { exclude, bone });
            }
        }
        mask.sort_by_key(|e| e.bone);
        part.add_anim_part(&mask)
    }

    pub fn link(
        &mut self,
        parent: usize,
        child: usize,
        tag: &str,
        translate: Vec3,
    ) -> Result<(), Error> {
        loading(&mut self.loading, "link")?
            .model
            .link(parent, child, tag, translate)
    }

    /// Sets skin flags on the current part's meshes named `mesh`, or all of them for `*`.
    /// Normal-mapped meshes get tangents.
    pub fn skin(&mut self, mesh: &str, normal_map: bool) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, "skin")?, "skin")?;
        let Some(group) = part.group.clone() else {
            return Ok(());
        };
        let mut group = group.borrow_mut();
        for (m, skin) in group.meshes.iter_mut().zip(part.skins.iter_mut()) {
            if mesh == "*" || m.name == mesh {
                skin.normal_map = normal_map;
                if normal_map {
                    m.calc_tangents(true);
                }
            }
        }
        Ok(())
    }

    pub fn noclip(&mut self, mesh: &str, noclip: bool) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, "noclip")?, "noclip")?;
        let Some(group) = &part.group else {
            return Ok(());
        };
        for m in &mut group.borrow_mut().meshes {
            if mesh == "*" || m.name == mesh {
                m.noclip = noclip;
            }
        }
        Ok(())
    }

    /// Positive percentages scale the model, negative ones collapse it and zero picks 30%.
    pub fn scale(&mut self, percent: i32) -> Result<(), Error> {
        loading(&mut self.loading, "scale")?.model.scale = match percent {
            p if p > 0 => p as f32 / 100.0,
            p if p < 0 => 0.0,
            _ => 0.3,
        };
        Ok(())
    }

    pub fn translate(&mut self, offset: Vec3) -> Result<(), Error> {
        loading(&mut self.loading, "translate")?.model.translate = offset;
        Ok(())
    }

    pub fn spin(&mut self, yaw: f32, pitch: f32) -> Result<(), Error> {
        let model = &mut loading(&mut self.loading, "spin")?.model;
        model.spin_yaw = yaw;
        model.spin_pitch = pitch;
        Ok(())
    }

    /// Runs `f` on the ragdoll of the last part's skeleton, creating it on first use. Does
    /// nothing once the ragdoll has been set up.
    fn with_ragdoll(
        &mut self,
        command: &str,
        f: impl FnOnce(&mut crate::RagdollSkel, usize),
    ) -> Result<(), Error> {
        let part = current_part(loading(&mut self.loading, command)?, command)?;
        let Some(skel) = part.skel() else {
            return Ok(());
        };
        ragdoll_of(&skel, f);
        Ok(())
    }

    pub fn rd_vert(&mut self, pos: Vec3, radius: f32) -> Result<(), Error> {
        self.with_ragdoll("rdvert", |r, _| r.add_vert(pos, radius))
    }

    pub fn rd_tri(&mut self, verts: [usize; 3]) -> Result<(), Error> {
        self.with_ragdoll("rdtri", |r, _| r.add_tri(verts[0], verts[1], verts[2]))
    }

    /// Joints on bones the skeleton does not have are ignored.
    pub fn rd_joint(&mut self, bone: i32, tri: usize, verts: [i32; 3]) -> Result<(), Error> {
        self.with_ragdoll("rdjoint", |r, num_bones| {
            if let Some(bone) = usize::try_from(bone).ok().filter(|&b| b < num_bones) {
                r.add_joint(bone, tri, verts);
            }
        })
    }

    pub fn rd_limit_dist(&mut self, verts: [usize; 2], min: f32, max: f32) -> Result<(), Error> {
        self.with_ragdoll("rdlimitdist", |r, _| {
            r.add_dist_limit(verts[0], verts[1], min, max)
        })
    }

    pub fn rd_limit_rot(
        &mut self,
        tris: [usize; 2],
        max_angle: f32,
        middle: Quat,
    ) -> Result<(), Error> {
        self.with_ragdoll("rdlimitrot", |r, _| {
            r.add_rot_limit(tris[0], tris[1], max_angle, middle)
        })
    }

    pub fn rd_anim_joints(&mut self, on: bool) -> Result<(), Error> {
        self.with_ragdoll("rdanimjoints", |r, _| r.anim_joints = on)
    }
}

fn ragdoll_of(skel: &Rc<RefCell<crate::Skeleton>>, f: impl FnOnce(&mut crate::RagdollSkel, usize)) {
    let mut skel = skel.borrow_mut();
    let num_bones = skel.num_bones();
    let ragdoll = skel.ragdoll.get_or_insert_with(crate::RagdollSkel::new);
    if !ragdoll.loaded {
        f(ragdoll, num_bones);
    }
}
