use skelmodel::SkinMode;

/// Bone registers available to one draw.
pub const MAX_BONE_REGISTERS: usize = 256;

/// Vertex shader variant: unskinned, or skinned in `mode` reading `weights` weights per vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ShaderKey {
    pub skin: Option<(SkinMode, usize)>,
}

impl ShaderKey {
    pub fn label(&self) -> String {
        match self.skin {
            None => "skelmodel-wgpu shader unskinned".to_string(),
            Some((SkinMode::DualQuat, w)) => format!("skelmodel-wgpu shader dq{w}"),
            Some((SkinMode::Matrix, w)) => format!("skelmodel-wgpu shader mat{w}"),
        }
    }

    /// WGSL for this variant. Every variant carries all vertex entry points; pipelines pick the
    /// one matching their vertex layout.
    pub fn source(&self) -> String {
        let (weights, skin) = match self.skin {
            None => (0, SKIN_NONE),
            Some((SkinMode::DualQuat, w)) => (w.clamp(1, 4), SKIN_DUAL_QUAT),
            Some((SkinMode::Matrix, w)) => (w.clamp(1, 4), SKIN_MATRIX),
        };
        format!(
            "const WEIGHTS: u32 = {weights}u;\nconst BONE_REGISTERS: u32 = {MAX_BONE_REGISTERS}u;\n{COMMON}{skin}{ENTRY_POINTS}"
        )
    }
}

const COMMON: &str = r#"
struct Globals {
  clip_from_world: mat4x4<f32>,
  light_dir: vec4<f32>,
};

struct Draw {
  world_from_model: mat4x4<f32>,
  // x: fullbright
  flags: vec4<f32>,
  bones: array<vec4<f32>, BONE_REGISTERS>,
};

@group(0) @binding(0)
var<uniform> globals: Globals;

@group(1) @binding(0)
var<uniform> per_draw: Draw;

struct Skinned {
  pos: vec3<f32>,
  norm: vec3<f32>,
  tangent: vec3<f32>,
};

struct VsOut {
  @builtin(position) position: vec4<f32>,
  @location(0) uv: vec2<f32>,
  @location(1) norm: vec3<f32>,
  @location(2) tangent: vec4<f32>,
};

fn finish(s: Skinned, uv: vec2<f32>, bitangent: f32) -> VsOut {
  var out: VsOut;
  let world = per_draw.world_from_model * vec4<f32>(s.pos, 1.0);
  out.position = globals.clip_from_world * world;
  out.uv = uv;
  out.norm = (per_draw.world_from_model * vec4<f32>(s.norm, 0.0)).xyz;
  out.tangent = vec4<f32>((per_draw.world_from_model * vec4<f32>(s.tangent, 0.0)).xyz, bitangent);
  return out;
}
"#;

const SKIN_NONE: &str = r#"
fn skin(pos: vec3<f32>, norm: vec3<f32>, tangent: vec3<f32>, weights: vec4<f32>, bones: vec4<u32>) -> Skinned {
  return Skinned(pos, norm, tangent);
}
"#;

const SKIN_DUAL_QUAT: &str = r#"
fn rotate(real: vec4<f32>, v: vec3<f32>) -> vec3<f32> {
  return v + 2.0 * cross(real.xyz, cross(real.xyz, v) + real.w * v);
}

fn skin(pos: vec3<f32>, norm: vec3<f32>, tangent: vec3<f32>, weights: vec4<f32>, bones: vec4<u32>) -> Skinned {
  var real = vec4<f32>(0.0);
  var dual = vec4<f32>(0.0);
  for (var i = 0u; i < WEIGHTS; i++) {
    let b = min(bones[i], BONE_REGISTERS - 2u);
    real += per_draw.bones[b] * weights[i];
    dual += per_draw.bones[b + 1u] * weights[i];
  }
  let len = length(real);
  real /= len;
  dual /= len;
  let translate = 2.0 * (real.w * dual.xyz - dual.w * real.xyz + cross(real.xyz, dual.xyz));
  return Skinned(rotate(real, pos) + translate, rotate(real, norm), rotate(real, tangent));
}
"#;

const SKIN_MATRIX: &str = r#"
fn skin(pos: vec3<f32>, norm: vec3<f32>, tangent: vec3<f32>, weights: vec4<f32>, bones: vec4<u32>) -> Skinned {
  var r0 = vec4<f32>(0.0);
  var r1 = vec4<f32>(0.0);
  var r2 = vec4<f32>(0.0);
  for (var i = 0u; i < WEIGHTS; i++) {
    let b = min(bones[i], BONE_REGISTERS - 3u);
    r0 += per_draw.bones[b] * weights[i];
    r1 += per_draw.bones[b + 1u] * weights[i];
    r2 += per_draw.bones[b + 2u] * weights[i];
  }
  let p = vec4<f32>(pos, 1.0);
  let p_out = vec3<f32>(dot(r0, p), dot(r1, p), dot(r2, p));
  let n_out = vec3<f32>(dot(r0.xyz, norm), dot(r1.xyz, norm), dot(r2.xyz, norm));
  let t_out = vec3<f32>(dot(r0.xyz, tangent), dot(r1.xyz, tangent), dot(r2.xyz, tangent));
  return Skinned(p_out, n_out, t_out);
}
"#;

const ENTRY_POINTS: &str = r#"
@vertex
fn vs_static(@location(0) pos: vec3<f32>, @location(1) uv: vec2<f32>) -> VsOut {
  return finish(Skinned(pos, vec3<f32>(0.0, 0.0, 1.0), vec3<f32>(1.0, 0.0, 0.0)), uv, 1.0);
}

@vertex
fn vs_normal(@location(0) pos: vec3<f32>, @location(1) norm: vec3<f32>, @location(2) uv: vec2<f32>) -> VsOut {
  return finish(Skinned(pos, norm, vec3<f32>(1.0, 0.0, 0.0)), uv, 1.0);
}

@vertex
fn vs_bump(
  @location(0) pos: vec3<f32>,
  @location(1) norm: vec3<f32>,
  @location(2) uv: vec2<f32>,
  @location(3) tangent: vec4<f32>,
) -> VsOut {
  return finish(Skinned(pos, norm, tangent.xyz), uv, tangent.w);
}

@vertex
fn vs_weighted(
  @location(0) pos: vec3<f32>,
  @location(1) norm: vec3<f32>,
  @location(2) uv: vec2<f32>,
  @location(4) weights: vec4<f32>,
  @location(5) bones: vec4<u32>,
) -> VsOut {
  let s = skin(pos, norm, vec3<f32>(1.0, 0.0, 0.0), weights, bones);
  return finish(s, uv, 1.0);
}

@vertex
fn vs_weighted_bump(
  @location(0) pos: vec3<f32>,
  @location(1) norm: vec3<f32>,
  @location(2) uv: vec2<f32>,
  @location(3) tangent: vec4<f32>,
  @location(4) weights: vec4<f32>,
  @location(5) bones: vec4<u32>,
) -> VsOut {
  let s = skin(pos, norm, tangent.xyz, weights, bones);
  return finish(s, uv, tangent.w);
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
  if (per_draw.flags.x > 0.5) {
    return vec4<f32>(1.0);
  }
  let n = normalize(in.norm);
  let light = max(dot(n, -normalize(globals.light_dir.xyz)), 0.0);
  let shade = 0.35 + 0.65 * light;
  return vec4<f32>(vec3<f32>(shade), 1.0);
}
"#;
