#[cfg(feature = "json")]
use serde::Deserialize;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "snake_case"))]
pub enum RenderPath {
    #[default]
    Shader,
    FixedFunction,
}

/// Runtime switches and hardware limits that decide between GPU and CPU skinning.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Deserialize))]
#[cfg_attr(feature = "json", serde(default))]
pub struct SkinningSettings {
    pub gpu_skel: bool,
    pub mat_skel: bool,
    /// Vertex shader uniform budget in float4 registers, as reported by the driver.
    pub max_vs_uniforms: i32,
    pub reserve_vp_params: i32,
    /// Length of the cross-fade between two animations, in milliseconds.
    pub anim_interpolation_time: i32,
    pub render_path: RenderPath,
}

impl Default for SkinningSettings {
    fn default() -> Self {
        Self {
            gpu_skel: true,
            mat_skel: false,
            max_vs_uniforms: 0,
            reserve_vp_params: 16,
            anim_interpolation_time: 150,
            render_path: RenderPath::Shader,
        }
    }
}

impl SkinningSettings {
    /// Uniform registers usable for bones on the current render path.
    pub fn max_gpu_params(&self) -> i32 {
        match self.render_path {
            RenderPath::Shader => self.max_vs_uniforms,
            RenderPath::FixedFunction => 0,
        }
    }

    /// Reads settings from a JSON object. Missing fields keep their defaults.
    #[cfg(feature = "json")]
    pub fn from_json_str(s: &str) -> Result<Self, crate::Error> {
        let err = |message: String| crate::Error::ConfigParse {
            file: "<settings>".to_string(),
            message,
        };
        let value: serde_json::Value = serde_json::from_str(s).map_err(|e| err(e.to_string()))?;
        if !value.is_object() {
            return Err(err("settings must be a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| err(e.to_string()))
    }
}
