use serde::Deserialize;

use crate::shared_types::default_one;

#[derive(Clone, Deserialize, Debug)]
pub struct RawBone {
    pub name: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub length: f32,

    #[serde(default)]
    pub x: f32,

    #[serde(default)]
    pub y: f32,

    /// Degrees, counter-clockwise.
    #[serde(default)]
    pub rotation: f32,

    #[serde(rename = "scaleX")]
    #[serde(default = "default_one")]
    pub scale_x: f32,

    #[serde(rename = "scaleY")]
    #[serde(default = "default_one")]
    pub scale_y: f32,

    #[serde(rename = "shearX")]
    #[serde(default)]
    pub shear_x: f32,

    #[serde(rename = "shearY")]
    #[serde(default)]
    pub shear_y: f32,

    #[serde(default)]
    pub transform: TransformMode,
}

/// How a bone combines with its ancestors' world transforms.
#[derive(Copy, Clone, Deserialize, Debug, PartialEq)]
pub enum TransformMode {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "onlyTranslation")]
    OnlyTranslation,
    #[serde(rename = "noRotationOrReflection")]
    NoRotationOrReflection,
    #[serde(rename = "noScale")]
    NoScale,
    #[serde(rename = "noScaleOrReflection")]
    NoScaleOrReflection,
}

impl Default for TransformMode {
    fn default() -> Self {
        Self::Normal
    }
}

impl TransformMode {
    pub fn inherits_rotation(self) -> bool {
        !matches!(self, Self::OnlyTranslation | Self::NoRotationOrReflection)
    }

    pub fn inherits_scale(self) -> bool {
        matches!(self, Self::Normal | Self::NoRotationOrReflection)
    }
}
