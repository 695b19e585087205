use serde::Deserialize;

use crate::shared_types::{default_one, default_true};

#[derive(Clone, Deserialize, Debug)]
pub struct RawIkConstraint {
    pub name: String,

    #[serde(default)]
    pub order: u32,

    /// Constrained chain, parent first. Spine emits one or two bones.
    #[serde(default)]
    pub bones: Vec<String>,

    pub target: String,

    #[serde(default = "default_one")]
    pub mix: f32,

    #[serde(rename = "bendPositive")]
    #[serde(default = "default_true")]
    pub bend_positive: bool,
}
