pub mod animation;
pub mod bone;
pub mod ik;
pub mod skin;
pub mod slot;
pub mod transform;

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::shared_types::default_fps;

/// Root of a Spine json export. One file describes exactly one skeleton.
#[derive(Clone, Deserialize, Debug)]
pub struct RawSkeletonData {
    #[serde(default)]
    pub skeleton: RawSkeletonHeader,

    #[serde(default)]
    pub bones: Vec<bone::RawBone>,

    #[serde(default)]
    pub slots: Vec<slot::RawSlot>,

    #[serde(default)]
    pub ik: Vec<ik::RawIkConstraint>,

    #[serde(default)]
    pub skins: Vec<skin::RawSkin>,

    // A BTreeMap so that picking "the first animation" as a fallback is
    // deterministic across runs.
    #[serde(default)]
    pub animations: BTreeMap<String, animation::RawAnimationData>,
}

#[derive(Clone, Deserialize, Default, Debug)]
pub struct RawSkeletonHeader {
    #[serde(default)]
    pub hash: String,

    #[serde(rename = "spine")]
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,

    #[serde(default = "default_fps")]
    pub fps: f32,

    #[serde(default)]
    pub images: String,
}
