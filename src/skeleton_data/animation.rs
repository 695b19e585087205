use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

use crate::shared_types::{default_one, Color};

/// One animation of the export. Frame times are absolute seconds.
#[derive(Clone, Deserialize, Debug)]
pub struct RawAnimationData {
    /// bone name -> timelines.
    #[serde(default)]
    pub bones: HashMap<String, RawBoneTimeline>,

    /// slot name -> timelines.
    #[serde(default)]
    pub slots: HashMap<String, RawSlotTimeline>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawBoneTimeline {
    #[serde(default)]
    pub rotate: Vec<RawRotateFrame>,

    #[serde(default)]
    pub translate: Vec<RawTranslateFrame>,

    #[serde(default)]
    pub scale: Vec<RawScaleFrame>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawRotateFrame {
    #[serde(default)]
    pub time: f32,

    /// Degrees, relative to the setup-pose rotation.
    #[serde(default)]
    pub angle: f32,

    #[serde(default)]
    pub curve: RawCurve,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawTranslateFrame {
    #[serde(default)]
    pub time: f32,

    /// Offsets relative to the setup-pose position.
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,

    #[serde(default)]
    pub curve: RawCurve,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawScaleFrame {
    #[serde(default)]
    pub time: f32,

    /// Multipliers on the setup-pose scale.
    #[serde(default = "default_one")]
    pub x: f32,
    #[serde(default = "default_one")]
    pub y: f32,

    #[serde(default)]
    pub curve: RawCurve,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawSlotTimeline {
    #[serde(default)]
    pub attachment: Vec<RawAttachmentFrame>,

    #[serde(default)]
    pub color: Vec<RawColorFrame>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawAttachmentFrame {
    #[serde(default)]
    pub time: f32,

    /// `None` hides the slot.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawColorFrame {
    #[serde(default)]
    pub time: f32,

    #[serde(default)]
    pub color: Color,

    #[serde(default)]
    pub curve: RawCurve,
}

/// Easing of the span between a frame and the next one.
#[derive(Clone, Debug, PartialEq)]
pub enum RawCurve {
    Linear,
    Stepped,
    /// `cx1, cy1, cx2, cy2` of a cubic Bezier through (0,0) and (1,1).
    Bezier([f32; 4]),
}

impl Default for RawCurve {
    fn default() -> Self {
        Self::Linear
    }
}

impl<'de> Deserialize<'de> for RawCurve {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        match value {
            Value::String(tag) if tag == "stepped" => Ok(Self::Stepped),
            Value::String(tag) if tag == "linear" => Ok(Self::Linear),
            Value::Array(values) => {
                let mut handles = [0.0f32; 4];
                if values.len() < 4 {
                    return Err(serde::de::Error::custom(
                        "curve array needs at least four control values",
                    ));
                }
                for (slot, value) in handles.iter_mut().zip(values.iter()) {
                    *slot = value
                        .as_f64()
                        .ok_or_else(|| serde::de::Error::custom("curve values must be numbers"))?
                        as f32;
                }
                Ok(Self::Bezier(handles))
            }
            other => Err(serde::de::Error::custom(format!("malformed curve `{}`", other))),
        }
    }
}
