use serde::Deserialize;

use crate::shared_types::{BlendMode, Color};

#[derive(Clone, Deserialize, Debug)]
pub struct RawSlot {
    pub name: String,

    /// Name of the bone this slot is attached to.
    pub bone: String,

    #[serde(default)]
    pub color: Color,

    /// Two-color-tint dark channel. Parsed for completeness, the renderer
    /// applies the regular tint only.
    #[serde(default)]
    pub dark: Option<Color>,

    /// Attachment visible in the setup pose, if any.
    #[serde(default)]
    pub attachment: Option<String>,

    #[serde(default)]
    pub blend: BlendMode,
}
