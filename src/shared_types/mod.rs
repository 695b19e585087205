use serde::{Deserialize, Deserializer};

#[derive(Copy, Clone, Deserialize, Default, Debug)]
pub struct Rect {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
}

#[derive(Copy, Clone, Deserialize, Default, Debug)]
pub struct Point {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

/// RGBA color, each channel in `0.0..=1.0`. Spine serializes colors as hex
/// strings (`"rrggbbaa"` or `"rrggbb"`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color { r: 1.0, g: 1.0, b: 1.0, a: 1.0 };

    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim();
        if digits.len() != 6 && digits.len() != 8 {
            return None;
        }
        let channel = |at: usize| -> Option<f32> {
            u8::from_str_radix(digits.get(at..at + 2)?, 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if digits.len() == 8 { channel(6)? } else { 1.0 },
        })
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Color::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("malformed color string `{}`", hex)))
    }
}

#[derive(Copy, Clone, Deserialize, Debug, PartialEq)]
pub enum BlendMode {
    #[serde(rename = "normal")]
    Normal,
    #[serde(rename = "additive")]
    Additive,
    #[serde(rename = "multiply")]
    Multiply,
    #[serde(rename = "screen")]
    Screen,
}
impl Default for BlendMode {
    fn default() -> Self {
        Self::Normal
    }
}

pub(crate) fn default_true() -> bool { true }
pub(crate) fn default_one() -> f32 { 1.0 }
pub(crate) fn default_fps() -> f32 { 30.0 }
pub(crate) fn default_skin_name() -> String { "default".into() }

#[cfg(test)]
mod tests {
    use super::Color;

    #[test]
    fn color_parses_eight_digit_hex() {
        let color = Color::from_hex("ff7f0080").unwrap();
        assert!((color.r - 1.0).abs() < 1e-6);
        assert!((color.g - 127.0 / 255.0).abs() < 1e-6);
        assert!((color.b - 0.0).abs() < 1e-6);
        assert!((color.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn color_parses_six_digit_hex_as_opaque() {
        let color = Color::from_hex("336699").unwrap();
        assert!((color.a - 1.0).abs() < 1e-6);
        assert!((color.b - 153.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn color_rejects_garbage() {
        assert!(Color::from_hex("xyzw").is_none());
        assert!(Color::from_hex("fffff").is_none());
    }
}
