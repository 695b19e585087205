use serde::{Deserialize, Deserializer};
use serde_json::{from_value, Value};
use std::collections::HashMap;

use crate::shared_types::{default_one, default_skin_name, Color};

#[derive(Clone, Deserialize, Debug)]
pub struct RawSkin {
    #[serde(default = "default_skin_name")]
    pub name: String,

    /// slot name -> attachment name -> attachment.
    #[serde(default)]
    pub attachments: HashMap<String, HashMap<String, RawAttachment>>,
}

#[derive(Clone, Debug)]
pub enum RawAttachment {
    Region {
        path: Option<String>,
        x: f32,
        y: f32,
        rotation: f32,
        scale_x: f32,
        scale_y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
    Mesh {
        path: Option<String>,
        uvs: Vec<f32>,
        triangles: Vec<u32>,
        /// Either plain `x, y` pairs (then `vertices.len() == uvs.len()`) or
        /// the weighted stream `n, (bone, x, y, weight) * n` per vertex.
        vertices: Vec<f32>,
        hull: u32,
        width: f32,
        height: f32,
        color: Color,
    },
    BoundingBox {
        vertex_count: u32,
        vertices: Vec<f32>,
    },
    Clipping {
        end: Option<String>,
        vertex_count: u32,
        vertices: Vec<f32>,
    },
    Point {
        x: f32,
        y: f32,
        rotation: f32,
    },
}

#[derive(Deserialize)]
struct RegionDeserialized {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    rotation: f32,
    #[serde(rename = "scaleX")]
    #[serde(default = "default_one")]
    scale_x: f32,
    #[serde(rename = "scaleY")]
    #[serde(default = "default_one")]
    scale_y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    color: Color,
}

#[derive(Deserialize)]
struct MeshDeserialized {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    uvs: Vec<f32>,
    #[serde(default)]
    triangles: Vec<u32>,
    #[serde(default)]
    vertices: Vec<f32>,
    #[serde(default)]
    hull: u32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    color: Color,
}

#[derive(Deserialize)]
struct BoundingBoxDeserialized {
    #[serde(rename = "vertexCount")]
    #[serde(default)]
    vertex_count: u32,
    #[serde(default)]
    vertices: Vec<f32>,
}

#[derive(Deserialize)]
struct ClippingDeserialized {
    #[serde(default)]
    end: Option<String>,
    #[serde(rename = "vertexCount")]
    #[serde(default)]
    vertex_count: u32,
    #[serde(default)]
    vertices: Vec<f32>,
}

#[derive(Deserialize)]
struct PointDeserialized {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    rotation: f32,
}

impl<'de> Deserialize<'de> for RawAttachment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Value = Deserialize::deserialize(deserializer)?;
        let kind = match &value {
            Value::Object(fields) => match fields.get("type") {
                // Region attachments usually omit their tag.
                None => "region".to_string(),
                Some(Value::String(tag)) => tag.clone(),
                Some(_) => {
                    return Err(serde::de::Error::custom("attachment `type` must be a string"))
                }
            },
            _ => return Err(serde::de::Error::custom("attachment must be a json object")),
        };

        match kind.as_str() {
            "region" => {
                let region: RegionDeserialized =
                    from_value(value).map_err(serde::de::Error::custom)?;
                Ok(RawAttachment::Region {
                    path: region.path,
                    x: region.x,
                    y: region.y,
                    rotation: region.rotation,
                    scale_x: region.scale_x,
                    scale_y: region.scale_y,
                    width: region.width,
                    height: region.height,
                    color: region.color,
                })
            }
            "mesh" => {
                let mesh: MeshDeserialized = from_value(value).map_err(serde::de::Error::custom)?;
                Ok(RawAttachment::Mesh {
                    path: mesh.path,
                    uvs: mesh.uvs,
                    triangles: mesh.triangles,
                    vertices: mesh.vertices,
                    hull: mesh.hull,
                    width: mesh.width,
                    height: mesh.height,
                    color: mesh.color,
                })
            }
            "boundingBox" => {
                let bbox: BoundingBoxDeserialized =
                    from_value(value).map_err(serde::de::Error::custom)?;
                Ok(RawAttachment::BoundingBox {
                    vertex_count: bbox.vertex_count,
                    vertices: bbox.vertices,
                })
            }
            "clipping" => {
                let clip: ClippingDeserialized =
                    from_value(value).map_err(serde::de::Error::custom)?;
                Ok(RawAttachment::Clipping {
                    end: clip.end,
                    vertex_count: clip.vertex_count,
                    vertices: clip.vertices,
                })
            }
            "point" => {
                let point: PointDeserialized =
                    from_value(value).map_err(serde::de::Error::custom)?;
                Ok(RawAttachment::Point { x: point.x, y: point.y, rotation: point.rotation })
            }
            other => Err(serde::de::Error::custom(format!(
                "unsupported attachment type `{}`",
                other
            ))),
        }
    }
}

/// Mesh data flattened for skinning: setup-pose world positions and a dense
/// vertex-major weight matrix.
#[derive(Clone, Debug)]
pub struct PurifiedMeshData {
    pub vertex_count: usize,
    /// `x, y` pairs in setup-pose world space.
    pub vertices: Vec<f32>,
    pub uvs: Vec<f32>,
    pub triangles: Vec<u16>,
    /// `vertex_count * bone_count` entries.
    pub weights: Vec<f32>,
}

impl PurifiedMeshData {
    /// Returns `None` for anything that is not a mesh.
    ///
    /// `rest_pose` must hold the setup-pose world matrix of every bone;
    /// weighted vertices are stored local to each influencing bone and all
    /// influences of one vertex unproject to the same setup position, so the
    /// accumulated result is that shared position.
    pub fn try_from(
        attachment: &RawAttachment,
        slot_bone_id: usize,
        rest_pose: &[nalgebra::Matrix3<f32>],
    ) -> Option<Self> {
        let (uvs, triangles, vertices) = match attachment {
            RawAttachment::Mesh { uvs, triangles, vertices, .. } => (uvs, triangles, vertices),
            _ => return None,
        };
        let bone_count = rest_pose.len();
        let vertex_count = uvs.len() / 2;
        let triangles = triangles.iter().map(|&index| index as u16).collect::<Vec<u16>>();
        let mut world = Vec::with_capacity(vertex_count * 2);
        let mut weights = vec![0.0; vertex_count * bone_count];

        if vertices.len() == uvs.len() {
            for pair in vertices.chunks_exact(2) {
                let pt = rest_pose[slot_bone_id] * nalgebra::Point3::new(pair[0], pair[1], 1.0);
                world.push(pt.x);
                world.push(pt.y);
            }
            for vertex_id in 0..vertex_count {
                weights[vertex_id * bone_count + slot_bone_id] = 1.0;
            }
        } else {
            let mut offset = 0;
            let mut vertex_id = 0;
            while offset < vertices.len() && vertex_id < vertex_count {
                let influences = vertices[offset] as usize;
                offset += 1;
                let mut acc = (0.0f32, 0.0f32);
                for _ in 0..influences {
                    let bone_id = vertices[offset] as usize;
                    let (x, y, weight) =
                        (vertices[offset + 1], vertices[offset + 2], vertices[offset + 3]);
                    offset += 4;
                    let pt = rest_pose[bone_id] * nalgebra::Point3::new(x, y, 1.0);
                    acc.0 += weight * pt.x;
                    acc.1 += weight * pt.y;
                    weights[vertex_id * bone_count + bone_id] += weight;
                }
                world.push(acc.0);
                world.push(acc.1);
                vertex_id += 1;
            }
        }

        Some(Self { vertex_count, vertices: world, uvs: uvs.clone(), triangles, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_rest(count: usize) -> Vec<nalgebra::Matrix3<f32>> {
        vec![nalgebra::Matrix3::identity(); count]
    }

    #[test]
    fn plain_mesh_pins_all_weight_on_the_slot_bone() {
        let mesh = RawAttachment::Mesh {
            path: None,
            uvs: vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0],
            triangles: vec![0, 1, 2],
            vertices: vec![-1.0, 0.0, 1.0, 0.0, 1.0, 2.0],
            hull: 3,
            width: 2.0,
            height: 2.0,
            color: Color::WHITE,
        };
        let purified = PurifiedMeshData::try_from(&mesh, 1, &identity_rest(3)).unwrap();
        assert_eq!(purified.vertex_count, 3);
        assert_eq!(purified.weights.len(), 9);
        for vertex_id in 0..3 {
            assert_eq!(purified.weights[vertex_id * 3 + 1], 1.0);
            assert_eq!(purified.weights[vertex_id * 3 + 0], 0.0);
            assert_eq!(purified.weights[vertex_id * 3 + 2], 0.0);
        }
        assert_eq!(&purified.vertices, &[-1.0, 0.0, 1.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn weighted_mesh_accumulates_influences() {
        // One vertex influenced by two bones, both at identity rest pose and
        // storing the same setup position (2, 4) locally.
        let mesh = RawAttachment::Mesh {
            path: None,
            uvs: vec![0.5, 0.5],
            triangles: vec![],
            vertices: vec![2.0, 0.0, 2.0, 4.0, 0.25, 1.0, 2.0, 4.0, 0.75],
            hull: 0,
            width: 4.0,
            height: 4.0,
            color: Color::WHITE,
        };
        let purified = PurifiedMeshData::try_from(&mesh, 0, &identity_rest(2)).unwrap();
        assert_eq!(purified.vertex_count, 1);
        assert!((purified.vertices[0] - 2.0).abs() < 1e-5);
        assert!((purified.vertices[1] - 4.0).abs() < 1e-5);
        assert!((purified.weights[0] - 0.25).abs() < 1e-5);
        assert!((purified.weights[1] - 0.75).abs() < 1e-5);
    }

    #[test]
    fn non_mesh_attachments_do_not_purify() {
        let bbox = RawAttachment::BoundingBox { vertex_count: 0, vertices: vec![] };
        assert!(PurifiedMeshData::try_from(&bbox, 0, &identity_rest(1)).is_none());
    }
}
