use macroquad::prelude::*;
use macroquad::miniquad::{self, Context, TextureFormat, TextureParams, TextureWrap};
use indextree::Arena;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::ops::IndexMut;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atlas_data::{Atlas, AtlasPage, AtlasRegion, TextureFilter};
use crate::error::{Result, SpineError};
use crate::skeleton_data::animation::{
    RawAnimationData, RawAttachmentFrame, RawColorFrame, RawCurve, RawRotateFrame, RawScaleFrame,
    RawTranslateFrame,
};
use crate::skeleton_data::bone::{RawBone, TransformMode};
use crate::skeleton_data::skin::{PurifiedMeshData, RawAttachment};
use crate::skeleton_data::transform::{local_matrix, LocalTransform};
use crate::skeleton_data::RawSkeletonData;

const COLORS: &[Color] = &[
    GOLD,
    ORANGE,
    PINK,
    RED,
    MAROON,
    GREEN,
    LIME,
    DARKGREEN,
    SKYBLUE,
    BLUE,
    DARKBLUE,
    PURPLE,
    VIOLET,
    DARKPURPLE,
    BEIGE,
    MAGENTA
];

#[derive(Copy, Clone)]
pub enum DrawFlip {
    None,
    Flipped
}

pub struct BufferedDrawBatcher {
    vertex_buffer: Vec<Vertex>,
    index_buffer: Vec<u16>,
}

impl BufferedDrawBatcher {
    pub fn new() -> Self {
        Self {
            vertex_buffer: Vec::new(),
            index_buffer: Vec::new(),
        }
    }

    pub fn renderize_next_triangles(
        &mut self,
        vertices: impl Iterator<Item = Vertex>,
        indices: impl Iterator<Item = u16>,
        texture: Option<Texture2D>,
    ) {
        self.vertex_buffer.clear();
        self.index_buffer.clear();
        self.vertex_buffer.extend(vertices);
        self.index_buffer.extend(indices);

        let quad_gl = unsafe {
            let InternalGlContext { quad_gl, .. } = get_internal_gl();
            quad_gl
        };

        quad_gl.texture(texture);
        quad_gl.draw_mode(DrawMode::Triangles);
        quad_gl.geometry(&self.vertex_buffer, &self.index_buffer);
    }
}

/// Supplies page textures while an atlas is loaded. Implementations own the
/// decoding policy; the runtime only cares that every page resolves to a GPU
/// texture.
pub trait TextureLoader {
    fn load(&mut self, page: &AtlasPage) -> Result<Texture2D>;
}

/// Loads `page.name` relative to a base directory, decoding with the `image`
/// crate and bleeding edge colors into fully transparent texels so that
/// linear filtering does not pull black fringes into the sprite borders.
pub struct FsTextureLoader {
    base_dir: PathBuf,
}

impl FsTextureLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }
}

impl TextureLoader for FsTextureLoader {
    fn load(&mut self, page: &AtlasPage) -> Result<Texture2D> {
        let path = self.base_dir.join(&page.name);
        if !path.is_file() {
            return Err(SpineError::MissingTexture(path));
        }
        let bytes = std::fs::read(&path)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| SpineError::TextureDecode { path: path.clone(), message: e.to_string() })?
            .to_rgba8();
        let (width, height) = (img.width(), img.height());
        let mut raw_bytes = img.into_raw();
        bleed_transparent_texels(&mut raw_bytes, width as usize, height as usize);
        debug!(page = %page.name, width, height, "uploaded atlas page");

        let ctx = unsafe {
            let InternalGlContext { quad_context, .. } = get_internal_gl();
            quad_context
        };
        Ok(upload_rgba(ctx, &raw_bytes, width, height, page.filter))
    }
}

fn upload_rgba(
    ctx: &mut Context,
    bytes: &[u8],
    width: u32,
    height: u32,
    filter: TextureFilter,
) -> Texture2D {
    let filter = match filter {
        TextureFilter::Nearest => FilterMode::Nearest,
        TextureFilter::Linear | TextureFilter::MipMap => FilterMode::Linear,
    };
    Texture2D::from_miniquad_texture(miniquad::Texture::from_data_and_format(
        ctx,
        bytes,
        TextureParams {
            width,
            height,
            format: TextureFormat::RGBA8,
            filter,
            wrap: TextureWrap::Clamp,
        },
    ))
}

/// Copies rgb from the first visible 4-neighbor into fully transparent
/// texels. Three passes widen the skirt enough for bilinear sampling.
fn bleed_transparent_texels(bytes: &mut [u8], width: usize, height: usize) {
    for _ in 0..3 {
        for row in 0..height {
            for col in 0..width {
                let at = (row * width + col) * 4;
                if bytes[at] != 0 || bytes[at + 1] != 0 || bytes[at + 2] != 0 || bytes[at + 3] != 0
                {
                    continue;
                }
                let mut neighbors = [None; 4];
                if row > 0 {
                    neighbors[0] = Some(at - width * 4);
                }
                if row + 1 < height {
                    neighbors[1] = Some(at + width * 4);
                }
                if col > 0 {
                    neighbors[2] = Some(at - 4);
                }
                if col + 1 < width {
                    neighbors[3] = Some(at + 4);
                }
                let visible = neighbors.iter().flatten().copied().find(|&other| {
                    bytes[other] != 0
                        || bytes[other + 1] != 0
                        || bytes[other + 2] != 0
                        || bytes[other + 3] != 0
                });
                if let Some(other) = visible {
                    bytes[at] = bytes[other];
                    bytes[at + 1] = bytes[other + 1];
                    bytes[at + 2] = bytes[other + 2];
                }
            }
        }
    }
}

fn tint(attachment: crate::shared_types::Color, slot: crate::shared_types::Color) -> Color {
    Color::new(
        attachment.r * slot.r,
        attachment.g * slot.g,
        attachment.b * slot.b,
        attachment.a * slot.a,
    )
}

pub trait Drawable {
    fn draw(
        &self,
        draw_batcher: &mut BufferedDrawBatcher,
        pose_matrices: &[nalgebra::Matrix3<f32>],
        diff_matrices: &[nalgebra::Matrix3<f32>],
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flipped: bool,
        slot_color: crate::shared_types::Color,
    );
    fn instantiate(&self) -> Box<dyn Drawable>;
}

/// Page-space uv corners of a region: `[bottom-left, bottom-right, top-left,
/// top-right]` in the attachment's own (y-up) space. Rotated packing shifts
/// the cycle by one corner.
fn region_corner_uvs(region: &AtlasRegion, page_width: f32, page_height: f32) -> [(f32, f32); 4] {
    let u = region.rect.x / page_width;
    let v = region.rect.y / page_height;
    let u2 = (region.rect.x + region.rect.width) / page_width;
    let v2 = (region.rect.y + region.rect.height) / page_height;
    if region.rotate {
        [(u, v), (u, v2), (u2, v), (u2, v2)]
    } else {
        [(u, v2), (u2, v2), (u, v), (u2, v)]
    }
}

fn mesh_uv(region: &AtlasRegion, page_width: f32, page_height: f32, s: f32, t: f32) -> (f32, f32) {
    let u = region.rect.x / page_width;
    let v = region.rect.y / page_height;
    let du = region.rect.width / page_width;
    let dv = region.rect.height / page_height;
    if region.rotate {
        (u + (1.0 - t) * du, v + s * dv)
    } else {
        (u + s * du, v + t * dv)
    }
}

#[derive(Clone)]
pub struct MeshDrawable {
    mesh_data: Arc<PurifiedMeshData>,
    texture: Texture2D,
    uvs: Vec<(f32, f32)>,
    color: crate::shared_types::Color,
}

impl MeshDrawable {
    pub fn new(
        mesh_data: &PurifiedMeshData,
        texture: Texture2D,
        page_size: [f32; 2],
        region: &AtlasRegion,
        color: crate::shared_types::Color,
    ) -> Self {
        let uvs = mesh_data
            .uvs
            .chunks_exact(2)
            .map(|uv| mesh_uv(region, page_size[0], page_size[1], uv[0], uv[1]))
            .collect();
        Self {
            mesh_data: Arc::new(mesh_data.clone()),
            texture,
            uvs,
            color,
        }
    }
}

impl Drawable for MeshDrawable {
    fn draw(
        &self,
        draw_batcher: &mut BufferedDrawBatcher,
        _pose_matrices: &[nalgebra::Matrix3<f32>],
        diff_matrices: &[nalgebra::Matrix3<f32>],
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flipped: bool,
        slot_color: crate::shared_types::Color,
    ) {
        let x_scale = if x_flipped { -scale } else { scale };
        let bone_count = diff_matrices.len();
        let color = tint(self.color, slot_color);
        let verts = self
            .mesh_data
            .vertices
            .chunks_exact(2)
            .zip(self.uvs.iter())
            .zip(self.mesh_data.weights.chunks_exact(bone_count))
            .map(|((v, uv), weights)| {
                let pt: nalgebra::Point3<f32> = nalgebra::Point3::new(v[0], v[1], 1.0);
                let skinned = diff_matrices
                    .iter()
                    .zip(weights)
                    .filter(|(_, &weight)| weight != 0.0)
                    .map(|(diff, &weight)| weight * (diff * pt))
                    .fold(
                        nalgebra::Point3::origin(),
                        |acc: nalgebra::Point3<f32>, x: nalgebra::Point3<f32>| {
                            [acc.x + x.x, acc.y + x.y, acc.z + x.z].into()
                        },
                    );

                Vertex::new(
                    position_x + skinned.x * x_scale,
                    position_y - skinned.y * scale,
                    0.0,
                    uv.0,
                    uv.1,
                    color,
                )
            });

        let tris = self.mesh_data.triangles.iter().map(|it| *it);
        draw_batcher.renderize_next_triangles(verts, tris, Some(self.texture));
    }

    fn instantiate(&self) -> Box<dyn Drawable> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct RegionDrawable {
    texture: Texture2D,
    parent_bone_id: usize,
    placement: nalgebra::Matrix3<f32>,
    vertices: [nalgebra::Point3<f32>; 4],
    uvs: [(f32, f32); 4],
    color: crate::shared_types::Color,
}

impl RegionDrawable {
    pub fn new(
        texture: Texture2D,
        page_size: [f32; 2],
        region: &AtlasRegion,
        parent_bone_id: usize,
        placement: LocalTransform,
        width: f32,
        height: f32,
        color: crate::shared_types::Color,
    ) -> Self {
        // The attachment covers `width` x `height` around its center; only
        // the packed (whitespace-trimmed) part of that frame gets vertices.
        let ratio_x = if region.orig.x > 0.0 { width / region.orig.x } else { 1.0 };
        let ratio_y = if region.orig.y > 0.0 { height / region.orig.y } else { 1.0 };
        let left = -width / 2.0 + region.offset.x * ratio_x;
        let right = left + region.size.x * ratio_x;
        let bottom = -height / 2.0 + region.offset.y * ratio_y;
        let top = bottom + region.size.y * ratio_y;

        let vertices = [
            nalgebra::Point3::from([left, bottom, 1.0]),
            nalgebra::Point3::from([right, bottom, 1.0]),
            nalgebra::Point3::from([left, top, 1.0]),
            nalgebra::Point3::from([right, top, 1.0]),
        ];

        Self {
            texture,
            parent_bone_id,
            placement: placement.to_matrix(),
            vertices,
            uvs: region_corner_uvs(region, page_size[0], page_size[1]),
            color,
        }
    }
}

impl Drawable for RegionDrawable {
    fn draw(
        &self,
        draw_batcher: &mut BufferedDrawBatcher,
        pose_matrices: &[nalgebra::Matrix3<f32>],
        _diff_matrices: &[nalgebra::Matrix3<f32>],
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flipped: bool,
        slot_color: crate::shared_types::Color,
    ) {
        let x_scale = if x_flipped { -scale } else { scale };
        let mat = pose_matrices[self.parent_bone_id] * self.placement;
        let color = tint(self.color, slot_color);
        let indices = [0, 1, 2, 1, 2, 3].iter().map(|it| *it as u16);
        let verts = self
            .vertices
            .iter()
            .zip(self.uvs.iter())
            .map(|(&v, uv)| {
                let world: nalgebra::Point3<f32> = mat * v;
                Vertex::new(
                    position_x + world.x * x_scale,
                    position_y - world.y * scale,
                    0.0,
                    uv.0,
                    uv.1,
                    color,
                )
            });
        draw_batcher.renderize_next_triangles(verts, indices, Some(self.texture));
    }

    fn instantiate(&self) -> Box<dyn Drawable> {
        Box::new(self.clone())
    }
}

#[derive(Copy, Clone, Debug)]
pub struct PosedBone {
    id: usize,
    parent_id: Option<usize>,
    pub length: f32,
    pub transform_mode: TransformMode,
    pub transform: LocalTransform,
}

impl PosedBone {
    fn resolve(bone: &RawBone, all: &[RawBone]) -> Result<Self> {
        let id = (0..all.len())
            .find(|&id| all[id].name == bone.name)
            .expect("bone comes from the same list");
        let parent_id = match &bone.parent {
            None => None,
            Some(parent) => Some(
                (0..all.len())
                    .find(|&id| all[id].name == *parent)
                    .ok_or_else(|| SpineError::MissingBone(parent.clone()))?,
            ),
        };
        Ok(Self {
            id,
            parent_id,
            length: bone.length,
            transform_mode: bone.transform,
            transform: bone.into(),
        })
    }
}

#[derive(Copy, Clone, Debug)]
struct BoneInfo {
    id: usize,
    is_dirty: bool,
}

#[derive(Clone)]
struct IkChain {
    /// Parent first; one or two bones.
    bones: Vec<usize>,
    target: usize,
    mix: f32,
    bend_positive: bool,
}

#[derive(Clone)]
struct RuntimeSlot {
    name: String,
    bone_id: usize,
    setup_color: crate::shared_types::Color,
    setup_attachment: Option<String>,
    color: crate::shared_types::Color,
    attachment: Option<String>,
    /// attachment name -> index into the skeleton's drawable list.
    displays: HashMap<String, usize>,
    blend: crate::shared_types::BlendMode,
}

#[derive(Clone)]
struct SharedSkeletonInfo {
    bone_lookup: Arc<HashMap<String, usize>>,
    rest_pose_bones: Arc<Vec<PosedBone>>,
    animations: Arc<Vec<AnimationClip>>,
    initial_matrices: Arc<Vec<nalgebra::Matrix3<f32>>>,
    ik: Arc<Vec<IkChain>>,
}

#[derive(Clone)]
struct TrackInfo {
    time: f32,
    looping: bool,
    bones: Vec<PosedBone>,
    animation_id: Option<usize>,
}

#[derive(Copy, Clone)]
struct CrossFade {
    duration: f32,
    elapsed: f32,
}

#[derive(Copy, Clone)]
struct OverlayInfo {
    time: f32,
    animation_id: usize,
}

enum Tick {
    Current,
    FadeOut,
}

pub struct RuntimeSkeleton {
    shared_info: SharedSkeletonInfo,
    current_track: TrackInfo,
    fade_out_track: TrackInfo,
    cross_fade: Option<CrossFade>,
    overlays: Vec<OverlayInfo>,

    bone_tree: Arena<BoneInfo>,
    tree_handles: Vec<indextree::NodeId>,

    bones: Vec<PosedBone>,
    pose_matrices: Vec<nalgebra::Matrix3<f32>>,
    diff_matrices: Vec<nalgebra::Matrix3<f32>>,

    slots: Vec<RuntimeSlot>,
    draw_order: Vec<usize>,
    drawables: Vec<Box<dyn Drawable>>,
    buffer_deque: VecDeque<indextree::NodeId>,
}

impl RuntimeSkeleton {
    pub fn get_bone_by_name(&self, bone_name: &str) -> Option<usize> {
        self.shared_info.bone_lookup.get(bone_name).map(|&it| it)
    }

    pub fn animation_names(&self) -> Vec<&str> {
        self.shared_info.animations.iter().map(|clip| clip.name.as_str()).collect()
    }

    pub fn has_animation(&self, animation_name: &str) -> bool {
        self.find_animation(animation_name).is_some()
    }

    pub fn current_animation(&self) -> Option<&str> {
        self.current_track
            .animation_id
            .map(|id| self.shared_info.animations[id].name.as_str())
    }

    fn find_animation(&self, animation_name: &str) -> Option<usize> {
        (0..self.shared_info.animations.len())
            .find(|&id| self.shared_info.animations[id].name == animation_name)
    }

    pub fn get_bone_world_orientation(&self, bone_id: usize, x_flip: DrawFlip) -> (f32, f32) {
        let x_scale = match x_flip {
            DrawFlip::None => 1.0,
            DrawFlip::Flipped => -1.0,
        };
        let dir = self.pose_matrices[bone_id]
            * nalgebra::Point3::new(self.bones[bone_id].length, 0.0, 1.0);
        let dir = (dir.x * x_scale, -dir.y);
        let len = (dir.0 * dir.0 + dir.1 * dir.1).sqrt();
        (dir.0 / len, dir.1 / len)
    }

    pub fn get_bone_world_position(
        &self,
        bone_id: usize,
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flip: DrawFlip,
    ) -> (f32, f32) {
        let x_scale = match x_flip {
            DrawFlip::None => scale,
            DrawFlip::Flipped => -scale,
        };
        let origin = self.pose_matrices[bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);
        (position_x + origin.x * x_scale, position_y - origin.y * scale)
    }

    pub fn instantiate(&self) -> Self {
        Self {
            shared_info: self.shared_info.clone(),
            current_track: self.current_track.clone(),
            fade_out_track: self.fade_out_track.clone(),
            cross_fade: self.cross_fade,
            overlays: self.overlays.clone(),
            bone_tree: self.bone_tree.clone(),
            tree_handles: self.tree_handles.clone(),
            bones: self.bones.clone(),
            pose_matrices: self.pose_matrices.clone(),
            diff_matrices: self.diff_matrices.clone(),
            slots: self.slots.clone(),
            draw_order: self.draw_order.clone(),
            drawables: self.drawables.iter().map(|it| it.instantiate()).collect(),
            buffer_deque: VecDeque::new(),
        }
    }

    pub fn extract(
        raw: &RawSkeletonData,
        atlas: &Atlas,
        page_textures: &[Texture2D],
    ) -> Result<Self> {
        let mut bone_vec = Vec::with_capacity(raw.bones.len());
        let mut bone_lookup = HashMap::new();
        for bone in raw.bones.iter() {
            bone_lookup.insert(bone.name.clone(), bone_vec.len());
            bone_vec.push(PosedBone::resolve(bone, &raw.bones[..])?);
        }

        // Setup-pose world matrices, needed uninverted to flatten weighted
        // mesh vertices before they become the skinning reference.
        let mut rest_matrices: Vec<nalgebra::Matrix3<f32>> =
            vec![nalgebra::Matrix3::identity(); bone_vec.len()];
        for bone_id in 0..bone_vec.len() {
            let parent = match bone_vec[bone_id].parent_id {
                None => nalgebra::Matrix3::identity(),
                Some(pid) => rest_matrices[pid],
            };
            rest_matrices[bone_id] = parent * flattened_local_matrix(&bone_vec, bone_id);
        }

        let mut slots: Vec<RuntimeSlot> = Vec::with_capacity(raw.slots.len());
        let mut slot_lookup = HashMap::new();
        for slot in raw.slots.iter() {
            let bone_id = *bone_lookup
                .get(&slot.bone)
                .ok_or_else(|| SpineError::MissingBone(slot.bone.clone()))?;
            slot_lookup.insert(slot.name.clone(), slots.len());
            slots.push(RuntimeSlot {
                name: slot.name.clone(),
                bone_id,
                setup_color: slot.color,
                setup_attachment: slot.attachment.clone(),
                color: slot.color,
                attachment: slot.attachment.clone(),
                displays: HashMap::new(),
                blend: slot.blend,
            });
        }

        let mut drawables: Vec<Box<dyn Drawable>> = Vec::new();
        for skin in raw.skins.iter() {
            for (slot_name, attachments) in skin.attachments.iter() {
                let slot_id = match slot_lookup.get(slot_name) {
                    Some(&id) => id,
                    None => {
                        warn!(skin = %skin.name, slot = %slot_name, "skin entry for unknown slot");
                        continue;
                    }
                };
                let parent_bone_id = slots[slot_id].bone_id;
                for (attachment_name, attachment) in attachments.iter() {
                    let drawable: Box<dyn Drawable> = match attachment {
                        RawAttachment::Region {
                            path,
                            x,
                            y,
                            rotation,
                            scale_x,
                            scale_y,
                            width,
                            height,
                            color,
                        } => {
                            let region_name = path.as_deref().unwrap_or(attachment_name);
                            let (page_id, region) = atlas
                                .find_region(region_name)
                                .ok_or_else(|| SpineError::MissingRegion(region_name.into()))?;
                            let page = &atlas.pages[page_id];
                            Box::new(RegionDrawable::new(
                                page_textures[page_id],
                                [page.width, page.height],
                                region,
                                parent_bone_id,
                                LocalTransform::from_placement(*x, *y, *rotation, *scale_x, *scale_y),
                                *width,
                                *height,
                                *color,
                            ))
                        }
                        RawAttachment::Mesh { path, color, .. } => {
                            let region_name = path.as_deref().unwrap_or(attachment_name);
                            let (page_id, region) = atlas
                                .find_region(region_name)
                                .ok_or_else(|| SpineError::MissingRegion(region_name.into()))?;
                            let page = &atlas.pages[page_id];
                            let mesh = PurifiedMeshData::try_from(
                                attachment,
                                parent_bone_id,
                                &rest_matrices,
                            )
                            .expect("mesh attachments always purify");
                            Box::new(MeshDrawable::new(
                                &mesh,
                                page_textures[page_id],
                                [page.width, page.height],
                                region,
                                *color,
                            ))
                        }
                        RawAttachment::BoundingBox { .. }
                        | RawAttachment::Clipping { .. }
                        | RawAttachment::Point { .. } => {
                            debug!(
                                slot = %slot_name,
                                attachment = %attachment_name,
                                "attachment kind carries no geometry to render"
                            );
                            continue;
                        }
                    };
                    let drawable_id = drawables.len();
                    drawables.push(drawable);
                    slots[slot_id].displays.insert(attachment_name.clone(), drawable_id);
                }
            }
        }

        let mut initial_matrices = rest_matrices.clone();
        for m in initial_matrices.iter_mut() {
            *m = m.try_inverse().unwrap_or_else(|| {
                warn!("rest pose matrix is singular, skinning will be off for one bone");
                nalgebra::Matrix3::identity()
            });
        }

        let pose_matrices = rest_matrices;
        let diff_matrices: Vec<nalgebra::Matrix3<f32>> =
            vec![nalgebra::Matrix3::identity(); bone_vec.len()];

        let mut bone_tree = Arena::new();
        let mut tree_handles: Vec<indextree::NodeId> = Vec::with_capacity(bone_vec.len());
        for i in 0..bone_vec.len() {
            let bone = &bone_vec[i];
            let handle = bone_tree.new_node(BoneInfo { id: i, is_dirty: true });
            if let Some(pid) = bone.parent_id {
                let parent_handle = tree_handles[pid];
                parent_handle.append(handle, &mut bone_tree);
            }
            tree_handles.push(handle);
        }

        let mut animations_vec: Vec<AnimationClip> = Vec::new();
        for (name, animation) in raw.animations.iter() {
            animations_vec.push(AnimationClip::bake(
                name,
                animation,
                &bone_vec,
                &bone_lookup,
                &slot_lookup,
            ));
        }

        let mut ik = Vec::new();
        for constraint in raw.ik.iter() {
            let resolve = |bone_name: &str| -> Result<usize> {
                bone_lookup
                    .get(bone_name)
                    .copied()
                    .ok_or_else(|| SpineError::MissingBone(bone_name.into()))
            };
            if constraint.bones.is_empty() || constraint.bones.len() > 2 {
                warn!(
                    constraint = %constraint.name,
                    chain = constraint.bones.len(),
                    "only one- and two-bone ik chains are solvable, dropping constraint"
                );
                continue;
            }
            let mut bones = Vec::with_capacity(constraint.bones.len());
            for bone_name in constraint.bones.iter() {
                bones.push(resolve(bone_name)?);
            }
            ik.push(IkChain {
                bones,
                target: resolve(&constraint.target)?,
                mix: constraint.mix,
                bend_positive: constraint.bend_positive,
            });
        }

        let start_animation_id = if animations_vec.is_empty() { None } else { Some(0) };
        let track = TrackInfo {
            time: 0.0,
            looping: true,
            bones: bone_vec.clone(),
            animation_id: start_animation_id,
        };
        let draw_order = (0..slots.len()).collect();

        Ok(Self {
            shared_info: SharedSkeletonInfo {
                rest_pose_bones: Arc::new(bone_vec.clone()),
                initial_matrices: Arc::new(initial_matrices),
                bone_lookup: Arc::new(bone_lookup),
                animations: Arc::new(animations_vec),
                ik: Arc::new(ik),
            },
            fade_out_track: track.clone(),
            current_track: track,
            cross_fade: None,
            overlays: Vec::new(),
            bones: bone_vec,
            pose_matrices,
            diff_matrices,
            bone_tree,
            tree_handles,
            slots,
            draw_order,
            drawables,
            buffer_deque: VecDeque::new(),
        })
    }

    /// Queues `animation_name` as an overlay: its keyed channels overwrite
    /// the main track until the clip runs out once.
    pub fn stack_additive_animation(&mut self, animation_name: &str) {
        match self.find_animation(animation_name) {
            Some(animation_id) => {
                self.overlays.push(OverlayInfo { time: 0.0, animation_id })
            }
            None => warn!(animation = %animation_name, "unknown overlay animation"),
        }
    }

    /// Switches the main track. With `cross_fade` the previous pose blends
    /// out over the given number of seconds.
    pub fn set_animation(&mut self, animation_name: &str, looping: bool, cross_fade: Option<f32>) {
        let animation_id = match self.find_animation(animation_name) {
            Some(id) => id,
            None => {
                warn!(animation = %animation_name, "unknown animation");
                return;
            }
        };
        std::mem::swap(&mut self.current_track, &mut self.fade_out_track);
        self.cross_fade = cross_fade
            .filter(|duration| *duration > 0.0)
            .map(|duration| CrossFade { duration, elapsed: 0.0 });

        self.current_track.time = 0.0;
        self.current_track.animation_id = Some(animation_id);
        self.current_track.looping = looping;
        for i in 0..self.bones.len() {
            self.current_track.bones[i].transform = self.shared_info.rest_pose_bones[i].transform;
        }
        for slot in self.slots.iter_mut() {
            slot.color = slot.setup_color;
            slot.attachment = slot.setup_attachment.clone();
        }
    }

    pub fn set_slot_attachment(&mut self, slot_name: &str, attachment: Option<&str>) {
        match self.slots.iter_mut().find(|slot| slot.name == slot_name) {
            Some(slot) => slot.attachment = attachment.map(str::to_string),
            None => warn!(slot = %slot_name, "unknown slot"),
        }
    }

    pub fn slot_blend_mode(&self, slot_name: &str) -> Option<crate::shared_types::BlendMode> {
        self.slots.iter().find(|slot| slot.name == slot_name).map(|slot| slot.blend)
    }

    pub fn update_animation(&mut self, dt: f32) {
        self.shared_animation_update(dt);
        self.update_ik();
    }

    /// Same as [`Self::update_animation`] but lets the caller adjust bones
    /// after sampling and before ik, e.g. to aim a bone at the cursor.
    pub fn update_animation_ex(
        &mut self,
        dt: f32,
        post_process_animation: impl FnOnce(&mut BonesMut) -> (),
    ) {
        self.shared_animation_update(dt);
        {
            let mut bones_mut = BonesMut { skeleton: self };
            post_process_animation(&mut bones_mut);
        }
        self.update_matrices();
        self.update_ik();
    }

    fn shared_animation_update(&mut self, dt: f32) {
        self.tick_track(Tick::Current, dt);
        self.cross_fade = match self.cross_fade {
            None => {
                self.commit_track_bones(1.0);
                None
            }
            Some(fade) => {
                if fade.elapsed >= fade.duration {
                    self.commit_track_bones(1.0);
                    None
                } else {
                    self.tick_track(Tick::FadeOut, dt);
                    self.commit_track_bones(fade.elapsed / fade.duration);
                    Some(CrossFade { elapsed: fade.elapsed + dt, ..fade })
                }
            }
        };
        self.apply_overlays(dt);
        self.update_matrices();
        self.apply_slot_timelines();
    }

    /// Advances one track's clock and samples its clip into the track-local
    /// bone set.
    fn tick_track(&mut self, tick_kind: Tick, dt: f32) {
        let clips = self.shared_info.animations.clone();
        let track = match tick_kind {
            Tick::Current => &mut self.current_track,
            Tick::FadeOut => &mut self.fade_out_track,
        };
        let clip = match track.animation_id {
            Some(id) => &clips[id],
            None => return,
        };
        track.time += dt;
        if clip.duration > 0.0 {
            if track.looping {
                track.time %= clip.duration;
            } else if track.time > clip.duration {
                track.time = clip.duration;
            }
        }
        let time = track.time;
        for animation_track in clip.rotation_tracks.iter() {
            if let Some(sample) = animation_track.sample(time) {
                track.bones[animation_track.target_id].transform.rotation = sample.theta;
            }
        }
        for animation_track in clip.translation_tracks.iter() {
            if let Some(sample) = animation_track.sample(time) {
                track.bones[animation_track.target_id].transform.x = sample.x;
                track.bones[animation_track.target_id].transform.y = sample.y;
            }
        }
        for animation_track in clip.scaling_tracks.iter() {
            if let Some(sample) = animation_track.sample(time) {
                track.bones[animation_track.target_id].transform.scale_x = sample.scale_x;
                track.bones[animation_track.target_id].transform.scale_y = sample.scale_y;
            }
        }
    }

    /// Blends the current track over the fading one into the posed bones.
    /// `delta` 1.0 means the current track fully wins.
    fn commit_track_bones(&mut self, delta: f32) {
        let bones_amount = self.current_track.bones.len();
        if delta >= 1.0 {
            for i in 0..bones_amount {
                let bone = self.current_track.bones[i];
                let mut bones_mut = BonesMut { skeleton: self };
                bones_mut[i] = bone;
            }
            return;
        }
        for i in 0..bones_amount {
            let bone = self.current_track.bones[i];
            let bone_fade = self.fade_out_track.bones[i];
            let mut bones_mut = BonesMut { skeleton: self };
            bones_mut[i].transform.rotation = TweenEasing::Linear.interpolate(
                bone_fade.transform.rotation,
                bone.transform.rotation,
                delta,
            );
            bones_mut[i].transform.x =
                TweenEasing::Linear.interpolate(bone_fade.transform.x, bone.transform.x, delta);
            bones_mut[i].transform.y =
                TweenEasing::Linear.interpolate(bone_fade.transform.y, bone.transform.y, delta);
            bones_mut[i].transform.scale_x = TweenEasing::Linear.interpolate(
                bone_fade.transform.scale_x,
                bone.transform.scale_x,
                delta,
            );
            bones_mut[i].transform.scale_y = TweenEasing::Linear.interpolate(
                bone_fade.transform.scale_y,
                bone.transform.scale_y,
                delta,
            );
        }
    }

    fn apply_overlays(&mut self, dt: f32) {
        let clips = self.shared_info.animations.clone();
        for idx in (0..self.overlays.len()).rev() {
            let OverlayInfo { time, animation_id } = self.overlays[idx];
            let clip = &clips[animation_id];
            if time >= clip.duration {
                self.overlays.swap_remove(idx);
                continue;
            }
            for track in clip.rotation_tracks.iter() {
                if let Some(sample) = track.sample(time) {
                    let mut bones_mut = BonesMut { skeleton: self };
                    bones_mut[track.target_id].transform.rotation = sample.theta;
                }
            }
            for track in clip.translation_tracks.iter() {
                if let Some(sample) = track.sample(time) {
                    let mut bones_mut = BonesMut { skeleton: self };
                    bones_mut[track.target_id].transform.x = sample.x;
                    bones_mut[track.target_id].transform.y = sample.y;
                }
            }
            for track in clip.scaling_tracks.iter() {
                if let Some(sample) = track.sample(time) {
                    let mut bones_mut = BonesMut { skeleton: self };
                    bones_mut[track.target_id].transform.scale_x = sample.scale_x;
                    bones_mut[track.target_id].transform.scale_y = sample.scale_y;
                }
            }
            self.overlays[idx].time += dt;
        }
    }

    fn apply_slot_timelines(&mut self) {
        let clips = self.shared_info.animations.clone();
        let clip = match self.current_track.animation_id {
            Some(id) => &clips[id],
            None => return,
        };
        let time = self.current_track.time;
        for track in clip.color_tracks.iter() {
            if let Some(sample) = track.sample(time) {
                self.slots[track.target_id].color = crate::shared_types::Color {
                    r: sample.r,
                    g: sample.g,
                    b: sample.b,
                    a: sample.a,
                };
            }
        }
        for track in clip.attachment_tracks.iter() {
            if let Some(attachment) = track.sample(time) {
                self.slots[track.slot_id].attachment = attachment.clone();
            }
        }
    }

    fn update_ik(&mut self) {
        let chains = self.shared_info.ik.clone();
        for chain in chains.iter() {
            let effector_position: nalgebra::Point3<f32> =
                self.pose_matrices[chain.target] * nalgebra::Point3::new(0.0, 0.0, 1.0);

            match chain.bones[..] {
                [bone_id] => {
                    let origin: nalgebra::Point3<f32> =
                        self.pose_matrices[bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);
                    let delta = effector_position - origin;
                    let rotation = delta.y.atan2(delta.x);
                    let mix = chain.mix;
                    let mut bones_mut = BonesMut { skeleton: self };
                    bones_mut.blend_bone_world_rotation(bone_id, rotation, mix);
                }
                [upper_bone_id, lower_bone_id] => {
                    let (l1, l2) =
                        (self.bones[lower_bone_id].length, self.bones[upper_bone_id].length);

                    let origin: nalgebra::Point3<f32> =
                        self.pose_matrices[upper_bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);

                    let delta = effector_position - origin;
                    let direction = delta.normalize();

                    let mut angle_decrement = 0.0;
                    let mut bone = &self.bones[upper_bone_id];
                    if bone.transform_mode.inherits_rotation() {
                        while let Some(pid) = bone.parent_id {
                            bone = &self.bones[pid];
                            angle_decrement += bone.transform.rotation;
                        }
                    }

                    let (lower_rotation, upper_rotation) = if delta.magnitude() > l1 + l2 {
                        let upper_rotation = delta.y.atan2(delta.x) - angle_decrement;
                        (0.0, upper_rotation)
                    } else {
                        let k2 = l1 * l1 - l2 * l2;
                        let k1 = delta.magnitude();

                        let d = (k1 * k1 - k2) / (2.0 * k1);
                        let a = (d / l2).acos();

                        let mat: nalgebra::Matrix3<f32> = if chain.bend_positive {
                            nalgebra::Rotation2::new(-a).into()
                        } else {
                            nalgebra::Rotation2::new(a).into()
                        };
                        let direction: nalgebra::Point3<f32> =
                            nalgebra::Point3::new(direction.x, direction.y, 1.0);
                        let delta = mat * direction;
                        let knee_position: nalgebra::Point3<f32> = nalgebra::Point3::new(
                            origin.x + delta.x * l2,
                            origin.y + delta.y * l2,
                            1.0,
                        );

                        let upper_rotation = delta.y.atan2(delta.x) - angle_decrement;
                        let lower_rotation = (effector_position.y - knee_position.y)
                            .atan2(effector_position.x - knee_position.x)
                            - upper_rotation
                            - angle_decrement;
                        (lower_rotation, upper_rotation)
                    };
                    let mix = chain.mix;
                    let mut bones_mut = BonesMut { skeleton: self };
                    let lower_current = bones_mut[lower_bone_id].transform.rotation;
                    let upper_current = bones_mut[upper_bone_id].transform.rotation;
                    bones_mut[lower_bone_id].transform.rotation =
                        TweenEasing::Linear.interpolate(lower_current, lower_rotation, mix);
                    bones_mut[upper_bone_id].transform.rotation =
                        TweenEasing::Linear.interpolate(upper_current, upper_rotation, mix);
                }
                _ => {}
            }
        }
        self.update_matrices();
    }

    fn update_matrices(&mut self) {
        for &node_id in self.tree_handles.iter() {
            let node = self.bone_tree.get_mut(node_id).unwrap().get_mut();
            if node.is_dirty {
                node.is_dirty = false;
            } else {
                continue;
            }
            let bone_id = node.id;
            let parent_transform = match self.bones[bone_id].parent_id {
                None => nalgebra::Matrix3::identity(),
                Some(pid) => self.pose_matrices[pid],
            };
            self.pose_matrices[bone_id] =
                parent_transform * flattened_local_matrix(&self.bones, bone_id);
            self.diff_matrices[bone_id] =
                self.pose_matrices[bone_id] * self.shared_info.initial_matrices[bone_id];
        }
    }

    pub fn draw(
        &self,
        draw_batcher: &mut BufferedDrawBatcher,
        position_x: f32,
        position_y: f32,
        scale: f32,
        flip_x: DrawFlip,
    ) {
        let x_flipped = match flip_x {
            DrawFlip::None => false,
            DrawFlip::Flipped => true,
        };
        for &slot_id in self.draw_order.iter() {
            let slot = &self.slots[slot_id];
            if slot.color.a <= 0.0 {
                continue;
            }
            let attachment = match &slot.attachment {
                Some(name) => name,
                None => continue,
            };
            if let Some(&drawable_id) = slot.displays.get(attachment) {
                self.drawables[drawable_id].draw(
                    draw_batcher,
                    &self.pose_matrices,
                    &self.diff_matrices,
                    position_x,
                    position_y,
                    scale,
                    x_flipped,
                    slot.color,
                );
            }
        }
    }

    pub fn draw_ik_effectors(&self, position_x: f32, position_y: f32, scale: f32) {
        for bone_id in self.shared_info.ik.iter().map(|chain| chain.target) {
            let origin = self.pose_matrices[bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);
            draw_circle(
                position_x + origin.x * scale,
                position_y - origin.y * scale,
                5.0,
                RED,
            );
        }
    }

    pub fn draw_bones(&self, position_x: f32, position_y: f32, scale: f32) {
        for bone_id in 0..self.bones.len() {
            let bone = &self.bones[bone_id];
            let bone_color = COLORS[bone_id % COLORS.len()];
            let origin = self.pose_matrices[bone_id] * nalgebra::Point3::new(0.0, 0.0, 1.0);
            let dir = self.pose_matrices[bone_id] * nalgebra::Point3::new(bone.length, 0.0, 1.0);
            draw_line(
                position_x + origin.x * scale,
                position_y - origin.y * scale,
                position_x + dir.x * scale,
                position_y - dir.y * scale,
                3.0,
                bone_color,
            );
        }
    }
}

/// Local matrix with the non-inheriting transform modes flattened against the
/// ancestor chain, so that `parent_world * local` lands on the intended world
/// transform.
fn flattened_local_matrix(bones: &[PosedBone], bone_id: usize) -> nalgebra::Matrix3<f32> {
    let bone = &bones[bone_id];
    let rotation = if bone.transform_mode.inherits_rotation() {
        bone.transform.rotation
    } else {
        let mut walk = bone;
        let mut rotation = bone.transform.rotation;
        while let Some(pid) = walk.parent_id {
            walk = &bones[pid];
            rotation -= walk.transform.rotation;
        }
        rotation
    };
    let (scale_x, scale_y) = if bone.transform_mode.inherits_scale() {
        (bone.transform.scale_x, bone.transform.scale_y)
    } else {
        let mut walk = bone;
        let mut scale = (bone.transform.scale_x, bone.transform.scale_y);
        while let Some(pid) = walk.parent_id {
            walk = &bones[pid];
            scale.0 /= walk.transform.scale_x;
            scale.1 /= walk.transform.scale_y;
        }
        scale
    };
    local_matrix(
        bone.transform.x,
        bone.transform.y,
        rotation,
        scale_x,
        scale_y,
        bone.transform.shear_x,
        bone.transform.shear_y,
    )
}

/// Cubic Bezier easing through (0,0) and (1,1) with two control handles.
pub struct CubicBezierRegion {
    handle_0_x: f32,
    handle_0_y: f32,
    handle_1_x: f32,
    handle_1_y: f32,
}

impl CubicBezierRegion {
    /// Flattens the curve into 16 evenly spaced samples of y over x.
    pub fn get_approx_bezier(handles: &[f32; 4]) -> [u8; 16] {
        let curve = Self {
            handle_0_x: handles[0].clamp(0.0, 1.0),
            handle_0_y: handles[1],
            handle_1_x: handles[2].clamp(0.0, 1.0),
            handle_1_y: handles[3],
        };
        let mut result = [0u8; 16];
        result[15] = 255;
        for i in 1..15 {
            let x = i as f32 / 15.0;
            result[i] = (curve.sample_at(curve.find_t(x)) * 255.0).clamp(0.0, 255.0) as u8;
        }
        result
    }

    /// x is monotonic in t for clamped handles, so plain bisection converges.
    fn find_t(&self, x: f32) -> f32 {
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        for _ in 0..20 {
            let mid = (lo + hi) * 0.5;
            let sample = Self::cubic_resolve(mid, 0.0, self.handle_0_x, self.handle_1_x, 1.0);
            if sample < x {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        (lo + hi) * 0.5
    }

    fn sample_at(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        Self::cubic_resolve(t, 0.0, self.handle_0_y, self.handle_1_y, 1.0)
    }

    fn cubic_resolve(t: f32, k1: f32, k2: f32, k3: f32, k4: f32) -> f32 {
        let (a, b, c) = (k1 + (k2 - k1) * t, k2 + (k3 - k2) * t, k3 + (k4 - k3) * t);
        let (d, e) = (a + (b - a) * t, b + (c - b) * t);
        d + (e - d) * t
    }
}

#[derive(Debug)]
pub enum TweenEasing {
    Stepped,
    Linear,
    FreeCurve([u8; 16]),
}

impl TweenEasing {
    pub fn parse(curve: &RawCurve) -> Self {
        match curve {
            RawCurve::Linear => Self::Linear,
            RawCurve::Stepped => Self::Stepped,
            RawCurve::Bezier(handles) => {
                Self::FreeCurve(CubicBezierRegion::get_approx_bezier(handles))
            }
        }
    }

    pub fn interpolate(&self, a: f32, b: f32, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        let t = match self {
            TweenEasing::Stepped => 0.0,
            TweenEasing::Linear => t,
            TweenEasing::FreeCurve(samples) => {
                let region_id = t * 15.0;
                let t = region_id.fract();
                let region_id = region_id.trunc() as usize;
                if region_id >= 15 {
                    1.0
                } else {
                    let left = samples[region_id] as f32 / 255.0;
                    let right = samples[region_id + 1] as f32 / 255.0;
                    left + (right - left) * t
                }
            }
        };
        a + (b - a) * t
    }
}

pub trait Sample: Copy + Debug {
    fn interpolate(
        &self,
        other: Self,
        start_time: f32,
        end_time: f32,
        time: f32,
        tween_easing: &TweenEasing,
    ) -> Self;
}

fn span_alpha(start_time: f32, end_time: f32, time: f32) -> f32 {
    debug_assert!(start_time <= end_time);
    if end_time <= start_time {
        1.0
    } else {
        (time - start_time) / (end_time - start_time)
    }
}

#[derive(Debug)]
pub struct SamplingRegion<T: Sample> {
    pub start_sample: T,
    pub end_sample: T,
    pub start_time: f32,
    pub end_time: f32,
    pub tween_easing: TweenEasing,
}

impl<T: Sample> SamplingRegion<T> {
    pub fn interpolate(&self, time: f32) -> T {
        self.start_sample.interpolate(
            self.end_sample,
            self.start_time,
            self.end_time,
            time,
            &self.tween_easing,
        )
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RotationSample {
    pub theta: f32,
}
impl Sample for RotationSample {
    fn interpolate(
        &self,
        other: Self,
        start_time: f32,
        end_time: f32,
        time: f32,
        tween_easing: &TweenEasing,
    ) -> Self {
        let a = span_alpha(start_time, end_time, time);
        Self { theta: tween_easing.interpolate(self.theta, other.theta, a) }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TranslationSample {
    pub x: f32,
    pub y: f32,
}
impl Sample for TranslationSample {
    fn interpolate(
        &self,
        other: Self,
        start_time: f32,
        end_time: f32,
        time: f32,
        tween_easing: &TweenEasing,
    ) -> Self {
        let a = span_alpha(start_time, end_time, time);
        Self {
            x: tween_easing.interpolate(self.x, other.x, a),
            y: tween_easing.interpolate(self.y, other.y, a),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ScaleSample {
    pub scale_x: f32,
    pub scale_y: f32,
}
impl Sample for ScaleSample {
    fn interpolate(
        &self,
        other: Self,
        start_time: f32,
        end_time: f32,
        time: f32,
        tween_easing: &TweenEasing,
    ) -> Self {
        let a = span_alpha(start_time, end_time, time);
        Self {
            scale_x: tween_easing.interpolate(self.scale_x, other.scale_x, a),
            scale_y: tween_easing.interpolate(self.scale_y, other.scale_y, a),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ColorSample {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}
impl Sample for ColorSample {
    fn interpolate(
        &self,
        other: Self,
        start_time: f32,
        end_time: f32,
        time: f32,
        tween_easing: &TweenEasing,
    ) -> Self {
        let alpha = span_alpha(start_time, end_time, time);
        Self {
            r: tween_easing.interpolate(self.r, other.r, alpha),
            g: tween_easing.interpolate(self.g, other.g, alpha),
            b: tween_easing.interpolate(self.b, other.b, alpha),
            a: tween_easing.interpolate(self.a, other.a, alpha),
        }
    }
}

#[derive(Debug)]
pub struct AnimationTrack<T: Sample> {
    pub target_id: usize,
    pub regions: Vec<SamplingRegion<T>>,
}

impl<T: Sample> AnimationTrack<T> {
    /// Clamps before the first keyed span and holds after the last one.
    pub fn sample(&self, time: f32) -> Option<T> {
        let first = self.regions.first()?;
        if time <= first.start_time {
            return Some(first.start_sample);
        }
        let last = self.regions.last()?;
        if time >= last.end_time {
            return Some(last.end_sample);
        }
        self.regions
            .iter()
            .find(|region| region.start_time <= time && time <= region.end_time)
            .map(|region| region.interpolate(time))
    }
}

#[derive(Debug)]
pub struct AttachmentTrack {
    pub slot_id: usize,
    /// Keyed attachment names; `None` hides the slot.
    pub frames: Vec<(f32, Option<String>)>,
}

impl AttachmentTrack {
    pub fn sample(&self, time: f32) -> Option<&Option<String>> {
        self.frames
            .iter()
            .rev()
            .find(|(frame_time, _)| *frame_time <= time)
            .map(|(_, name)| name)
    }
}

#[derive(Debug)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
    pub rotation_tracks: Vec<AnimationTrack<RotationSample>>,
    pub translation_tracks: Vec<AnimationTrack<TranslationSample>>,
    pub scaling_tracks: Vec<AnimationTrack<ScaleSample>>,
    pub color_tracks: Vec<AnimationTrack<ColorSample>>,
    pub attachment_tracks: Vec<AttachmentTrack>,
}

impl AnimationClip {
    /// Bakes raw timelines into sampling regions with the setup pose folded
    /// in: rotations and translations are keyed relative to the setup values,
    /// scales multiply them.
    fn bake(
        name: &str,
        raw: &RawAnimationData,
        bones: &[PosedBone],
        bone_lookup: &HashMap<String, usize>,
        slot_lookup: &HashMap<String, usize>,
    ) -> Self {
        let mut clip = Self {
            name: name.to_string(),
            duration: 0.0,
            rotation_tracks: Vec::new(),
            translation_tracks: Vec::new(),
            scaling_tracks: Vec::new(),
            color_tracks: Vec::new(),
            attachment_tracks: Vec::new(),
        };

        for (bone_name, timeline) in raw.bones.iter() {
            let bone_id = match bone_lookup.get(bone_name) {
                Some(&id) => id,
                None => {
                    warn!(animation = %name, bone = %bone_name, "timeline for unknown bone");
                    continue;
                }
            };
            let setup = bones[bone_id].transform;
            if !timeline.rotate.is_empty() {
                let rotation =
                    |frame: &RawRotateFrame| setup.rotation + frame.angle.to_radians();
                clip.duration = clip
                    .duration
                    .max(timeline.rotate.last().map(|frame| frame.time).unwrap_or(0.0));
                clip.rotation_tracks.push(AnimationTrack {
                    target_id: bone_id,
                    regions: bake_regions(&timeline.rotate, |frame, next| SamplingRegion {
                        start_sample: RotationSample { theta: rotation(frame) },
                        end_sample: RotationSample { theta: rotation(next.unwrap_or(frame)) },
                        start_time: frame.time,
                        end_time: next.map(|n| n.time).unwrap_or(frame.time),
                        tween_easing: TweenEasing::parse(&frame.curve),
                    }),
                });
            }
            if !timeline.translate.is_empty() {
                let translation = |frame: &RawTranslateFrame| TranslationSample {
                    x: setup.x + frame.x,
                    y: setup.y + frame.y,
                };
                clip.duration = clip
                    .duration
                    .max(timeline.translate.last().map(|frame| frame.time).unwrap_or(0.0));
                clip.translation_tracks.push(AnimationTrack {
                    target_id: bone_id,
                    regions: bake_regions(&timeline.translate, |frame, next| SamplingRegion {
                        start_sample: translation(frame),
                        end_sample: translation(next.unwrap_or(frame)),
                        start_time: frame.time,
                        end_time: next.map(|n| n.time).unwrap_or(frame.time),
                        tween_easing: TweenEasing::parse(&frame.curve),
                    }),
                });
            }
            if !timeline.scale.is_empty() {
                let scaling = |frame: &RawScaleFrame| ScaleSample {
                    scale_x: setup.scale_x * frame.x,
                    scale_y: setup.scale_y * frame.y,
                };
                clip.duration = clip
                    .duration
                    .max(timeline.scale.last().map(|frame| frame.time).unwrap_or(0.0));
                clip.scaling_tracks.push(AnimationTrack {
                    target_id: bone_id,
                    regions: bake_regions(&timeline.scale, |frame, next| SamplingRegion {
                        start_sample: scaling(frame),
                        end_sample: scaling(next.unwrap_or(frame)),
                        start_time: frame.time,
                        end_time: next.map(|n| n.time).unwrap_or(frame.time),
                        tween_easing: TweenEasing::parse(&frame.curve),
                    }),
                });
            }
        }

        for (slot_name, timeline) in raw.slots.iter() {
            let slot_id = match slot_lookup.get(slot_name) {
                Some(&id) => id,
                None => {
                    warn!(animation = %name, slot = %slot_name, "timeline for unknown slot");
                    continue;
                }
            };
            if !timeline.color.is_empty() {
                let color = |frame: &RawColorFrame| ColorSample {
                    r: frame.color.r,
                    g: frame.color.g,
                    b: frame.color.b,
                    a: frame.color.a,
                };
                clip.duration = clip
                    .duration
                    .max(timeline.color.last().map(|frame| frame.time).unwrap_or(0.0));
                clip.color_tracks.push(AnimationTrack {
                    target_id: slot_id,
                    regions: bake_regions(&timeline.color, |frame, next| SamplingRegion {
                        start_sample: color(frame),
                        end_sample: color(next.unwrap_or(frame)),
                        start_time: frame.time,
                        end_time: next.map(|n| n.time).unwrap_or(frame.time),
                        tween_easing: TweenEasing::parse(&frame.curve),
                    }),
                });
            }
            if !timeline.attachment.is_empty() {
                clip.duration = clip
                    .duration
                    .max(timeline.attachment.last().map(|frame| frame.time).unwrap_or(0.0));
                clip.attachment_tracks.push(AttachmentTrack {
                    slot_id,
                    frames: timeline
                        .attachment
                        .iter()
                        .map(|frame: &RawAttachmentFrame| (frame.time, frame.name.clone()))
                        .collect(),
                });
            }
        }
        clip
    }
}

/// One region per consecutive frame pair; a single frame becomes one
/// zero-length region that the track clamping rules turn into a constant.
fn bake_regions<F, T: Sample>(
    frames: &[F],
    mut make: impl FnMut(&F, Option<&F>) -> SamplingRegion<T>,
) -> Vec<SamplingRegion<T>> {
    if frames.len() == 1 {
        return vec![make(&frames[0], None)];
    }
    frames
        .windows(2)
        .map(|pair| make(&pair[0], Some(&pair[1])))
        .collect()
}

/// A ready-to-instantiate skeleton: parsed export + atlas + page textures.
pub struct SpineData {
    skeleton: RuntimeSkeleton,
}

impl SpineData {
    pub fn load(
        skeleton_file_bytes: &[u8],
        atlas_text: &str,
        texture_loader: &mut dyn TextureLoader,
    ) -> Result<Self> {
        let atlas = Atlas::parse(atlas_text)?;
        let skeleton_data: RawSkeletonData = serde_json::from_slice(skeleton_file_bytes)?;
        let mut page_textures = Vec::with_capacity(atlas.pages.len());
        for page in atlas.pages.iter() {
            page_textures.push(texture_loader.load(page)?);
        }
        let skeleton = RuntimeSkeleton::extract(&skeleton_data, &atlas, &page_textures)?;
        info!(
            skeleton = %skeleton_data.skeleton.version,
            bones = skeleton_data.bones.len(),
            slots = skeleton_data.slots.len(),
            animations = skeleton_data.animations.len(),
            "skeleton loaded"
        );
        Ok(Self { skeleton })
    }

    pub fn instantiate_skeleton(&self) -> RuntimeSkeleton {
        self.skeleton.instantiate()
    }
}

pub struct BonesMut<'a> {
    skeleton: &'a mut RuntimeSkeleton,
}

impl<'a> BonesMut<'a> {
    pub fn set_bone_world_rotation(&mut self, bone_id: usize, theta: f32) {
        let mut bone = &self.skeleton.bones[bone_id];
        let mut rotation = theta;
        if bone.transform_mode.inherits_rotation() {
            while let Some(pid) = bone.parent_id {
                bone = &self.skeleton.bones[pid];
                rotation -= bone.transform.rotation;
            }
        }
        self[bone_id].transform.rotation = rotation;
    }

    /// Linear blend between the bone's current local rotation and a world
    /// target, used by the ik solver's mix weight.
    fn blend_bone_world_rotation(&mut self, bone_id: usize, theta: f32, mix: f32) {
        let mut bone = &self.skeleton.bones[bone_id];
        let mut rotation = theta;
        if bone.transform_mode.inherits_rotation() {
            while let Some(pid) = bone.parent_id {
                bone = &self.skeleton.bones[pid];
                rotation -= bone.transform.rotation;
            }
        }
        let current = self[bone_id].transform.rotation;
        self[bone_id].transform.rotation = TweenEasing::Linear.interpolate(current, rotation, mix);
    }

    pub fn get_bone_world_position(
        &self,
        bone_id: usize,
        position_x: f32,
        position_y: f32,
        scale: f32,
        x_flip: DrawFlip,
    ) -> (f32, f32) {
        self.skeleton.get_bone_world_position(bone_id, position_x, position_y, scale, x_flip)
    }

    pub fn get_bone_world_orientation(&self, bone_id: usize, x_flip: DrawFlip) -> (f32, f32) {
        self.skeleton.get_bone_world_orientation(bone_id, x_flip)
    }
}

impl<'a> core::ops::Index<usize> for BonesMut<'a> {
    type Output = PosedBone;
    fn index(&self, index: usize) -> &Self::Output {
        &self.skeleton.bones[index]
    }
}

impl<'a> IndexMut<usize> for BonesMut<'a> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        let node_id = self.skeleton.tree_handles[index];
        for node_id in node_id.descendants(&self.skeleton.bone_tree) {
            self.skeleton.buffer_deque.push_back(node_id);
        }
        while let Some(node_id) = self.skeleton.buffer_deque.pop_front() {
            let node = self.skeleton.bone_tree.get_mut(node_id).unwrap().get_mut();
            node.is_dirty = true;
        }
        &mut self.skeleton.bones[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_easing_hits_endpoints_and_midpoint() {
        let easing = TweenEasing::Linear;
        assert_eq!(easing.interpolate(2.0, 6.0, 0.0), 2.0);
        assert_eq!(easing.interpolate(2.0, 6.0, 1.0), 6.0);
        assert_eq!(easing.interpolate(2.0, 6.0, 0.5), 4.0);
    }

    #[test]
    fn stepped_easing_holds_the_start_value() {
        let easing = TweenEasing::Stepped;
        assert_eq!(easing.interpolate(2.0, 6.0, 0.0), 2.0);
        assert_eq!(easing.interpolate(2.0, 6.0, 0.99), 2.0);
    }

    #[test]
    fn bezier_easing_is_exact_at_endpoints_and_monotonic_for_ease_in_out() {
        let easing = TweenEasing::parse(&RawCurve::Bezier([0.42, 0.0, 0.58, 1.0]));
        assert!((easing.interpolate(0.0, 1.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((easing.interpolate(0.0, 1.0, 1.0) - 1.0).abs() < 1e-6);
        let mut previous = 0.0;
        for i in 0..=20 {
            let value = easing.interpolate(0.0, 1.0, i as f32 / 20.0);
            assert!(value + 1e-2 >= previous, "not monotonic at step {}", i);
            previous = value;
        }
        // Symmetric ease-in-out passes near the middle at t = 0.5.
        let mid = easing.interpolate(0.0, 1.0, 0.5);
        assert!((mid - 0.5).abs() < 0.08, "midpoint {} too far off", mid);
    }

    #[test]
    fn sampling_region_respects_time_span() {
        let region = SamplingRegion {
            start_sample: TranslationSample { x: 0.0, y: 10.0 },
            end_sample: TranslationSample { x: 4.0, y: 30.0 },
            start_time: 1.0,
            end_time: 3.0,
            tween_easing: TweenEasing::Linear,
        };
        let halfway = region.interpolate(2.0);
        assert!((halfway.x - 2.0).abs() < 1e-6);
        assert!((halfway.y - 20.0).abs() < 1e-6);
    }

    #[test]
    fn track_sampling_clamps_outside_of_keyed_spans() {
        let track = AnimationTrack {
            target_id: 0,
            regions: vec![
                SamplingRegion {
                    start_sample: RotationSample { theta: 0.0 },
                    end_sample: RotationSample { theta: 1.0 },
                    start_time: 0.5,
                    end_time: 1.0,
                    tween_easing: TweenEasing::Linear,
                },
                SamplingRegion {
                    start_sample: RotationSample { theta: 1.0 },
                    end_sample: RotationSample { theta: -1.0 },
                    start_time: 1.0,
                    end_time: 2.0,
                    tween_easing: TweenEasing::Linear,
                },
            ],
        };
        assert!((track.sample(0.0).unwrap().theta - 0.0).abs() < 1e-6);
        assert!((track.sample(0.75).unwrap().theta - 0.5).abs() < 1e-6);
        assert!((track.sample(1.5).unwrap().theta - 0.0).abs() < 1e-6);
        assert!((track.sample(9.0).unwrap().theta + 1.0).abs() < 1e-6);
    }

    #[test]
    fn single_frame_tracks_are_constant() {
        let track = AnimationTrack {
            target_id: 0,
            regions: vec![SamplingRegion {
                start_sample: ScaleSample { scale_x: 2.0, scale_y: 3.0 },
                end_sample: ScaleSample { scale_x: 2.0, scale_y: 3.0 },
                start_time: 0.0,
                end_time: 0.0,
                tween_easing: TweenEasing::Linear,
            }],
        };
        for &time in &[0.0, 0.5, 100.0] {
            let sample = track.sample(time).unwrap();
            assert_eq!(sample.scale_x, 2.0);
            assert_eq!(sample.scale_y, 3.0);
        }
    }

    #[test]
    fn attachment_track_picks_the_latest_keyed_frame() {
        let track = AttachmentTrack {
            slot_id: 0,
            frames: vec![
                (0.0, Some("open".to_string())),
                (0.5, Some("closed".to_string())),
                (1.0, None),
            ],
        };
        assert_eq!(track.sample(0.1).unwrap().as_deref(), Some("open"));
        assert_eq!(track.sample(0.7).unwrap().as_deref(), Some("closed"));
        assert!(track.sample(2.0).unwrap().is_none());
    }

    #[test]
    fn bleeding_copies_rgb_from_visible_neighbors() {
        // 2x1 image: left texel opaque red, right fully transparent.
        let mut bytes = vec![255, 0, 0, 255, 0, 0, 0, 0];
        bleed_transparent_texels(&mut bytes, 2, 1);
        assert_eq!(&bytes[4..7], &[255, 0, 0]);
        // Alpha stays zero.
        assert_eq!(bytes[7], 0);
    }
}
