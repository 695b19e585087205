use std::collections::HashMap;

use crate::error::{Result, SpineError};
use crate::shared_types::{Point, Rect};

/// Texture atlas in the libgdx text format that Spine exports alongside the
/// skeleton json. One file can describe several pages; each page is one image
/// with named packed regions.
#[derive(Clone, Debug)]
pub struct Atlas {
    pub pages: Vec<AtlasPage>,
}

#[derive(Clone, Debug)]
pub struct AtlasPage {
    /// Image file name relative to the atlas file.
    pub name: String,
    pub width: f32,
    pub height: f32,
    pub filter: TextureFilter,
    pub regions: HashMap<String, AtlasRegion>,
}

#[derive(Copy, Clone, Debug)]
pub struct AtlasRegion {
    /// Packed rect in page pixels. When `rotate` is set the region occupies
    /// this rect rotated, so `rect.width`/`rect.height` are already swapped
    /// relative to `size`.
    pub rect: Rect,
    /// Region size before packing rotation.
    pub size: Point,
    /// Untrimmed size of the source image.
    pub orig: Point,
    /// Position of the packed rect inside the untrimmed image, measured from
    /// the bottom-left (libgdx convention).
    pub offset: Point,
    /// Region was rotated 90 degrees clockwise when packed.
    pub rotate: bool,
    pub index: i32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TextureFilter {
    Nearest,
    Linear,
    MipMap,
}
impl Default for TextureFilter {
    fn default() -> Self {
        Self::Linear
    }
}
impl TextureFilter {
    fn parse(value: &str, line: usize) -> Result<Self> {
        match value {
            "Nearest" => Ok(Self::Nearest),
            "Linear" => Ok(Self::Linear),
            v if v.starts_with("MipMap") => Ok(Self::MipMap),
            v => Err(SpineError::atlas(line, format!("unknown filter `{}`", v))),
        }
    }
}

#[derive(Default)]
struct RegionBuilder {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    orig: Option<(f32, f32)>,
    offset: (f32, f32),
    rotate: bool,
    index: i32,
    has_size: bool,
}

impl RegionBuilder {
    fn build(self, name: &str, line: usize) -> Result<AtlasRegion> {
        if !self.has_size {
            return Err(SpineError::atlas(line, format!("region `{}` has no size", name)));
        }
        let orig = self.orig.unwrap_or((self.width, self.height));
        let (packed_w, packed_h) = if self.rotate {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        Ok(AtlasRegion {
            rect: Rect { x: self.x, y: self.y, width: packed_w, height: packed_h },
            size: Point { x: self.width, y: self.height },
            orig: Point { x: orig.0, y: orig.1 },
            offset: Point { x: self.offset.0, y: self.offset.1 },
            rotate: self.rotate,
            index: self.index,
        })
    }
}

impl Atlas {
    pub fn parse(text: &str) -> Result<Self> {
        let mut pages: Vec<AtlasPage> = Vec::new();
        let mut page_line = 0usize;
        let mut current_region: Option<(String, usize, RegionBuilder)> = None;
        let mut expect_page = true;

        for (idx, raw_line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() {
                Self::commit_region(&mut pages, &mut current_region)?;
                expect_page = true;
                continue;
            }

            if expect_page {
                pages.push(AtlasPage {
                    name: line.to_string(),
                    width: 0.0,
                    height: 0.0,
                    filter: TextureFilter::default(),
                    regions: HashMap::new(),
                });
                page_line = line_no;
                expect_page = false;
                continue;
            }

            if pages.is_empty() {
                return Err(SpineError::atlas(line_no, "entry outside of any page"));
            }

            match line.find(':') {
                None => {
                    // A bare line inside a page starts a new region.
                    Self::commit_region(&mut pages, &mut current_region)?;
                    current_region = Some((line.to_string(), line_no, RegionBuilder::default()));
                }
                Some(colon) => {
                    let key = line[..colon].trim();
                    let value = line[colon + 1..].trim();
                    match current_region.as_mut() {
                        None => {
                            let page = pages.last_mut().expect("checked non-empty above");
                            match key {
                                "size" => {
                                    let (w, h) = parse_pair(value, line_no)?;
                                    page.width = w;
                                    page.height = h;
                                }
                                "filter" => {
                                    let first = value.split(',').next().unwrap_or("").trim();
                                    page.filter = TextureFilter::parse(first, line_no)?;
                                }
                                // Pixel format, wrap and premultiply hints are
                                // texture-upload concerns the loader decides
                                // for itself.
                                "format" | "repeat" | "pma" => {}
                                other => {
                                    return Err(SpineError::atlas(
                                        line_no,
                                        format!("unknown page property `{}`", other),
                                    ));
                                }
                            }
                        }
                        Some((_, _, builder)) => match key {
                            "rotate" => {
                                builder.rotate = match value {
                                    "true" | "90" => true,
                                    "false" => false,
                                    v => {
                                        return Err(SpineError::atlas(
                                            line_no,
                                            format!("bad rotate value `{}`", v),
                                        ))
                                    }
                                };
                            }
                            "xy" => {
                                let (x, y) = parse_pair(value, line_no)?;
                                builder.x = x;
                                builder.y = y;
                            }
                            "size" => {
                                let (w, h) = parse_pair(value, line_no)?;
                                builder.width = w;
                                builder.height = h;
                                builder.has_size = true;
                            }
                            "orig" => {
                                builder.orig = Some(parse_pair(value, line_no)?);
                            }
                            "offset" => {
                                builder.offset = parse_pair(value, line_no)?;
                            }
                            "index" => {
                                builder.index = value.parse::<i32>().map_err(|_| {
                                    SpineError::atlas(line_no, format!("bad index `{}`", value))
                                })?;
                            }
                            // Nine-patch metadata, unused by skeletons.
                            "split" | "pad" => {}
                            other => {
                                return Err(SpineError::atlas(
                                    line_no,
                                    format!("unknown region property `{}`", other),
                                ));
                            }
                        },
                    }
                }
            }
        }
        Self::commit_region(&mut pages, &mut current_region)?;

        for page in pages.iter() {
            if page.width <= 0.0 || page.height <= 0.0 {
                return Err(SpineError::atlas(
                    page_line,
                    format!("page `{}` has no size", page.name),
                ));
            }
        }
        Ok(Self { pages })
    }

    fn commit_region(
        pages: &mut Vec<AtlasPage>,
        current: &mut Option<(String, usize, RegionBuilder)>,
    ) -> Result<()> {
        if let Some((name, line, builder)) = current.take() {
            let region = builder.build(&name, line)?;
            if let Some(page) = pages.last_mut() {
                page.regions.insert(name, region);
            }
        }
        Ok(())
    }

    pub fn find_region(&self, name: &str) -> Option<(usize, &AtlasRegion)> {
        self.pages
            .iter()
            .enumerate()
            .find_map(|(id, page)| page.regions.get(name).map(|region| (id, region)))
    }
}

fn parse_pair(value: &str, line: usize) -> Result<(f32, f32)> {
    let mut parts = value.split(',').map(|part| part.trim());
    let parse = |part: Option<&str>| -> Result<f32> {
        part.and_then(|p| p.parse::<f32>().ok())
            .ok_or_else(|| SpineError::atlas(line, format!("expected `x, y` pair, got `{}`", value)))
    };
    let first = parse(parts.next())?;
    let second = parse(parts.next())?;
    Ok((first, second))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PAGES: &str = "\nhero.png\nsize: 256,128\nformat: RGBA8888\nfilter: Linear,Linear\nrepeat: none\nbody\n  rotate: false\n  xy: 2, 2\n  size: 64, 96\n  orig: 64, 96\n  offset: 0, 0\n  index: -1\nsword\n  rotate: true\n  xy: 70, 2\n  size: 16, 48\n  orig: 20, 50\n  offset: 2, 1\n  index: -1\n\nhero2.png\nsize: 64,64\nfilter: Nearest,Nearest\neye\n  rotate: false\n  xy: 0, 0\n  size: 8, 8\n";

    #[test]
    fn parses_pages_and_regions() {
        let atlas = Atlas::parse(TWO_PAGES).unwrap();
        assert_eq!(atlas.pages.len(), 2);
        assert_eq!(atlas.pages[0].name, "hero.png");
        assert_eq!(atlas.pages[0].width, 256.0);
        assert_eq!(atlas.pages[0].filter, TextureFilter::Linear);
        assert_eq!(atlas.pages[0].regions.len(), 2);
        assert_eq!(atlas.pages[1].filter, TextureFilter::Nearest);

        let (page_id, eye) = atlas.find_region("eye").unwrap();
        assert_eq!(page_id, 1);
        assert_eq!(eye.rect.width, 8.0);
        // No orig line means the region is untrimmed.
        assert_eq!(eye.orig.x, 8.0);
    }

    #[test]
    fn rotated_region_swaps_packed_rect() {
        let atlas = Atlas::parse(TWO_PAGES).unwrap();
        let (_, sword) = atlas.find_region("sword").unwrap();
        assert!(sword.rotate);
        assert_eq!(sword.size.x, 16.0);
        assert_eq!(sword.size.y, 48.0);
        assert_eq!(sword.rect.width, 48.0);
        assert_eq!(sword.rect.height, 16.0);
        assert_eq!(sword.orig.x, 20.0);
        assert_eq!(sword.offset.x, 2.0);
    }

    #[test]
    fn malformed_pair_reports_line() {
        let bad = "page.png\nsize: 256\n";
        match Atlas::parse(bad) {
            Err(SpineError::AtlasFormat { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected atlas error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn unknown_region_property_is_rejected() {
        let bad = "page.png\nsize: 4,4\nr\n  frobnicate: yes\n";
        assert!(Atlas::parse(bad).is_err());
    }
}
