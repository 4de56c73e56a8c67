//! Haar cascade face detector.
//!
//! A Viola–Jones cascade evaluated on an image pyramid: each level is the
//! grayscale input shrunk by `scale_factor^k`, and a fixed-size window slides
//! over it. Every window position runs the stages in order and is rejected as
//! soon as one stage's score falls below its threshold.
//!
//! ## Model format
//!
//! Models are OpenCV cascade files such as `haarcascade_frontalface_default.xml`:
//!
//! ```xml
//! <opencv_storage>
//! <cascade type_id="opencv-cascade-classifier">
//!   <stageType>BOOST</stageType>
//!   <featureType>HAAR</featureType>
//!   <height>24</height>
//!   <width>24</width>
//!   <stages>
//!     <_>
//!       <stageThreshold>-5.04</stageThreshold>
//!       <weakClassifiers>
//!         <_>
//!           <internalNodes>0 -1 0 -3.15e-02</internalNodes>
//!           <leafValues>2.08 -2.21</leafValues></_></weakClassifiers></_></stages>
//!   <features>
//!     <_>
//!       <rects>
//!         <_>6 4 12 9 -1.</_>
//!         <_>6 7 12 3 3.</_></rects></_></features></cascade>
//! </opencv_storage>
//! ```
//!
//! Each weak classifier is a small tree. A node is `left right feature
//! threshold`; a child `> 0` is another node and a child `<= 0` is the leaf
//! `leafValues[-child]`. Only upright HAAR features with BOOST stages are
//! supported.
//!
//! A feature's value is the weighted sum of its rectangle sums divided by the
//! window's contrast `sqrt(area·Σx² − (Σx)²)` (taken over the window inset by
//! one pixel). A node goes left when the value is below its threshold.
//!
//! Raw hits are merged with [`group_rectangles`].

use super::calculations::{Dimensions, pyramid_scales};
use super::face::{DetectionParams, DetectorError, FaceDetector, FaceRegion};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, integral_squared_image};
use roxmltree::{Document, Node};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Overlap tolerance used when merging raw hits.
const GROUP_EPS: f32 = 0.2;

/// Stage thresholds are lowered by this much on load.
const THRESHOLD_EPS: f32 = 1e-5;

type Integral = ImageBuffer<Luma<u64>, Vec<u64>>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct HaarRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

#[derive(Debug, Clone)]
struct Feature {
    rects: Vec<HaarRect>,
}

#[derive(Debug, Clone, Copy)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

impl WeakClassifier {
    /// Walk the tree from the root, reading feature values through `value`.
    fn eval(&self, value: impl Fn(usize) -> f32) -> f32 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            let next = if value(node.feature) < node.threshold {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return self.leaves[next.unsigned_abs() as usize];
            }
            idx = next as usize;
        }
    }
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

#[derive(Debug, Clone)]
struct CascadeModel {
    window: Dimensions,
    features: Vec<Feature>,
    stages: Vec<Stage>,
}

fn invalid(msg: impl Into<String>) -> DetectorError {
    DetectorError::Unavailable(format!("invalid cascade model: {}", msg.into()))
}

/// First element child named `name`.
fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Result<Node<'a, 'i>, DetectorError> {
    node.children()
        .find(|c| c.has_tag_name(name))
        .ok_or_else(|| invalid(format!("<{}> has no <{name}>", node.tag_name().name())))
}

/// The `<_>` entries of a sequence node.
fn items<'a, 'i>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(|c| c.has_tag_name("_"))
}

fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or("")
}

fn number<T: FromStr>(token: &str, what: &str) -> Result<T, DetectorError> {
    token
        .parse()
        .map_err(|_| invalid(format!("bad {what} value '{token}'")))
}

fn numbers<T: FromStr>(node: Node<'_, '_>, what: &str) -> Result<Vec<T>, DetectorError> {
    text(node)
        .split_whitespace()
        .map(|t| number(t, what))
        .collect()
}

fn parse_tree(node: Node<'_, '_>) -> Result<WeakClassifier, DetectorError> {
    let raw: Vec<&str> = text(child(node, "internalNodes")?).split_whitespace().collect();
    if raw.is_empty() || raw.len() % 4 != 0 {
        return Err(invalid(
            "internalNodes must hold 'left right feature threshold' groups",
        ));
    }
    let nodes = raw
        .chunks(4)
        .map(|n| -> Result<TreeNode, DetectorError> {
            Ok(TreeNode {
                left: number(n[0], "node child")?,
                right: number(n[1], "node child")?,
                feature: number(n[2], "feature index")?,
                threshold: number(n[3], "node threshold")?,
            })
        })
        .collect::<Result<_, _>>()?;
    let leaves = numbers(child(node, "leafValues")?, "leaf")?;
    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: Node<'_, '_>) -> Result<Feature, DetectorError> {
    if let Some(tilted) = node.children().find(|c| c.has_tag_name("tilted")) {
        if text(tilted) != "0" {
            return Err(invalid("tilted features are not supported"));
        }
    }
    let rects = items(child(node, "rects")?)
        .map(|r| -> Result<HaarRect, DetectorError> {
            let raw: Vec<&str> = text(r).split_whitespace().collect();
            let [x, y, w, h, weight] = raw[..] else {
                return Err(invalid("a feature rectangle needs 'x y width height weight'"));
            };
            Ok(HaarRect {
                x: number(x, "rectangle")?,
                y: number(y, "rectangle")?,
                width: number(w, "rectangle")?,
                height: number(h, "rectangle")?,
                weight: number(weight, "rectangle weight")?,
            })
        })
        .collect::<Result<_, _>>()?;
    Ok(Feature { rects })
}

impl CascadeModel {
    fn parse(xml: &str) -> Result<Self, DetectorError> {
        let doc = Document::parse(xml).map_err(|e| invalid(e.to_string()))?;
        let cascade = doc
            .root_element()
            .children()
            .find(|c| c.has_tag_name("cascade"))
            .ok_or_else(|| invalid("no <cascade> element (old-style cascades are not supported)"))?;

        for (tag, expected) in [("stageType", "BOOST"), ("featureType", "HAAR")] {
            if let Some(node) = cascade.children().find(|c| c.has_tag_name(tag)) {
                if text(node) != expected {
                    return Err(invalid(format!("{tag} {} is not supported", text(node))));
                }
            }
        }

        let window = Dimensions::new(
            number(text(child(cascade, "width")?), "width")?,
            number(text(child(cascade, "height")?), "height")?,
        );
        let stages = items(child(cascade, "stages")?)
            .map(|stage| -> Result<Stage, DetectorError> {
                let threshold: f32 =
                    number(text(child(stage, "stageThreshold")?), "stage threshold")?;
                let classifiers = items(child(stage, "weakClassifiers")?)
                    .map(parse_tree)
                    .collect::<Result<_, _>>()?;
                Ok(Stage {
                    threshold: threshold - THRESHOLD_EPS,
                    classifiers,
                })
            })
            .collect::<Result<_, _>>()?;
        let features = items(child(cascade, "features")?)
            .map(parse_feature)
            .collect::<Result<_, _>>()?;

        let model = Self {
            window,
            features,
            stages,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), DetectorError> {
        let Dimensions {
            width: ww,
            height: wh,
        } = self.window;
        if ww < 3 || wh < 3 {
            return Err(invalid("cascade window must be at least 3x3"));
        }
        if self.stages.is_empty() {
            return Err(invalid("cascade has no stages"));
        }
        for r in self.features.iter().flat_map(|f| &f.rects) {
            let right = r.x as u64 + r.width as u64;
            let bottom = r.y as u64 + r.height as u64;
            if right > ww as u64 || bottom > wh as u64 {
                return Err(invalid("feature rectangle outside the detection window"));
            }
        }
        for tree in self.stages.iter().flat_map(|s| &s.classifiers) {
            for (i, node) in tree.nodes.iter().enumerate() {
                if node.feature >= self.features.len() {
                    return Err(invalid("classifier references a missing feature"));
                }
                for next in [node.left, node.right] {
                    let ok = if next > 0 {
                        // Child nodes come after their parent
                        (next as usize) > i && (next as usize) < tree.nodes.len()
                    } else {
                        (next.unsigned_abs() as usize) < tree.leaves.len()
                    };
                    if !ok {
                        return Err(invalid("classifier node points outside its tree"));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Boosted Haar cascade loaded from an OpenCV XML model.
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    model: CascadeModel,
}

impl CascadeDetector {
    /// Read and validate a model file.
    pub fn load(path: &Path) -> Result<Self, DetectorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DetectorError::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_xml(&content)
    }

    /// Parse and validate a model from its XML text.
    pub fn from_xml(xml: &str) -> Result<Self, DetectorError> {
        Ok(Self {
            model: CascadeModel::parse(xml)?,
        })
    }

    /// Detection window the cascade was trained on.
    pub fn window(&self) -> Dimensions {
        self.model.window
    }

    pub fn stage_count(&self) -> usize {
        self.model.stages.len()
    }

    /// Run the cascade on the window whose top-left corner is `(x, y)`.
    fn accepts(&self, sum: &Integral, sq: &Integral, x: u32, y: u32) -> bool {
        let Dimensions {
            width: ww,
            height: wh,
        } = self.window();

        let area = ((ww - 2) * (wh - 2)) as f64;
        let s = rect_sum(sum, x + 1, y + 1, ww - 2, wh - 2) as f64;
        let s2 = rect_sum(sq, x + 1, y + 1, ww - 2, wh - 2) as f64;
        let variance = area * s2 - s * s;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        let feature_value = |index: usize| -> f32 {
            let raw: f64 = self.model.features[index]
                .rects
                .iter()
                .map(|r| {
                    r.weight as f64 * rect_sum(sum, x + r.x, y + r.y, r.width, r.height) as f64
                })
                .sum();
            (raw / norm) as f32
        };

        self.model.stages.iter().all(|stage| {
            let score: f32 = stage
                .classifiers
                .iter()
                .map(|tree| tree.eval(&feature_value))
                .sum();
            score >= stage.threshold
        })
    }
}

/// Sum of the `w`×`h` block at `(x, y)` from a (w+1)×(h+1) integral image.
fn rect_sum(ii: &Integral, x: u32, y: u32, w: u32, h: u32) -> i64 {
    let at = |px: u32, py: u32| ii.get_pixel(px, py)[0] as i64;
    at(x + w, y + h) - at(x + w, y) - at(x, y + h) + at(x, y)
}

impl FaceDetector for CascadeDetector {
    fn detect(
        &self,
        gray: &GrayImage,
        params: &DetectionParams,
    ) -> Result<Vec<FaceRegion>, DetectorError> {
        let dims = Dimensions::new(gray.width(), gray.height());
        let window = self.window();
        let mut hits = Vec::new();

        for factor in pyramid_scales(dims, window, params.min_size, params.scale_factor) {
            let level_w = (dims.width as f32 / factor).round() as u32;
            let level_h = (dims.height as f32 / factor).round() as u32;
            if level_w < window.width || level_h < window.height {
                continue;
            }
            let level = if level_w == dims.width && level_h == dims.height {
                gray.clone()
            } else {
                imageops::resize(gray, level_w, level_h, FilterType::Triangle)
            };
            let sum: Integral = integral_image::<_, u64>(&level);
            let sq: Integral = integral_squared_image::<_, u64>(&level);

            let step = if factor > 2.0 { 1 } else { 2 };
            let face_w = (window.width as f32 * factor).round() as u32;
            let face_h = (window.height as f32 * factor).round() as u32;
            for y in (0..=level_h - window.height).step_by(step) {
                for x in (0..=level_w - window.width).step_by(step) {
                    if self.accepts(&sum, &sq, x, y) {
                        hits.push(FaceRegion {
                            x: (x as f32 * factor).round() as u32,
                            y: (y as f32 * factor).round() as u32,
                            width: face_w,
                            height: face_h,
                        });
                    }
                }
            }
        }

        let faces = group_rectangles(&hits, params.min_neighbors, GROUP_EPS);
        debug!(raw_hits = hits.len(), faces = faces.len(), "cascade scan complete");
        Ok(faces)
    }
}

fn similar(a: &FaceRegion, b: &FaceRegion, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping raw detections.
///
/// Hits are partitioned into clusters of mutually similar rectangles (edges
/// within `eps` of the smaller size). Clusters with no more than
/// `min_neighbors` members are discarded, the rest are averaged, and a
/// cluster lying inside a stronger one is dropped. With `min_neighbors == 0`
/// the raw hits are returned unchanged.
pub fn group_rectangles(hits: &[FaceRegion], min_neighbors: u32, eps: f32) -> Vec<FaceRegion> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let mut parent: Vec<usize> = (0..hits.len()).collect();
    for i in 0..hits.len() {
        for j in (i + 1)..hits.len() {
            if similar(&hits[i], &hits[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // root -> (count, Σx, Σy, Σw, Σh)
    let mut clusters: std::collections::BTreeMap<usize, (u32, u64, u64, u64, u64)> =
        std::collections::BTreeMap::new();
    for (i, r) in hits.iter().enumerate() {
        let root = find(&mut parent, i);
        let entry = clusters.entry(root).or_insert((0, 0, 0, 0, 0));
        entry.0 += 1;
        entry.1 += r.x as u64;
        entry.2 += r.y as u64;
        entry.3 += r.width as u64;
        entry.4 += r.height as u64;
    }

    let averaged: Vec<(FaceRegion, u32)> = clusters
        .into_values()
        .filter(|&(n, ..)| n > min_neighbors)
        .map(|(n, sx, sy, sw, sh)| {
            let avg = |v: u64| ((v as f64) / n as f64).round() as u32;
            (
                FaceRegion {
                    x: avg(sx),
                    y: avg(sy),
                    width: avg(sw),
                    height: avg(sh),
                },
                n,
            )
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|&(i, &(r1, n1))| {
            !averaged.iter().enumerate().any(|(j, &(r2, n2))| {
                if i == j {
                    return false;
                }
                let dx = (r2.width as f32 * eps).round() as i64;
                let dy = (r2.height as f32 * eps).round() as i64;
                let inside = r1.x as i64 >= r2.x as i64 - dx
                    && r1.y as i64 >= r2.y as i64 - dy
                    && (r1.x + r1.width) as i64 <= (r2.x + r2.width) as i64 + dx
                    && (r1.y + r1.height) as i64 <= (r2.y + r2.height) as i64 + dy;
                inside && (n2 > n1.max(3) || n1 < 3)
            })
        })
        .map(|(_, &(r, _))| r)
        .collect()
}
