// Necrosis measurement on segmentation output
// Rasterizes root and lesion outlines into binary masks and compares their areas

use std::collections::BTreeMap;

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_line_segment_mut, draw_polygon_mut, draw_text_mut, Canvas};
use imageproc::point::Point;
use rusttype::{Font, Scale};
use serde::Serialize;
use tracing::warn;

use super::detector::Detection;
use crate::config::InferenceConfig;

const MASK_ON: Luma<u8> = Luma([255]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_FONT: &[u8] = include_bytes!("../../fonts/DejaVuSans.ttf");
const LABEL_SCALE: f32 = 60.0;
/// Baseline of the percentage label, measured from the top edge.
const LABEL_BASELINE: i32 = 100;

/// Model class ids of the two regions we care about.
#[derive(Debug, Clone, Copy)]
pub struct ClassIds {
    pub root: u32,
    pub necrosis: u32,
}

impl From<&InferenceConfig> for ClassIds {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            root: config.root_class_id,
            necrosis: config.necrosis_class_id,
        }
    }
}

impl Default for ClassIds {
    fn default() -> Self {
        Self { root: 0, necrosis: 1 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NecrosisMeasurement {
    pub root_area: u64,
    pub necrosis_area: u64,
    pub percentage: f64,
    pub lesion_count: usize,
    /// Lesion outlines keyed by detection index, normalized to `0..=1`.
    pub lesions: BTreeMap<String, Vec<[f32; 2]>>,
    pub root_confidence: Option<f32>,
}

impl NecrosisMeasurement {
    pub fn lesions_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.lesions).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Truncates vertices to integer pixels inside the image and drops repeats
/// (including an explicit closing vertex).
fn to_vertices(polygon: &[[f32; 2]], width: u32, height: u32) -> Vec<Point<i32>> {
    let max_x = width.saturating_sub(1) as i32;
    let max_y = height.saturating_sub(1) as i32;

    let mut vertices: Vec<Point<i32>> = Vec::with_capacity(polygon.len());
    for [x, y] in polygon {
        let p = Point::new((*x as i32).clamp(0, max_x), (*y as i32).clamp(0, max_y));
        if vertices.last() != Some(&p) {
            vertices.push(p);
        }
    }
    while vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

fn draw_outline<C>(canvas: &mut C, vertices: &[Point<i32>], color: C::Pixel)
where
    C: Canvas,
    C::Pixel: 'static,
{
    for (i, start) in vertices.iter().enumerate() {
        let end = vertices[(i + 1) % vertices.len()];
        draw_line_segment_mut(
            canvas,
            (start.x as f32, start.y as f32),
            (end.x as f32, end.y as f32),
            color,
        );
    }
}

/// Fills the polygon; boundary pixels are included.
fn fill_polygon(mask: &mut GrayImage, vertices: &[Point<i32>]) {
    match vertices {
        [] => {}
        [p] => mask.put_pixel(p.x as u32, p.y as u32, MASK_ON),
        [a, b] => draw_line_segment_mut(mask, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), MASK_ON),
        _ => draw_polygon_mut(mask, vertices, MASK_ON),
    }
}

/// Rasterizes all polygons into one binary mask.
pub fn rasterize<'a>(
    polygons: impl IntoIterator<Item = &'a [[f32; 2]]>,
    width: u32,
    height: u32,
) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for polygon in polygons {
        let vertices = to_vertices(polygon, width, height);
        fill_polygon(&mut mask, &vertices);
    }
    mask
}

pub fn count_non_zero(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p[0] != 0).count() as u64
}

/// Area of the lesion masks as a percentage of the first root mask.
pub fn measure(detections: &[Detection], width: u32, height: u32, classes: ClassIds) -> NecrosisMeasurement {
    let root = detections.iter().find(|d| d.class_id == classes.root);

    let root_area = root
        .map(|r| count_non_zero(&rasterize([r.polygon.as_slice()], width, height)))
        .unwrap_or(0);

    let lesions: Vec<(usize, &Detection)> = detections
        .iter()
        .enumerate()
        .filter(|(_, d)| d.class_id == classes.necrosis)
        .collect();

    let necrosis_mask = rasterize(lesions.iter().map(|(_, d)| d.polygon.as_slice()), width, height);
    let necrosis_area = count_non_zero(&necrosis_mask);

    let percentage = if root_area == 0 {
        warn!(lesions = lesions.len(), "No root region detected, reporting 0% necrosis");
        0.0
    } else {
        necrosis_area as f64 / root_area as f64 * 100.0
    };

    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let normalized = lesions
        .iter()
        .map(|(idx, d)| {
            let points = d.polygon.iter().map(|[x, y]| [x / w, y / h]).collect();
            (idx.to_string(), points)
        })
        .collect();

    NecrosisMeasurement {
        root_area,
        necrosis_area,
        percentage,
        lesion_count: lesions.len(),
        lesions: normalized,
        root_confidence: root.map(|r| r.confidence),
    }
}

/// Draws every lesion outline and the necrosis percentage onto the image.
pub fn annotate(
    image: &mut RgbImage,
    detections: &[Detection],
    classes: ClassIds,
    thickness: u32,
    percentage: f64,
) {
    let (width, height) = image.dimensions();
    let thickness = thickness.max(1) as i32;
    // `thickness` offsets in total, centred on the outline
    let offsets = -(thickness / 2)..(thickness - thickness / 2);

    for detection in detections.iter().filter(|d| d.class_id == classes.necrosis) {
        let vertices = to_vertices(&detection.polygon, width, height);
        if vertices.is_empty() {
            continue;
        }
        for dy in offsets.clone() {
            for dx in offsets.clone() {
                let shifted: Vec<Point<i32>> = vertices
                    .iter()
                    .map(|p| Point::new(p.x + dx, p.y + dy))
                    .collect();
                draw_outline(image, &shifted, OUTLINE_COLOR);
            }
        }
    }

    draw_percentage(image, percentage);
}

/// Writes `<pct>%` in red, starting at the horizontal centre.
fn draw_percentage(image: &mut RgbImage, percentage: f64) {
    let Some(font) = Font::try_from_bytes(LABEL_FONT) else {
        warn!("Label font could not be parsed, skipping percentage label");
        return;
    };

    let x = (image.width() / 2) as i32;
    let y = (LABEL_BASELINE - LABEL_SCALE as i32).max(0);
    draw_text_mut(
        image,
        OUTLINE_COLOR,
        x,
        y,
        Scale::uniform(LABEL_SCALE),
        &font,
        &format!("{:.2}%", percentage),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Vec<[f32; 2]> {
        vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]]
    }

    fn detection(class_id: u32, polygon: Vec<[f32; 2]>) -> Detection {
        Detection { class_id, confidence: 0.9, polygon }
    }

    #[test]
    fn test_rectangle_area_includes_boundary() {
        let square = rect(10.0, 10.0, 29.0, 29.0);
        let mask = rasterize([square.as_slice()], 64, 64);
        assert_eq!(count_non_zero(&mask), 400);
    }

    #[test]
    fn test_triangle_area_is_close_to_geometric() {
        let triangle = vec![[0.0, 0.0], [99.0, 0.0], [0.0, 99.0]];
        let area = count_non_zero(&rasterize([triangle.as_slice()], 100, 100));
        // 99 * 99 / 2 plus the boundary band
        assert!(area > 4900 && area < 5150, "area was {}", area);
    }

    #[test]
    fn test_half_covered_root_is_fifty_percent() {
        let detections = vec![
            detection(0, rect(0.0, 0.0, 99.0, 99.0)),
            detection(1, rect(0.0, 0.0, 49.0, 99.0)),
        ];
        let m = measure(&detections, 100, 100, ClassIds::default());

        assert_eq!(m.root_area, 10_000);
        assert_eq!(m.necrosis_area, 5_000);
        assert!((m.percentage - 50.0).abs() < 1e-9);
        assert_eq!(m.lesion_count, 1);
        assert_eq!(m.root_confidence, Some(0.9));
    }

    #[test]
    fn test_overlapping_lesions_are_counted_once() {
        let detections = vec![
            detection(0, rect(0.0, 0.0, 99.0, 99.0)),
            detection(1, rect(0.0, 0.0, 49.0, 49.0)),
            detection(1, rect(0.0, 0.0, 49.0, 49.0)),
        ];
        let m = measure(&detections, 100, 100, ClassIds::default());

        assert_eq!(m.necrosis_area, 2_500);
        assert_eq!(m.lesion_count, 2);
        assert!((m.percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_first_root_is_used() {
        let detections = vec![
            detection(0, rect(0.0, 0.0, 9.0, 9.0)),
            detection(0, rect(0.0, 0.0, 99.0, 99.0)),
            detection(1, rect(0.0, 0.0, 4.0, 9.0)),
        ];
        let m = measure(&detections, 100, 100, ClassIds::default());
        assert_eq!(m.root_area, 100);
        assert!((m.percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_root_reports_zero() {
        let detections = vec![detection(1, rect(0.0, 0.0, 9.0, 9.0))];
        let m = measure(&detections, 20, 20, ClassIds::default());

        assert_eq!(m.root_area, 0);
        assert_eq!(m.percentage, 0.0);
        assert_eq!(m.lesion_count, 1);
        assert!(m.root_confidence.is_none());
    }

    #[test]
    fn test_lesions_are_normalized_and_keyed_by_index() {
        let detections = vec![
            detection(0, rect(0.0, 0.0, 199.0, 99.0)),
            detection(1, vec![[100.0, 50.0], [150.0, 50.0], [150.0, 75.0]]),
        ];
        let m = measure(&detections, 200, 100, ClassIds::default());

        let lesion = &m.lesions["1"];
        assert_eq!(lesion[0], [0.5, 0.5]);
        assert_eq!(lesion[2], [0.75, 0.75]);
        assert_eq!(m.lesions_json()["1"][1][0], 0.75);
    }

    #[test]
    fn test_degenerate_and_out_of_bounds_polygons() {
        // closing vertex repeated, points outside the canvas
        let polygon = vec![[-5.0, -5.0], [50.0, -5.0], [50.0, 50.0], [-5.0, 50.0], [-5.0, -5.0]];
        let area = count_non_zero(&rasterize([polygon.as_slice()], 20, 20));
        assert_eq!(area, 400);

        let point = vec![[3.0, 3.0]];
        assert_eq!(count_non_zero(&rasterize([point.as_slice()], 10, 10)), 1);

        let empty: Vec<[f32; 2]> = Vec::new();
        assert_eq!(count_non_zero(&rasterize([empty.as_slice()], 10, 10)), 0);
    }

    /// Pixels with any red ink; label glyph edges are antialiased.
    fn red_pixels(image: &RgbImage, xs: std::ops::Range<u32>, ys: std::ops::Range<u32>) -> usize {
        ys.flat_map(|y| xs.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y)[0] > 0)
            .count()
    }

    #[test]
    fn test_annotate_draws_lesion_outline_only() {
        let mut image = RgbImage::new(50, 50);
        let detections = vec![
            detection(0, rect(0.0, 0.0, 49.0, 49.0)),
            detection(1, rect(10.0, 10.0, 30.0, 30.0)),
        ];
        annotate(&mut image, &detections, ClassIds::default(), 2, 0.0);

        assert_eq!(*image.get_pixel(10, 20), OUTLINE_COLOR);
        assert_eq!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(5, 45), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_outline_band_matches_thickness() {
        let mut image = RgbImage::new(100, 100);
        let detections = vec![detection(1, rect(20.0, 20.0, 40.0, 80.0))];
        annotate(&mut image, &detections, ClassIds::default(), 4, 0.0);

        // left edge at x = 20, four columns wide
        let band: Vec<u32> = (10..30).filter(|&x| *image.get_pixel(x, 30) == OUTLINE_COLOR).collect();
        assert_eq!(band, vec![18, 19, 20, 21]);
    }

    #[test]
    fn test_percentage_label_is_drawn() {
        let mut image = RgbImage::new(400, 200);
        annotate(&mut image, &[], ClassIds::default(), 6, 37.5);

        assert!(red_pixels(&image, 200..400, 40..110) > 50);
        assert_eq!(red_pixels(&image, 0..200, 0..200), 0);
        assert_eq!(red_pixels(&image, 200..400, 120..200), 0);
    }
}
