//! Connected-blob extraction from binary masks.
//!
//! Only outermost borders are considered (holes and nested blobs are ignored),
//! which is what both the button segmentation and the shape heuristics want.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;

use crate::{Point, Region};

/// Geometry of one external contour.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub bounds: Region,
    /// Polygon area enclosed by the border points (shoelace).
    pub area: f64,
    /// Closed arc length of the border.
    pub perimeter: f64,
    /// `4π·area / perimeter²`; 1.0 for a perfect disc, 0.0 when degenerate.
    pub circularity: f64,
    /// Border pixels in tracing order.
    pub points: Vec<Point>,
}

/// Morphological close (dilate then erode) with a `size`×`size` square.
pub fn close(mask: &GrayImage, size: u8) -> GrayImage {
    imageproc::morphology::close(mask, Norm::LInf, size / 2)
}

/// Morphological open (erode then dilate) with a `size`×`size` square.
pub fn open(mask: &GrayImage, size: u8) -> GrayImage {
    imageproc::morphology::open(mask, Norm::LInf, size / 2)
}

/// External contours of the foreground (non-zero) pixels, in discovery order.
pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
    let mut blobs = Vec::new();

    for c in find_contours::<i32>(mask) {
        if c.border_type != BorderType::Outer || c.parent.is_some() || c.points.is_empty() {
            continue;
        }

        let mut min_x = i32::MAX;
        let mut min_y = i32::MAX;
        let mut max_x = i32::MIN;
        let mut max_y = i32::MIN;
        for p in &c.points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        if min_x < 0 || min_y < 0 {
            continue;
        }

        let points = c
            .points
            .iter()
            .map(|p| (p.x as f64, p.y as f64))
            .collect::<Vec<_>>();
        let area = polygon_area(&points);
        let perimeter = closed_length(&points);
        let circularity = if perimeter > 0.0 {
            4.0 * std::f64::consts::PI * area / (perimeter * perimeter)
        } else {
            0.0
        };

        blobs.push(Blob {
            bounds: Region::new(
                min_x as u32,
                min_y as u32,
                (max_x - min_x + 1) as u32,
                (max_y - min_y + 1) as u32,
            ),
            area,
            perimeter,
            circularity,
            points: c.points.iter().map(|p| Point::new(p.x as u32, p.y as u32)).collect(),
        });
    }

    blobs
}

fn polygon_area(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice = (0..n)
        .map(|i| {
            let (x1, y1) = points[i];
            let (x2, y2) = points[(i + 1) % n];
            x1 * y2 - x2 * y1
        })
        .sum::<f64>();
    twice.abs() / 2.0
}

fn closed_length(points: &[(f64, f64)]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let (x1, y1) = points[i];
            let (x2, y2) = points[(i + 1) % n];
            (x2 - x1).hypot(y2 - y1)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    #[test]
    fn square_blob_geometry() {
        let mut mask = GrayImage::new(200, 200);
        draw_filled_rect_mut(&mut mask, Rect::at(20, 30).of_size(100, 50), image::Luma([255]));

        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 1);
        let b = &blobs[0];
        assert_eq!(b.bounds, Region::new(20, 30, 100, 50));
        // The border runs through pixel centres, so the enclosed polygon is 99x49.
        assert!((b.area - 99.0 * 49.0).abs() < 1.0, "area {}", b.area);
        assert!((b.perimeter - 2.0 * (99.0 + 49.0)).abs() < 1.0, "perimeter {}", b.perimeter);
    }

    #[test]
    fn discs_are_rounder_than_bars() {
        let mut mask = GrayImage::new(300, 200);
        draw_filled_circle_mut(&mut mask, (60, 100), 40, image::Luma([255]));
        draw_filled_rect_mut(&mut mask, Rect::at(150, 95).of_size(140, 8), image::Luma([255]));

        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 2);
        let disc = blobs.iter().find(|b| b.bounds.x < 150).expect("disc");
        let bar = blobs.iter().find(|b| b.bounds.x >= 150).expect("bar");
        assert!(disc.circularity > 0.8, "disc {}", disc.circularity);
        assert!(bar.circularity < 0.3, "bar {}", bar.circularity);
    }

    #[test]
    fn holes_are_not_blobs() {
        let mut mask = GrayImage::new(100, 100);
        draw_filled_rect_mut(&mut mask, Rect::at(10, 10).of_size(80, 80), image::Luma([255]));
        draw_filled_rect_mut(&mut mask, Rect::at(30, 30).of_size(40, 40), image::Luma([0]));
        draw_filled_rect_mut(&mut mask, Rect::at(45, 45).of_size(10, 10), image::Luma([255]));

        let blobs = find_blobs(&mask);
        assert_eq!(blobs.len(), 1);
        assert_eq!(blobs[0].bounds, Region::new(10, 10, 80, 80));
    }

    #[test]
    fn close_bridges_small_gaps() {
        let mut mask = GrayImage::new(100, 40);
        draw_filled_rect_mut(&mut mask, Rect::at(10, 10).of_size(30, 20), image::Luma([255]));
        draw_filled_rect_mut(&mut mask, Rect::at(43, 10).of_size(30, 20), image::Luma([255]));
        assert_eq!(find_blobs(&mask).len(), 2);
        assert_eq!(find_blobs(&close(&mask, 7)).len(), 1);
    }
}
