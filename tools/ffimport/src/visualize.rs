//! Sort visualisation: tinted tile rectangles over the rendered scene.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ffimport_core::tiles::PixelRect;
use ffimport_core::{Classification, GridLayout, TileStatus};
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tracing::{info, warn};

/// Longest edge of the saved preview.
const PREVIEW_EDGE: u32 = 1000;

/// Fill colour per status, blended at 50 %.
fn tint(status: TileStatus) -> [u8; 3] {
    match status {
        TileStatus::NoWater => [0, 255, 0],
        TileStatus::TooCloudy => [255, 255, 255],
        TileStatus::Accepted => [0, 0, 255],
    }
}

/// Half-alpha blend of `colour` into every pixel of `rect`, clipped to the image.
fn blend_rect(img: &mut RgbImage, rect: PixelRect, colour: [u8; 3]) {
    let x1 = rect.x1.min(img.width());
    let y1 = rect.y1.min(img.height());
    for y in rect.y0.min(y1)..y1 {
        for x in rect.x0.min(x1)..x1 {
            let Rgb(px) = img.get_pixel_mut(x, y);
            for (c, t) in px.iter_mut().zip(colour) {
                // Mean of two u8 values always fits back into u8.
                *c = ((u16::from(*c) + u16::from(t)) / 2) as u8;
            }
        }
    }
}

/// Load the rendered scene, or a black canvas of scene size if none exists.
fn base_image(candidates: &[PathBuf], (width, height): (u32, u32)) -> Result<RgbImage> {
    match candidates.iter().find(|p| p.is_file()) {
        Some(path) => {
            let img = image::open(path).with_context(|| format!("Cannot decode {}", path.display()))?;
            Ok(img.into_rgb8())
        }
        None => {
            warn!("no rendered scene found, drawing on a blank canvas");
            Ok(RgbImage::new(width, height))
        }
    }
}

/// Paint every classified tile and return the composited image at full size.
pub fn render(base: RgbImage, layout: GridLayout, classification: &Classification) -> Result<RgbImage> {
    let mut img = base;
    for (tile, status) in classification.statuses() {
        let addr = layout.locate_file(tile)?;
        blend_rect(&mut img, layout.pixel_rect(addr), tint(status));
    }
    Ok(img)
}

/// Draw the sort outcome and save it, shrunk to fit 1000×1000.
pub fn write_visualization(
    scratch: &Path,
    scene_size: (u32, u32),
    layout: GridLayout,
    classification: &Classification,
    dest: &Path,
) -> Result<()> {
    let candidates = [scratch.join("render.tif"), scratch.join("render.png")];
    let base = base_image(&candidates, scene_size)?;
    let img = render(base, layout, classification)?;
    let preview = if img.width() > PREVIEW_EDGE || img.height() > PREVIEW_EDGE {
        image::DynamicImage::ImageRgb8(img)
            .resize(PREVIEW_EDGE, PREVIEW_EDGE, FilterType::Triangle)
            .into_rgb8()
    } else {
        img
    };
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    preview.save(dest).with_context(|| format!("Cannot write {}", dest.display()))?;
    info!(path = %dest.display(), "sort visualisation written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification() -> Classification {
        Classification {
            accepted: vec!["tile_0000.png".into()],
            no_water: vec!["tile_0001.png".into()],
            too_cloudy: vec!["tile_0003.png".into()],
        }
    }

    #[test]
    fn rectangles_are_tinted_by_status() {
        // 20 px wide, grid 10: three tiles per row including the phantom column.
        let layout = GridLayout::new(20, 10);
        let img = render(RgbImage::new(20, 20), layout, &classification()).unwrap();
        assert_eq!(img.get_pixel(5, 5).0, [0, 0, 127], "accepted tile is blue");
        assert_eq!(img.get_pixel(15, 5).0, [0, 127, 0], "no-water tile is green");
        // tile 3 is row 1, column 0
        assert_eq!(img.get_pixel(5, 15).0, [127, 127, 127], "cloudy tile is white");
        assert_eq!(img.get_pixel(15, 15).0, [0, 0, 0], "unclassified tile untouched");
    }

    #[test]
    fn rectangles_past_the_edge_are_clipped() {
        let layout = GridLayout::new(15, 10);
        let c = Classification { accepted: vec!["tile_0001.png".into()], ..Classification::default() };
        let img = render(RgbImage::new(15, 15), layout, &c).unwrap();
        assert_eq!(img.get_pixel(14, 9).0, [0, 0, 127]);
        assert_eq!(img.get_pixel(14, 10).0, [0, 0, 0]);
    }

    #[test]
    fn white_over_white_stays_white() {
        let layout = GridLayout::new(10, 10);
        let c = Classification { too_cloudy: vec!["tile_0000.png".into()], ..Classification::default() };
        let base = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        let img = render(base, layout, &c).unwrap();
        assert_eq!(img.get_pixel(9, 9).0, [255, 255, 255]);
    }

    #[test]
    fn large_scenes_are_shrunk_to_preview() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("scene_tiles/sort_visualization.png");
        let layout = GridLayout::new(2000, 400);
        write_visualization(dir.path(), (2000, 1000), layout, &classification(), &dest).unwrap();
        let (w, h) = image::image_dimensions(&dest).unwrap();
        assert_eq!((w, h), (1000, 500));
    }
}
