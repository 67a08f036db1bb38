// THEORY:
// A visual check of the linker: draw each frame's box of the selected tube onto the
// frame itself so the track can be eyeballed. Drawing is clamped to the image, so a
// box partly or fully outside the frame never panics.

use image::{ImageEncoder, Rgba, RgbaImage};
use std::path::Path;

use crate::core_modules::bbox::BBox;
use crate::core_modules::proposal::Tube;
use crate::error::{LinkError, LinkResult};

/// Draws a one-pixel outline of `bbox` onto `image`.
pub fn draw_box(image: &mut RgbaImage, bbox: &BBox, color: Rgba<u8>) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    let left = bbox.x0.min(bbox.x1);
    let right = bbox.x0.max(bbox.x1);
    let top = bbox.y0.min(bbox.y1);
    let bottom = bbox.y0.max(bbox.y1);

    // Entirely off the image.
    if right < 0.0 || bottom < 0.0 || left > max_x || top > max_y {
        return;
    }

    let x0 = left.max(0.0).round() as u32;
    let x1 = right.min(max_x).round() as u32;
    let y0 = top.max(0.0).round() as u32;
    let y1 = bottom.min(max_y).round() as u32;

    for x in x0..=x1 {
        image.put_pixel(x, y0, color);
        image.put_pixel(x, y1, color);
    }
    for y in y0..=y1 {
        image.put_pixel(x0, y, color);
        image.put_pixel(x1, y, color);
    }
}

/// Draws the tube's box for frame `t` onto `frames[t]`.
pub fn draw_tube(frames: &mut [RgbaImage], tube: &Tube, color: Rgba<u8>) -> LinkResult<()> {
    if frames.len() != tube.len() {
        return Err(LinkError::InvalidConfiguration(format!(
            "{} frames supplied for a tube of length {}",
            frames.len(),
            tube.len()
        )));
    }
    for (frame, bbox) in frames.iter_mut().zip(tube.boxes()) {
        draw_box(frame, bbox, color);
    }
    Ok(())
}

/// Writes an RGBA frame as PNG.
pub fn save(path: &Path, image: &RgbaImage) -> Result<(), image::error::ImageError> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(image.as_raw(), image.width(), image.height(), image::ExtendedColorType::Rgba8)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::proposal::{Clip, Proposal};

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    #[test]
    fn outline_is_drawn_and_interior_untouched() {
        let mut image = RgbaImage::new(20, 20);
        draw_box(&mut image, &BBox::new(2.0, 3.0, 10.0, 12.0), RED);
        assert_eq!(*image.get_pixel(2, 3), RED);
        assert_eq!(*image.get_pixel(10, 12), RED);
        assert_eq!(*image.get_pixel(6, 3), RED);
        assert_eq!(*image.get_pixel(2, 8), RED);
        assert_eq!(*image.get_pixel(6, 8), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() {
        let mut image = RgbaImage::new(8, 8);
        draw_box(&mut image, &BBox::new(-5.0, -5.0, 50.0, 50.0), RED);
        assert_eq!(*image.get_pixel(0, 0), RED);
        assert_eq!(*image.get_pixel(7, 7), RED);

        let mut untouched = RgbaImage::new(8, 8);
        draw_box(&mut untouched, &BBox::new(100.0, 100.0, 120.0, 120.0), RED);
        assert!(untouched.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn tube_needs_one_frame_per_box() {
        let clip = Clip::new(vec![
            vec![Proposal::new(BBox::new(1.0, 1.0, 4.0, 4.0), 0.5)],
            vec![Proposal::new(BBox::new(2.0, 2.0, 5.0, 5.0), 0.5)],
        ]);
        let tube = clip.tube(&[0, 0]);

        let mut one = vec![RgbaImage::new(8, 8)];
        assert!(draw_tube(&mut one, &tube, RED).is_err());

        let mut two = vec![RgbaImage::new(8, 8), RgbaImage::new(8, 8)];
        draw_tube(&mut two, &tube, RED).unwrap();
        assert_eq!(*two[0].get_pixel(1, 1), RED);
        assert_eq!(*two[1].get_pixel(2, 2), RED);
        assert_eq!(*two[1].get_pixel(1, 1), Rgba([0, 0, 0, 0]));
    }
}
