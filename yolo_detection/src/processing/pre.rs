use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::{Array, Ix4};

const PAD_VALUE: u8 = 114;

/// Geometry of an aspect-preserving resize into a square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub orig_width: u32,
    pub orig_height: u32,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn new(orig_width: u32, orig_height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / orig_width as f32)
            .min(input_size as f32 / orig_height as f32);
        let (new_width, new_height) = Self::scaled_dims(orig_width, orig_height, scale);

        Self {
            orig_width,
            orig_height,
            scale,
            offset_x: (input_size.saturating_sub(new_width) / 2) as f32,
            offset_y: (input_size.saturating_sub(new_height) / 2) as f32,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        (w, h)
    }

    pub fn resized_dims(&self) -> (u32, u32) {
        Self::scaled_dims(self.orig_width, self.orig_height, self.scale)
    }

    /// Maps a point in model input space back to original image pixels,
    /// clipped to the image bounds.
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = ((x - self.offset_x) / self.scale).clamp(0., self.orig_width as f32);
        let y = ((y - self.offset_y) / self.scale).clamp(0., self.orig_height as f32);
        (x, y)
    }
}

/// Letterboxes `image` into a `1x3xSxS` tensor normalized to `[0, 1]`.
pub fn letterbox(image: &DynamicImage, input_size: u32) -> (Array<f32, Ix4>, Letterbox) {
    let (img_width, img_height) = image.dimensions();
    let geometry = Letterbox::new(img_width, img_height, input_size);
    let (new_width, new_height) = geometry.resized_dims();

    let resized = image
        .resize_exact(new_width, new_height, FilterType::Triangle)
        .to_rgb8();
    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([PAD_VALUE; 3]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        geometry.offset_x as i64,
        geometry.offset_y as i64,
    );

    let size = input_size as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    #[test]
    fn test_letterbox_wide_image() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(200, 100, Rgb([255, 0, 0]));
        let (input, geometry) = letterbox(&DynamicImage::ImageRgb8(img), 640);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(geometry.scale, 3.2);
        assert_eq!(geometry.offset_x, 0.);
        assert_eq!(geometry.offset_y, 160.);

        // padding rows stay grey, image rows carry the red channel
        assert!((input[[0, 0, 10, 320]] - 114. / 255.).abs() < 1e-6);
        assert!((input[[0, 0, 320, 320]] - 1.).abs() < 1e-6);
        assert!(input[[0, 1, 320, 320]].abs() < 1e-6);
    }

    #[test]
    fn test_to_original_inverts_letterbox() {
        let geometry = Letterbox::new(100, 200, 640);
        assert_eq!(geometry.scale, 3.2);
        assert_eq!(geometry.offset_x, 160.);

        let (x, y) = geometry.to_original(160. + 32., 64.);
        assert!((x - 10.).abs() < 1e-4);
        assert!((y - 20.).abs() < 1e-4);
    }

    #[test]
    fn test_to_original_clips_to_image() {
        let geometry = Letterbox::new(100, 100, 640);
        assert_eq!(geometry.to_original(-50., 700.), (0., 100.));
    }
}
