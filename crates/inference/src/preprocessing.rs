use crate::config::CropRegion;
use common::span;
use image::RgbImage;
use ndarray::{Array, IxDyn};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub struct PreProcessor {
    pub crop: CropRegion,
}

impl PreProcessor {
    pub fn new(crop: CropRegion) -> Self {
        Self { crop }
    }

    /// Crop the configured region and lay it out as a normalized
    /// `[1, 3, crop.height, crop.width]` tensor.
    pub fn preprocess_frame(&self, image: &RgbImage) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("preprocess_frame");

        let CropRegion {
            x,
            y,
            width,
            height,
        } = self.crop;

        let fits = x.checked_add(width).is_some_and(|right| right <= image.width())
            && y.checked_add(height).is_some_and(|bottom| bottom <= image.height());
        if !fits {
            anyhow::bail!(
                "Frame of {}x{} does not contain crop region {}x{} at ({}, {})",
                image.width(),
                image.height(),
                width,
                height,
                x,
                y
            );
        }

        let cropped = image::imageops::crop_imm(image, x, y, width, height).to_image();
        Self::normalize(&cropped)
    }

    fn normalize(image: &RgbImage) -> anyhow::Result<Array<f32, IxDyn>> {
        let _s = span!("normalize");

        let width = image.width() as usize;
        let height = image.height() as usize;
        let spatial = width * height;

        let mut output = vec![0.0f32; 3 * spatial];

        for (i, px) in image.as_raw().chunks_exact(3).enumerate() {
            let r = px[0] as f32 / 255.0;
            let g = px[1] as f32 / 255.0;
            let b = px[2] as f32 / 255.0;

            output[i] = (r - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
            output[i + spatial] = (g - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
            output[i + 2 * spatial] = (b - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        }

        Ok(Array::from_shape_vec(
            IxDyn(&[1, 3, height, width]),
            output,
        )?)
    }
}

impl Default for PreProcessor {
    fn default() -> Self {
        Self::new(CropRegion::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    /// Test output layout for the default camera crop
    #[test]
    fn test_default_crop_shape() {
        let image = RgbImage::from_pixel(1280, 720, Rgb([128, 128, 128]));

        let output = PreProcessor::default().preprocess_frame(&image).unwrap();

        assert_eq!(output.shape(), &[1, 3, 480, 640]);
    }

    /// Test that the crop takes pixels from the configured offset
    #[test]
    fn test_crop_offset() {
        let mut image = RgbImage::from_pixel(8, 6, Rgb([0, 0, 0]));
        image.put_pixel(3, 2, Rgb([255, 255, 255]));

        let preprocessor = PreProcessor::new(CropRegion {
            x: 3,
            y: 2,
            width: 4,
            height: 3,
        });
        let output = preprocessor.preprocess_frame(&image).unwrap();

        assert_eq!(output.shape(), &[1, 3, 3, 4]);
        let white_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let black_r = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((output[[0, 0, 0, 0]] - white_r).abs() < 1e-5);
        assert!((output[[0, 0, 0, 1]] - black_r).abs() < 1e-5);
    }

    /// Test frames smaller than the crop region are rejected
    #[test]
    fn test_frame_too_small_for_crop() {
        let image = RgbImage::new(640, 480);

        let result = PreProcessor::default().preprocess_frame(&image);

        assert!(result.is_err(), "640x480 cannot hold a 640x480 crop at (320, 120)");
        assert!(result.unwrap_err().to_string().contains("crop region"));
    }

    /// Test ImageNet normalization is applied per channel
    #[test]
    fn test_imagenet_normalization() {
        let image = RgbImage::from_pixel(2, 2, Rgb([128, 128, 128]));
        let preprocessor = PreProcessor::new(CropRegion {
            x: 0,
            y: 0,
            width: 2,
            height: 2,
        });

        let output = preprocessor.preprocess_frame(&image).unwrap();

        // For gray 128 (0.502):
        //   R: (0.502 - 0.485) / 0.229 ≈ 0.074
        //   G: (0.502 - 0.456) / 0.224 ≈ 0.205
        //   B: (0.502 - 0.406) / 0.225 ≈ 0.427
        let r = output[[0, 0, 1, 1]];
        let g = output[[0, 1, 1, 1]];
        let b = output[[0, 2, 1, 1]];

        assert!((r - 0.074).abs() < 0.01, "R channel should be ~0.074 (got {})", r);
        assert!((g - 0.205).abs() < 0.01, "G channel should be ~0.205 (got {})", g);
        assert!((b - 0.427).abs() < 0.01, "B channel should be ~0.427 (got {})", b);
    }
}
