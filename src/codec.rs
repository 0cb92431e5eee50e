use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use image::{DynamicImage, GenericImageView};
use mozjpeg::{ColorSpace, Compress, ScanMode};
use oxipng::{Deflaters, Options, StripChunks, optimize_from_memory};

use crate::error::CodecError;
use crate::profile::{CodecProfile, PNG_MAX_EFFORT};

/// Boundary to the image codec library.
pub trait ImageCodec: Send + Sync {
    /// Returns the encoded format tag read from the payload header, if any.
    fn inspect(&self, bytes: &[u8]) -> Option<String>;

    /// Re-encodes `bytes` according to `profile`, keeping the format.
    fn encode(&self, bytes: &[u8], profile: &CodecProfile) -> Result<Vec<u8>, CodecError>;
}

/// Codec stack backed by `image`, `mozjpeg`, `imagequant`, `oxipng` and `webp`.
#[derive(Debug, Clone)]
pub struct NativeCodec {
    png_optimize_timeout: Duration,
}

impl NativeCodec {
    pub fn new(png_optimize_timeout: Duration) -> Self {
        Self {
            png_optimize_timeout,
        }
    }

    fn decode(&self, bytes: &[u8], profile: &CodecProfile) -> Result<DynamicImage, CodecError> {
        Ok(image::load_from_memory_with_format(bytes, profile.image_format())?)
    }

    fn compress_jpeg(
        &self,
        img: &DynamicImage,
        quality: u8,
    ) -> Result<Vec<u8>, CodecError> {
        let rgb_img = img.to_rgb8();
        let (width, height) = (rgb_img.width() as usize, rgb_img.height() as usize);

        // libjpeg reports errors by unwinding
        let encoded = panic::catch_unwind(AssertUnwindSafe(|| -> std::io::Result<Vec<u8>> {
            let mut comp = Compress::new(ColorSpace::JCS_RGB);
            comp.set_size(width, height);
            comp.set_quality(quality as f32);
            comp.set_progressive_mode();
            comp.set_scan_optimization_mode(ScanMode::AllComponentsTogether);
            comp.set_optimize_coding(true);
            comp.set_optimize_scans(true);

            let mut writer = comp.start_compress(Vec::new())?;
            writer.write_scanlines(rgb_img.as_raw())?;
            writer.finish()
        }));

        match encoded {
            Ok(Ok(buffer)) => Ok(buffer),
            Ok(Err(err)) => Err(CodecError::Jpeg(err.to_string())),
            Err(payload) => Err(CodecError::Jpeg(panic_message(payload.as_ref()))),
        }
    }

    fn compress_png(&self, img: &DynamicImage, effort: u8) -> Result<Vec<u8>, CodecError> {
        let (width, height) = img.dimensions();
        let buffer = self.write_indexed_png(img)?;

        if effort == 0 {
            return Ok(buffer);
        }

        let mut options = Options::from_preset(oxipng_preset(effort));
        options.deflate = Deflaters::Libdeflater { compression: effort };
        options.optimize_alpha = true;
        options.strip = StripChunks::Safe;
        options.timeout = Some(self.png_optimize_timeout);

        tracing::trace!(width, height, effort, "optimizing PNG");

        optimize_from_memory(&buffer, &options).map_err(|e| CodecError::PngOptimize(e.to_string()))
    }

    fn write_indexed_png(&self, img: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        let rgba = img.to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());

        let pixels: Vec<imagequant::RGBA> = rgba
            .pixels()
            .map(|p| imagequant::RGBA::new(p[0], p[1], p[2], p[3]))
            .collect();

        let attr = imagequant::new();
        let mut liq_img = attr
            .new_image(pixels, width as usize, height as usize, 0.0)
            .map_err(|e| CodecError::Quantize(e.to_string()))?;
        let mut quantized = attr
            .quantize(&mut liq_img)
            .map_err(|e| CodecError::Quantize(e.to_string()))?;
        quantized
            .set_dithering_level(1.0)
            .map_err(|e| CodecError::Quantize(e.to_string()))?;
        let (palette, indices) = quantized
            .remapped(&mut liq_img)
            .map_err(|e| CodecError::Quantize(e.to_string()))?;

        let rgb_palette: Vec<u8> = palette.iter().flat_map(|c| [c.r, c.g, c.b]).collect();
        let alpha: Vec<u8> = palette.iter().map(|c| c.a).collect();

        let mut buffer = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buffer, width, height);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_compression(png::Compression::Fast);
            encoder.set_palette(rgb_palette);
            if alpha.iter().any(|a| *a < u8::MAX) {
                encoder.set_trns(alpha);
            }

            let mut writer = encoder.write_header()?;
            writer.write_image_data(&indices)?;
            writer.finish()?;
        }

        Ok(buffer)
    }

    fn compress_webp(&self, img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
        let (width, height) = img.dimensions();

        let encoded = if img.color().has_alpha() {
            let rgba = img.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), width, height)
                .encode_simple(false, quality as f32)
                .map(|memory| memory.to_vec())
        } else {
            let rgb = img.to_rgb8();
            webp::Encoder::from_rgb(rgb.as_raw(), width, height)
                .encode_simple(false, quality as f32)
                .map(|memory| memory.to_vec())
        };

        encoded.map_err(|e| CodecError::WebP(format!("{e:?}")))
    }
}

impl ImageCodec for NativeCodec {
    fn inspect(&self, bytes: &[u8]) -> Option<String> {
        image::guess_format(bytes)
            .ok()
            .map(|format| format!("{:?}", format).to_lowercase())
    }

    fn encode(&self, bytes: &[u8], profile: &CodecProfile) -> Result<Vec<u8>, CodecError> {
        let img = self.decode(bytes, profile)?;

        match *profile {
            CodecProfile::Jpeg { quality } => self.compress_jpeg(&img, quality),
            CodecProfile::Png { effort } => self.compress_png(&img, effort),
            CodecProfile::WebP { quality } => self.compress_webp(&img, quality),
        }
    }
}

/// Scales the effort level onto oxipng's 0-6 preset range.
fn oxipng_preset(effort: u8) -> u8 {
    ((effort as u16 * 6 + PNG_MAX_EFFORT as u16 / 2) / PNG_MAX_EFFORT as u16) as u8
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "encoder panicked".to_string()
    }
}
