//! 画面渲染: 显示模式 → 标注 (计数线/中心点/ID) → JPEG 编码

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut};
use imageproc::edges::canny;
use imageproc::rect::Rect;
use tracing::{info, warn};

use super::frame_buffer::EncodedFrame;
use crate::config::{CounterConfig, DisplayMode};
use crate::detection::Detection;
use crate::error::EncodingFailure;
use crate::input::Frame;

const LINE_COLOR: Rgb<u8> = Rgb([0, 0, 255]); // 蓝色
const LINE_THICKNESS: u32 = 2;
const DOT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const DOT_RADIUS: i32 = 4;
const LABEL_SCALE: f32 = 16.0;

/// 未配置字体时尝试的系统字体
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 检测帧的标注内容
#[derive(Clone, Copy, Debug)]
pub struct Overlay<'a> {
    pub detections: &'a [Detection],
    pub line_x: i32,
}

pub struct FrameRenderer {
    mode: DisplayMode,
    jpeg_quality: u8,
    font: Option<FontVec>,
}

impl FrameRenderer {
    pub fn new(mode: DisplayMode, jpeg_quality: u8) -> Self {
        Self {
            mode,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    /// 按配置创建; 字体加载失败只影响ID标签
    pub fn from_config(config: &CounterConfig) -> Self {
        let renderer = Self::new(config.display_mode, config.jpeg_quality);

        let candidates: Vec<PathBuf> = match &config.font_path {
            Some(path) => vec![path.clone()],
            None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
        };
        for path in &candidates {
            if !path.exists() {
                continue;
            }
            match load_font(path) {
                Ok(font) => {
                    info!(font = %path.display(), "🔤 ID标签字体已加载");
                    return renderer.with_font(font);
                }
                Err(e) => warn!(font = %path.display(), error = %e, "⚠️ 字体加载失败"),
            }
        }

        if config.font_path.is_some() {
            warn!("⚠️ 配置的字体不可用, 不绘制ID标签");
        } else {
            info!("未找到系统字体, 不绘制ID标签");
        }
        renderer
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 渲染并编码一帧; `overlay` 为 None 时画面不做标注
    pub fn render(
        &self,
        frame: Frame,
        overlay: Option<Overlay<'_>>,
    ) -> Result<EncodedFrame, EncodingFailure> {
        let sequence = frame.sequence;
        let mut image = apply_mode(frame.image, self.mode);
        if let Some(overlay) = overlay {
            self.annotate(&mut image, overlay);
        }

        let jpeg = encode_jpeg(&image, self.jpeg_quality)?;
        Ok(EncodedFrame {
            jpeg,
            sequence,
            width: image.width(),
            height: image.height(),
        })
    }

    /// 中心点 + ID标签 + 竖直计数线
    pub fn annotate(&self, image: &mut RgbImage, overlay: Overlay<'_>) {
        let (w, h) = (image.width() as i32, image.height() as i32);
        for det in overlay.detections {
            let c = det.centroid();
            // 画面外的中心点不绘制
            if c.x < 0 || c.y < 0 || c.x >= w || c.y >= h {
                continue;
            }
            draw_filled_circle_mut(image, (c.x, c.y), DOT_RADIUS, DOT_COLOR);

            if let Some(font) = &self.font {
                let label = format!("ID {}", det.track_id);
                let top = c.y - 5 - LABEL_SCALE as i32;
                draw_text_mut(
                    image,
                    DOT_COLOR,
                    c.x + 5,
                    top,
                    PxScale::from(LABEL_SCALE),
                    font,
                    &label,
                );
            }
        }

        let height = image.height();
        if height > 0 {
            draw_filled_rect_mut(
                image,
                Rect::at(overlay.line_x - (LINE_THICKNESS as i32) / 2, 0)
                    .of_size(LINE_THICKNESS, height),
                LINE_COLOR,
            );
        }
    }
}

pub fn load_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

/// 显示模式转换 (结果仍为 RGB)
pub fn apply_mode(image: RgbImage, mode: DisplayMode) -> RgbImage {
    match mode {
        DisplayMode::Normal => image,
        DisplayMode::Grayscale => {
            DynamicImage::ImageLuma8(imageops::grayscale(&image)).to_rgb8()
        }
        DisplayMode::Edges => {
            let gray = imageops::grayscale(&image);
            DynamicImage::ImageLuma8(canny(&gray, 50.0, 150.0)).to_rgb8()
        }
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodingFailure> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EncodingFailure::EmptyFrame);
    }
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(image)?;
    Ok(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BBox;

    fn gray_frame(w: u32, h: u32) -> Frame {
        Frame::new(RgbImage::from_pixel(w, h, Rgb([90, 90, 90])), 1)
    }

    #[test]
    fn annotate_draws_line_and_centroid() {
        let renderer = FrameRenderer::new(DisplayMode::Normal, 90);
        let mut image = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        let dets = vec![Detection::new(3, "person", BBox::new(4.0, 4.0, 16.0, 20.0))];
        renderer.annotate(
            &mut image,
            Overlay {
                detections: &dets,
                line_x: 32,
            },
        );

        assert_eq!(*image.get_pixel(32, 0), LINE_COLOR);
        assert_eq!(*image.get_pixel(31, 31), LINE_COLOR);
        assert_eq!(*image.get_pixel(10, 12), DOT_COLOR);
        assert_eq!(*image.get_pixel(50, 12), Rgb([0, 0, 0]));
    }

    #[test]
    fn annotate_skips_centroids_outside_the_image() {
        let renderer = FrameRenderer::new(DisplayMode::Normal, 90);
        let mut image = RgbImage::from_pixel(64, 32, Rgb([0, 0, 0]));
        let dets = vec![
            Detection::new(1, "person", BBox::new(3.0e9, 0.0, 3.0e9, 10.0)),
            Detection::new(2, "person", BBox::new(f32::NEG_INFINITY, 0.0, -50.0, 10.0)),
        ];
        renderer.annotate(
            &mut image,
            Overlay {
                detections: &dets,
                line_x: 32,
            },
        );

        assert_eq!(*image.get_pixel(32, 0), LINE_COLOR);
        assert_eq!(*image.get_pixel(63, 5), Rgb([0, 0, 0]));
        assert_eq!(*image.get_pixel(0, 5), Rgb([0, 0, 0]));
    }

    #[test]
    fn render_produces_decodable_jpeg() {
        let renderer = FrameRenderer::new(DisplayMode::Normal, 80);
        let encoded = renderer.render(gray_frame(40, 30), None).unwrap();
        assert_eq!((encoded.width, encoded.height), (40, 30));

        let decoded = image::load_from_memory(&encoded.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 30));
    }

    #[test]
    fn grayscale_mode_equalizes_channels() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 10, 60]));
        let gray = apply_mode(image, DisplayMode::Grayscale);
        let p = gray.get_pixel(1, 1);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
    }

    #[test]
    fn edges_mode_keeps_size() {
        let out = apply_mode(RgbImage::new(20, 10), DisplayMode::Edges);
        assert_eq!(out.dimensions(), (20, 10));
    }

    #[test]
    fn empty_frame_is_an_encoding_failure() {
        assert!(matches!(
            encode_jpeg(&RgbImage::new(0, 0), 80),
            Err(EncodingFailure::EmptyFrame)
        ));
    }
}
