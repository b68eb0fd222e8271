// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/output/draw.rs - 检测结果与人数可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::info;

use crate::{
  model::{DetectItem, DetectResult},
  output::OutputError,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: i32 = 2;

// 左上角人数统计
pub const SUMMARY_ORIGIN: (i32, i32) = (10, 10);
const SUMMARY_FONT_SIZE: f32 = 28.0;
const SUMMARY_TEXT_HEIGHT: i32 = 34;
const SUMMARY_CHAR_WIDTH: f32 = 15.0;
const SUMMARY_BACKGROUND: [u8; 3] = [0, 0, 0];
const SUMMARY_TEXT_COLOR: [u8; 3] = [255, 0, 0]; // 红色

// 内置字体，可用 --font 覆盖
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

/// 检测框标签的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMode {
  /// 类别名与置信度，例如 `person 0.87`
  Class,
  /// 跟踪编号，例如 `ID: 3`
  Track,
}

impl LabelMode {
  fn label(&self, item: &DetectItem) -> String {
    match (self, item.track_id) {
      (LabelMode::Track, Some(id)) => format!("ID: {}", id),
      _ => format!("{} {:.2}", item.label(), item.score),
    }
  }
}

pub fn summary_caption(count: u32) -> String {
  format!("Crowd Count: {}", count)
}

/// 标注器。默认使用内置字体；没有字体时只绘制边框与文字背景。
#[derive(Clone)]
pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontArc>,
  box_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: FontArc::try_from_slice(DEFAULT_FONT).ok(),
      box_color: BOX_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font(font: FontArc) -> Self {
    Self {
      font: Some(font),
      ..Self::default()
    }
  }

  pub fn from_font_file(path: &Path) -> Result<Self, OutputError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data)
      .map_err(|e| OutputError::FontLoad(format!("{}: {}", path.display(), e)))?;
    info!("加载字体: {}", path.display());
    Ok(Self::with_font(font))
  }

  /// 绘制每个检测框及其标签
  pub fn annotate(&self, mut image: RgbImage, result: &DetectResult, mode: LabelMode) -> RgbImage {
    for item in result.iter() {
      let label = mode.label(item);
      self.draw_bbox_with_label(&mut image, &item.bbox, &label);
    }
    image
  }

  /// 在左上角固定位置绘制 `Crowd Count: n`
  pub fn overlay_summary(&self, mut image: RgbImage, count: u32) -> RgbImage {
    let caption = summary_caption(count);
    let (x, y) = SUMMARY_ORIGIN;
    let max_width = (image.width() as i32 - x).max(0);
    let max_height = (image.height() as i32 - y).max(0);
    let width = ((caption.len() as f32 * SUMMARY_CHAR_WIDTH) as i32).min(max_width);
    let height = SUMMARY_TEXT_HEIGHT.min(max_height);
    if width <= 0 || height <= 0 {
      return image;
    }

    let rect = Rect::at(x, y).of_size(width as u32, height as u32);
    draw_filled_rect_mut(&mut image, rect, Rgb(SUMMARY_BACKGROUND));
    if let Some(font) = &self.font {
      draw_text_mut(
        &mut image,
        Rgb(SUMMARY_TEXT_COLOR),
        x,
        y + self.label_text_vertical_padding,
        PxScale::from(SUMMARY_FONT_SIZE),
        font,
        &caption,
      );
    }
    image
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let color = Rgb(self.box_color);

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框由外向内加粗
    for thickness in 0..BOX_THICKNESS {
      let x_min_t = (x_min + thickness).min(x_max);
      let y_min_t = (y_min + thickness).min(y_max);
      let x_max_t = (x_max - thickness).max(x_min);
      let y_max_t = (y_max - thickness).max(y_min);

      for x in x_min_t..=x_max_t {
        image.put_pixel(x as u32, y_min_t as u32, color);
        image.put_pixel(x as u32, y_max_t as u32, color);
      }
      for y in y_min_t..=y_max_t {
        image.put_pixel(x_min_t as u32, y as u32, color);
        image.put_pixel(x_max_t as u32, y as u32, color);
      }
    }

    // 标签背景在边框上方，空间不足时贴住图像顶部
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x);
    let label_height = self.label_text_height.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);
    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn white(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
  }

  #[test]
  fn no_detections_leaves_frame_untouched() {
    let image = white(64, 48);
    let out = Draw::default().annotate(image.clone(), &DetectResult::default(), LabelMode::Class);
    assert_eq!(out, image);
  }

  #[test]
  fn box_edges_are_drawn_in_pixel_coordinates() {
    let result = DetectResult::from(vec![DetectItem::person([40.0, 50.0, 80.0, 90.0])]);
    let out = Draw::default().annotate(white(120, 120), &result, LabelMode::Class);

    let green = Rgb(BOX_COLOR);
    assert_eq!(*out.get_pixel(40, 70), green);
    assert_eq!(*out.get_pixel(41, 70), green);
    assert_eq!(*out.get_pixel(80, 70), green);
    assert_eq!(*out.get_pixel(60, 90), green);
    // 框内部不受影响
    assert_eq!(*out.get_pixel(60, 70), Rgb([255, 255, 255]));
    // 标签背景在框的上方
    assert_eq!(*out.get_pixel(45, 30), green);
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let image = white(32, 32);
    let result = DetectResult::from(vec![
      DetectItem::person([10.0, 10.0, 10.0, 20.0]),
      DetectItem::person([-50.0, -50.0, -10.0, -10.0]),
    ]);
    let out = Draw::default().annotate(image.clone(), &result, LabelMode::Class);
    assert_eq!(out, image);
  }

  #[test]
  fn labels_follow_mode() {
    let item = DetectItem::new(0, 0.876, [0.0, 0.0, 1.0, 1.0]);
    assert_eq!(LabelMode::Class.label(&item), "person 0.88");
    assert_eq!(LabelMode::Track.label(&item.clone().with_track_id(7)), "ID: 7");
    // 没有跟踪编号时退回类别标签
    assert_eq!(LabelMode::Track.label(&item), "person 0.88");
  }

  #[test]
  fn summary_sits_at_fixed_offset() {
    let out = Draw::default().overlay_summary(white(320, 240), 12);
    let (x, y) = SUMMARY_ORIGIN;
    assert_eq!(*out.get_pixel(x as u32, y as u32), Rgb(SUMMARY_BACKGROUND));
    assert_eq!(*out.get_pixel(0, 0), Rgb([255, 255, 255]));
    assert_eq!(summary_caption(12), "Crowd Count: 12");
  }

  fn caption_text_pixels(image: &RgbImage) -> usize {
    let (x, y) = SUMMARY_ORIGIN;
    let width = (summary_caption(12).len() as f32 * SUMMARY_CHAR_WIDTH) as u32;
    let mut count = 0;
    for py in y as u32..y as u32 + SUMMARY_TEXT_HEIGHT as u32 {
      for px in x as u32..x as u32 + width {
        if image.get_pixel(px, py).0 == SUMMARY_TEXT_COLOR {
          count += 1;
        }
      }
    }
    count
  }

  #[test]
  fn default_draw_renders_caption_text() {
    let draw = Draw::default();
    assert!(draw.font.is_some());
    let out = draw.overlay_summary(white(320, 240), 12);
    assert!(caption_text_pixels(&out) > 0);
  }

  #[test]
  fn default_draw_renders_box_labels() {
    let result = DetectResult::from(vec![DetectItem::person([40.0, 50.0, 200.0, 150.0])]);
    let out = Draw::default().annotate(white(240, 160), &result, LabelMode::Class);
    // 标签背景上有文字笔画
    let glyph_pixels = (26..50)
      .flat_map(|y| (40..120).map(move |x| (x, y)))
      .filter(|&(x, y)| *out.get_pixel(x, y) != Rgb(BOX_COLOR))
      .count();
    assert!(glyph_pixels > 0);
  }

  #[test]
  fn without_font_only_background_is_drawn() {
    let draw = Draw {
      font: None,
      ..Draw::default()
    };
    let out = draw.overlay_summary(white(320, 240), 12);
    assert_eq!(caption_text_pixels(&out), 0);
  }

  #[test]
  fn summary_on_tiny_frame_does_not_panic() {
    let out = Draw::default().overlay_summary(white(8, 8), 3);
    assert_eq!(out.dimensions(), (8, 8));
  }
}
