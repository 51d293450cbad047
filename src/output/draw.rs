// 该文件是 Tianlin （田林） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::PixelBox;
use crate::output::report::GeolocatedDetection;

const BOX_THICKNESS: u32 = 3;
const DEFAULT_COLOR: [u8; 3] = [255, 255, 255];

/// 按类别名称取边框颜色，未知类别为白色
pub fn label_color(label: &str) -> Rgb<u8> {
  let color = match label {
    "trees-5pma" | "Tree" => [255, 255, 0],
    "Bokchoy" => [0, 191, 165],
    "Potato" => [255, 165, 0],
    "Lettuce" => [124, 252, 0],
    "Romaine" => [10, 47, 10],
    _ => DEFAULT_COLOR,
  };
  Rgb(color)
}

pub struct Draw {
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  /// 以 bbox 为中心线绘制加粗边框，超出影像的部分被裁掉
  fn draw_bbox(&self, image: &mut RgbImage, bbox: &PixelBox, color: Rgb<u8>) {
    let half = (self.thickness / 2) as i32;
    for offset in -half..(self.thickness as i32 - half) {
      let x = bbox.x1 as i32 - offset;
      let y = bbox.y1 as i32 - offset;
      let width = bbox.x2 as i64 - bbox.x1 as i64 + 1 + 2 * offset as i64;
      let height = bbox.y2 as i64 - bbox.y1 as i64 + 1 + 2 * offset as i64;
      if width <= 0 || height <= 0 {
        continue;
      }
      let rect = Rect::at(x, y).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  /// 按 (边界框, 类别名称) 绘制
  pub fn draw_boxes<'a>(
    &self,
    image: &mut RgbImage,
    boxes: impl IntoIterator<Item = (&'a PixelBox, &'a str)>,
  ) {
    for (bbox, label) in boxes {
      self.draw_bbox(image, bbox, label_color(label));
    }
  }

  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[GeolocatedDetection]) {
    self.draw_boxes(
      image,
      detections
        .iter()
        .map(|det| (&det.coordinates, det.label.as_str())),
    );
  }

  /// 在影像副本上绘制，原影像不变
  pub fn annotate<'a>(
    &self,
    image: &RgbImage,
    boxes: impl IntoIterator<Item = (&'a PixelBox, &'a str)>,
  ) -> RgbImage {
    let mut annotated = image.clone();
    self.draw_boxes(&mut annotated, boxes);
    annotated
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::georef::GpsCoordinates;

  fn detection(label: &str, bbox: PixelBox) -> GeolocatedDetection {
    GeolocatedDetection {
      label: label.to_string(),
      coordinates: bbox,
      gps_coordinates: GpsCoordinates { lat: 0.0, lon: 0.0 },
      confidence: 0.9,
    }
  }

  #[test]
  fn known_labels_have_colors() {
    assert_eq!(label_color("Tree"), Rgb([255, 255, 0]));
    assert_eq!(label_color("trees-5pma"), label_color("Tree"));
    assert_eq!(label_color("Potato"), Rgb([255, 165, 0]));
    assert_eq!(label_color("unknown"), Rgb(DEFAULT_COLOR));
  }

  #[test]
  fn draws_three_pixel_outline_on_copy() {
    let image = RgbImage::new(40, 40);
    let bbox = PixelBox::new(10, 10, 30, 30);
    let annotated = Draw::default().annotate(&image, [(&bbox, "Tree")]);

    let yellow = Rgb([255, 255, 0]);
    // 边框线两侧各 1 像素
    for x in [9, 10, 11] {
      assert_eq!(*annotated.get_pixel(x, 20), yellow);
    }
    assert_eq!(*annotated.get_pixel(8, 20), Rgb([0, 0, 0]));
    assert_eq!(*annotated.get_pixel(12, 20), Rgb([0, 0, 0]));
    assert_eq!(*annotated.get_pixel(20, 20), Rgb([0, 0, 0]));
    assert_eq!(*annotated.get_pixel(20, 31), yellow);
    // 原影像不变
    assert_eq!(*image.get_pixel(10, 20), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_at_the_border_are_clipped() {
    let mut image = RgbImage::new(10, 10);
    Draw::default().draw_detections(&mut image, &[detection("Lettuce", PixelBox::new(0, 0, 9, 9))]);
    assert_eq!(*image.get_pixel(0, 5), Rgb([124, 252, 0]));
    assert_eq!(*image.get_pixel(9, 9), Rgb([124, 252, 0]));
  }

  #[test]
  fn boxes_past_the_border_are_drawn_unclipped() {
    let image = RgbImage::new(10, 10);
    let bbox = PixelBox::new(2, 2, 10, 10);
    let annotated = Draw::default().annotate(&image, [(&bbox, "Potato")]);
    let orange = Rgb([255, 165, 0]);
    // 右边线位于 x = 9..=11，只有 x = 9 落在影像内
    assert_eq!(*annotated.get_pixel(9, 5), orange);
    assert_eq!(*annotated.get_pixel(8, 5), Rgb([0, 0, 0]));
  }
}
