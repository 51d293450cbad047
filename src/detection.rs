// 该文件是 Tianlin （田林） 项目的一部分。
// src/detection.rs - 全图坐标检测结果
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

use serde::Serialize;

use crate::model::RawDetection;
use crate::tiling::Tile;

mod merge;
pub use self::merge::CrossTileMerger;

/// 全图整数像素坐标的边界框
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl PixelBox {
  pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  pub fn area(&self) -> u64 {
    self.x2.saturating_sub(self.x1) as u64 * self.y2.saturating_sub(self.y1) as u64
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &PixelBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = PixelBox::new(x1, y1, x2, y2).area();
    let union = self.area() + other.area() - intersection;

    if union > 0 {
      intersection as f32 / union as f32
    } else {
      0.0
    }
  }

  /// 裁剪到 `[0, width-1] × [0, height-1]`
  pub fn clip_to_image(&self, width: u32, height: u32) -> PixelBox {
    let max_x = width.saturating_sub(1);
    let max_y = height.saturating_sub(1);
    PixelBox::new(
      self.x1.min(max_x),
      self.y1.min(max_y),
      self.x2.min(max_x),
      self.y2.min(max_y),
    )
  }

  pub fn center(&self) -> (f64, f64) {
    (
      (self.x1 as f64 + self.x2 as f64) / 2.0,
      (self.y1 as f64 + self.y2 as f64) / 2.0,
    )
  }
}

/// 全图坐标的检测结果，满足 `x2 > x1 && y2 > y1`
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDetection {
  pub bbox: PixelBox,
  pub class_id: u32,
  pub score: f32,
}

/// 将切片内检测结果转换为全图坐标
#[derive(Debug, Clone, Copy)]
pub struct LocalToGlobalMapper {
  tile: Tile,
}

impl LocalToGlobalMapper {
  pub fn new(tile: Tile) -> Self {
    Self { tile }
  }

  pub fn map(&self, raw: &RawDetection) -> Option<GlobalDetection> {
    let (w, h) = (self.tile.width() as f32, self.tile.height() as f32);
    // NaN 经 as 转换为 0
    let clip = |v: f32, max: f32| v.clamp(0.0, max) as u32;

    let x1 = clip(raw.bbox[0], w);
    let y1 = clip(raw.bbox[1], h);
    let x2 = clip(raw.bbox[2], w);
    let y2 = clip(raw.bbox[3], h);

    if x2 <= x1 || y2 <= y1 {
      return None;
    }

    Some(GlobalDetection {
      bbox: PixelBox::new(
        x1 + self.tile.x1,
        y1 + self.tile.y1,
        x2 + self.tile.x1,
        y2 + self.tile.y1,
      ),
      class_id: raw.class_id,
      score: raw.score,
    })
  }

  pub fn map_all<'a>(
    &'a self,
    raws: impl IntoIterator<Item = &'a RawDetection> + 'a,
  ) -> impl Iterator<Item = GlobalDetection> + 'a {
    raws.into_iter().filter_map(|raw| self.map(raw))
  }
}
