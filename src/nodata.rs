// 该文件是 Tianlin （田林） 项目的一部分。
// src/nodata.rs - 无效像素过滤
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

use crate::config::NodataConfig;
use crate::detection::PixelBox;
use crate::raster::ValidityMask;
use crate::tiling::Tile;

/// 根据有效像素掩膜判断切片是否跳过、检测结果是否丢弃
///
/// 没有掩膜时所有像素都视为有效，两种检查都不生效。
#[derive(Debug, Clone, Copy)]
pub struct NodataFilter<'a> {
  mask: Option<&'a ValidityMask>,
  skip_threshold: f64,
  discard_threshold: f64,
}

impl<'a> NodataFilter<'a> {
  pub fn new(mask: Option<&'a ValidityMask>, config: &NodataConfig) -> Self {
    Self {
      mask,
      skip_threshold: config.tile_skip_threshold,
      discard_threshold: config.detection_discard_threshold,
    }
  }

  fn exceeds(&self, x1: u32, y1: u32, x2: u32, y2: u32, threshold: f64) -> bool {
    self
      .mask
      .and_then(|mask| mask.invalid_fraction(x1, y1, x2, y2))
      .is_some_and(|fraction| fraction > threshold)
  }

  pub fn should_skip_tile(&self, tile: &Tile) -> bool {
    self.exceeds(tile.x1, tile.y1, tile.x2, tile.y2, self.skip_threshold)
  }

  pub fn should_discard(&self, bbox: &PixelBox) -> bool {
    self.exceeds(bbox.x1, bbox.y1, bbox.x2, bbox.y2, self.discard_threshold)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn left_invalid(width: u32, height: u32, invalid_cols: u32) -> ValidityMask {
    ValidityMask::from_fn(width, height, |x, _| x >= invalid_cols)
  }

  #[test]
  fn skips_mostly_invalid_tiles() {
    let mask = left_invalid(100, 10, 70);
    let filter = NodataFilter::new(Some(&mask), &NodataConfig::default());

    let tile = Tile {
      x1: 0,
      y1: 0,
      x2: 100,
      y2: 10,
    };
    // 70% 无效 > 0.6
    assert!(filter.should_skip_tile(&tile));

    let tile = Tile {
      x1: 40,
      y1: 0,
      x2: 100,
      y2: 10,
    };
    // 30 / 60 = 0.5
    assert!(!filter.should_skip_tile(&tile));
  }

  #[test]
  fn threshold_is_strict() {
    let mask = left_invalid(10, 10, 5);
    let filter = NodataFilter::new(Some(&mask), &NodataConfig::default());
    // 恰好 0.5 不丢弃
    assert!(!filter.should_discard(&PixelBox::new(0, 0, 10, 10)));
    assert!(filter.should_discard(&PixelBox::new(0, 0, 9, 10)));
  }

  #[test]
  fn no_mask_keeps_everything() {
    let filter = NodataFilter::new(None, &NodataConfig::default());
    let tile = Tile {
      x1: 0,
      y1: 0,
      x2: 10,
      y2: 10,
    };
    assert!(!filter.should_skip_tile(&tile));
    assert!(!filter.should_discard(&PixelBox::new(0, 0, 10, 10)));
  }

  #[test]
  fn box_outside_mask_is_kept() {
    let mask = left_invalid(10, 10, 10);
    let filter = NodataFilter::new(Some(&mask), &NodataConfig::default());
    assert!(!filter.should_discard(&PixelBox::new(20, 20, 30, 30)));
  }
}
