// 该文件是 Tianlin （田林） 项目的一部分。
// src/tiling.rs - 重叠切片规划
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

use std::iter::StepBy;
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

use crate::config::TilingConfig;

#[derive(Error, Debug, PartialEq)]
pub enum TilingError {
  #[error("切片尺寸必须大于 0")]
  ZeroTileSize,
  #[error("重叠比例 {0} 不在 [0, 1) 范围内")]
  InvalidOverlap(f64),
}

/// 像素空间半开矩形 `[x1,x2) × [y1,y2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tile {
  pub x1: u32,
  pub y1: u32,
  pub x2: u32,
  pub y2: u32,
}

impl Tile {
  pub fn width(&self) -> u32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> u32 {
    self.y2 - self.y1
  }
}

/// 覆盖整幅影像的重叠切片网格
///
/// 起点为 `0, step, 2*step, ...`，末端切片被裁剪到影像边界而不填充，
/// 因此边缘切片看到的上下文少于完整切片。
#[derive(Debug, Clone, Copy)]
pub struct TileGridPlanner {
  tile_size: u32,
  step: u32,
}

impl TileGridPlanner {
  pub fn new(tile_size: u32, overlap: f64) -> Result<Self, TilingError> {
    if tile_size == 0 {
      return Err(TilingError::ZeroTileSize);
    }
    if !(overlap.is_finite() && (0.0..1.0).contains(&overlap)) {
      return Err(TilingError::InvalidOverlap(overlap));
    }
    let overlap_px = (tile_size as f64 * overlap).floor() as u32;
    // overlap < 1 时 overlap_px < tile_size
    let step = (tile_size - overlap_px).max(1);
    Ok(Self { tile_size, step })
  }

  pub fn from_config(config: &TilingConfig) -> Result<Self, TilingError> {
    Self::new(config.tile_size, config.overlap)
  }

  pub fn tile_size(&self) -> u32 {
    self.tile_size
  }

  pub fn step(&self) -> u32 {
    self.step
  }

  fn starts(&self, extent: u32) -> StepBy<Range<u32>> {
    (0..extent).step_by(self.step as usize)
  }

  /// 按行优先顺序返回切片
  pub fn plan(&self, height: u32, width: u32) -> Vec<Tile> {
    let mut tiles = Vec::new();
    for y in self.starts(height) {
      for x in self.starts(width) {
        tiles.push(Tile {
          x1: x,
          y1: y,
          x2: x.saturating_add(self.tile_size).min(width),
          y2: y.saturating_add(self.tile_size).min(height),
        });
      }
    }
    tiles
  }
}
