// 该文件是 Tianlin （田林） 项目的一部分。
// src/detection/merge.rs - 跨切片非极大值抑制
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

use std::cmp::Ordering;

use crate::config::MergeConfig;
use crate::detection::GlobalDetection;

/// 在全图坐标下合并重叠切片产生的重复检测
#[derive(Debug, Clone, Copy)]
pub struct CrossTileMerger {
  iou_threshold: f32,
  class_aware: bool,
}

impl CrossTileMerger {
  pub fn new(iou_threshold: f32, class_aware: bool) -> Self {
    Self {
      iou_threshold,
      class_aware,
    }
  }

  pub fn from_config(config: &MergeConfig) -> Self {
    Self::new(config.iou_threshold, config.class_aware)
  }

  fn suppresses(&self, kept: &GlobalDetection, candidate: &GlobalDetection) -> bool {
    if self.class_aware && kept.class_id != candidate.class_id {
      return false;
    }
    kept.bbox.iou(&candidate.bbox) >= self.iou_threshold
  }

  /// 贪心 NMS，结果按置信度降序，同分保持输入顺序
  pub fn merge(&self, mut detections: Vec<GlobalDetection>) -> Vec<GlobalDetection> {
    // 稳定排序，NaN 置信度排在最后
    detections.sort_by(|a, b| match (a.score.is_nan(), b.score.is_nan()) {
      (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
      (a_nan, b_nan) => a_nan.cmp(&b_nan),
    });

    let mut kept: Vec<GlobalDetection> = Vec::with_capacity(detections.len());
    for det in detections {
      if !kept.iter().any(|k| self.suppresses(k, &det)) {
        kept.push(det);
      }
    }
    kept
  }
}
