// 该文件是 Tianlin （田林） 项目的一部分。
// src/model.rs - 检测模型接口与模型注册表
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

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{InputError, PipelineError};

/// 模型推理失败
#[derive(Error, Debug)]
#[error("{0}")]
pub struct DetectorError(String);

impl DetectorError {
  pub fn new(msg: impl fmt::Display) -> Self {
    DetectorError(msg.to_string())
  }
}

/// 切片内的原始检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，切片像素坐标
}

/// 每次请求的检测阈值，原样传给模型
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  confidence: f32,
  iou: f32,
}

impl Thresholds {
  pub fn new(confidence: f32, iou: f32) -> Result<Self, InputError> {
    fn check(name: &'static str, value: f32) -> Result<f32, InputError> {
      if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
      } else {
        Err(InputError::InvalidThreshold { name, value })
      }
    }

    Ok(Self {
      confidence: check("confidence", confidence)?,
      iou: check("iou", iou)?,
    })
  }

  pub fn confidence(&self) -> f32 {
    self.confidence
  }

  pub fn iou(&self) -> f32 {
    self.iou
  }
}

/// 模型能否被多个线程同时调用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
  /// 调用需串行化
  Serialized,
  Parallel,
}

/// 外部目标检测模型
pub trait Detector: Send + Sync {
  fn detect(
    &self,
    tile: &RgbImage,
    thresholds: &Thresholds,
  ) -> Result<Vec<RawDetection>, DetectorError>;

  /// 类别名称表
  fn class_name(&self, class_id: u32) -> Option<&str>;

  fn concurrency(&self) -> Concurrency {
    Concurrency::Serialized
  }
}

/// 已加载的模型，不支持并发调用的模型附带一把锁
pub struct LoadedModel {
  detector: Arc<dyn Detector>,
  lock: Mutex<()>,
}

impl LoadedModel {
  fn new(detector: Arc<dyn Detector>) -> Self {
    Self {
      detector,
      lock: Mutex::new(()),
    }
  }

  pub fn detector(&self) -> &dyn Detector {
    self.detector.as_ref()
  }

  pub fn detect(
    &self,
    tile: &RgbImage,
    thresholds: &Thresholds,
  ) -> Result<Vec<RawDetection>, DetectorError> {
    let _guard: Option<MutexGuard<'_, ()>> = match self.detector.concurrency() {
      Concurrency::Parallel => None,
      // 锁内只有模型调用，被毒化时仍可继续使用
      Concurrency::Serialized => Some(self.lock.lock().unwrap_or_else(|e| e.into_inner())),
    };
    self.detector.detect(tile, thresholds)
  }

  pub fn label(&self, class_id: u32) -> String {
    self
      .detector
      .class_name(class_id)
      .unwrap_or("unknown")
      .to_string()
  }
}

enum ModelSlot {
  Loaded(LoadedModel),
  Unavailable(String),
}

/// 启动时构建、此后只读的模型注册表
#[derive(Default)]
pub struct ModelRegistry {
  models: BTreeMap<String, ModelSlot>,
}

impl ModelRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 登记一个模型的加载结果，加载失败只影响该选择器
  pub fn register<E: fmt::Display>(
    mut self,
    selector: impl Into<String>,
    loaded: Result<Arc<dyn Detector>, E>,
  ) -> Self {
    let selector = selector.into();
    let slot = match loaded {
      Ok(detector) => {
        info!("已加载模型 '{}'", selector);
        ModelSlot::Loaded(LoadedModel::new(detector))
      }
      Err(e) => {
        warn!("模型 '{}' 加载失败: {}", selector, e);
        ModelSlot::Unavailable(e.to_string())
      }
    };
    self.models.insert(selector, slot);
    self
  }

  pub fn selectors(&self) -> impl Iterator<Item = &str> {
    self.models.keys().map(String::as_str)
  }

  pub fn get(&self, selector: &str) -> Result<&LoadedModel, PipelineError> {
    match self.models.get(selector) {
      Some(ModelSlot::Loaded(model)) => Ok(model),
      Some(ModelSlot::Unavailable(reason)) => Err(PipelineError::ModelUnavailable {
        selector: selector.to_string(),
        reason: reason.clone(),
      }),
      None => Err(InputError::UnknownModel(selector.to_string()).into()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FailureKind;

  struct NamedDetector;

  impl Detector for NamedDetector {
    fn detect(&self, _: &RgbImage, _: &Thresholds) -> Result<Vec<RawDetection>, DetectorError> {
      Ok(Vec::new())
    }

    fn class_name(&self, class_id: u32) -> Option<&str> {
      ["Tree"].get(class_id as usize).copied()
    }
  }

  fn registry() -> ModelRegistry {
    ModelRegistry::new()
      .register("tree", Ok::<_, String>(Arc::new(NamedDetector) as Arc<dyn Detector>))
      .register("crop", Err::<Arc<dyn Detector>, _>("权重文件不存在"))
  }

  #[test]
  fn thresholds_must_be_in_unit_interval() {
    assert!(Thresholds::new(0.25, 0.45).is_ok());
    assert!(Thresholds::new(0.0, 1.0).is_ok());
    assert!(matches!(
      Thresholds::new(1.2, 0.5),
      Err(InputError::InvalidThreshold {
        name: "confidence",
        ..
      })
    ));
    assert!(matches!(
      Thresholds::new(0.5, f32::NAN),
      Err(InputError::InvalidThreshold { name: "iou", .. })
    ));
  }

  #[test]
  fn registry_distinguishes_unknown_and_unavailable() {
    let registry = registry();
    assert!(registry.get("tree").is_ok());

    let err = registry.get("crop").err().unwrap();
    assert_eq!(err.kind(), FailureKind::ModelUnavailable);

    let err = registry.get("fish").err().unwrap();
    assert_eq!(err.kind(), FailureKind::InputError);

    assert_eq!(registry.selectors().collect::<Vec<_>>(), vec!["crop", "tree"]);
  }

  #[test]
  fn labels_fall_back_to_unknown() {
    let registry = registry();
    let model = registry.get("tree").unwrap();
    assert_eq!(model.label(0), "Tree");
    assert_eq!(model.label(7), "unknown");
  }
}
