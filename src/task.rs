// 该文件是 Tianlin （田林） 项目的一部分。
// src/task.rs - 检测与矢量化任务
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use geojson::FeatureCollection;
use image::RgbImage;
use image::imageops;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detection::{CrossTileMerger, GlobalDetection, LocalToGlobalMapper};
use crate::error::{PipelineError, ProcessingError};
use crate::georef::Georeferencer;
use crate::input::{GeoTiffInput, StagedUpload};
use crate::model::{LoadedModel, ModelRegistry, Thresholds};
use crate::nodata::NodataFilter;
use crate::output::draw::Draw;
use crate::output::report::{DetectionReport, GeolocatedDetection};
use crate::raster::{ClassifiedRaster, GeoImage, RasterError};
use crate::tiling::{Tile, TileGridPlanner};
use crate::vectorize::{LandType, RasterVectorizer};

pub trait Task<Input>: Sized {
  type Output;
  fn run_task(&self, input: Input) -> Result<Self::Output, PipelineError>;
}

/// 请求级取消标记，可跨线程共享
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  fn check(&self) -> Result<(), PipelineError> {
    if self.is_cancelled() {
      Err(PipelineError::Cancelled)
    } else {
      Ok(())
    }
  }
}

pub struct DetectionRequest {
  pub image: GeoImage,
  pub model: String,
  pub confidence: f32,
  pub iou: f32,
  pub cancel: CancellationToken,
}

impl DetectionRequest {
  pub fn new(image: GeoImage, model: impl Into<String>, confidence: f32, iou: f32) -> Self {
    Self {
      image,
      model: model.into(),
      confidence,
      iou,
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }
}

#[derive(Debug)]
pub struct DetectionOutcome {
  pub report: DetectionReport,
  pub annotated: RgbImage,
}

/// 切片检测、跨切片合并与地理定位
pub struct DetectionTask {
  registry: Arc<ModelRegistry>,
  config: PipelineConfig,
  pool: ThreadPool,
  draw: Draw,
}

impl DetectionTask {
  pub fn new(registry: Arc<ModelRegistry>, config: PipelineConfig) -> Result<Self, PipelineError> {
    config.validate().map_err(ProcessingError::from)?;
    let workers = config.worker_count();
    let pool = ThreadPoolBuilder::new()
      .num_threads(workers)
      .thread_name(|i| format!("tianlin-tile-{}", i))
      .build()
      .map_err(ProcessingError::from)?;
    info!("切片线程池已创建，线程数: {}", workers);
    Ok(Self {
      registry,
      config,
      pool,
      draw: Draw::default(),
    })
  }

  /// 从暂存的上传文件构造请求
  ///
  /// 阈值与模型选择在解码影像之前校验。
  pub fn request_from_upload(
    &self,
    upload: &StagedUpload,
    model: &str,
    confidence: f32,
    iou: f32,
  ) -> Result<DetectionRequest, PipelineError> {
    Thresholds::new(confidence, iou)?;
    self.registry.get(model)?;

    let image = upload
      .open()
      .map_err(RasterError::from)?
      .into_geo_image()?;
    Ok(DetectionRequest::new(image, model, confidence, iou))
  }

  fn detect_tile(
    &self,
    model: &LoadedModel,
    image: &GeoImage,
    tile: &Tile,
    filter: &NodataFilter<'_>,
    thresholds: &Thresholds,
    cancel: &CancellationToken,
  ) -> Result<Vec<GlobalDetection>, PipelineError> {
    cancel.check()?;
    if filter.should_skip_tile(tile) {
      debug!("切片 {:?} 无效像素过多，跳过", tile);
      return Ok(Vec::new());
    }

    let crop = imageops::crop_imm(&image.image, tile.x1, tile.y1, tile.width(), tile.height())
      .to_image();
    let raws = model
      .detect(&crop, thresholds)
      .map_err(ProcessingError::from)?;

    let mapper = LocalToGlobalMapper::new(*tile);
    let detections: Vec<GlobalDetection> = mapper
      .map_all(&raws)
      .filter(|det| !filter.should_discard(&det.bbox))
      .collect();
    debug!(
      "切片 {:?}: 原始检测 {} 个，保留 {} 个",
      tile,
      raws.len(),
      detections.len()
    );
    Ok(detections)
  }

  fn geolocate(
    &self,
    model: &LoadedModel,
    georef: &Georeferencer,
    image: &GeoImage,
    det: &GlobalDetection,
  ) -> Result<GeolocatedDetection, PipelineError> {
    let bbox = det.bbox.clip_to_image(image.width(), image.height());
    let (cx, cy) = bbox.center();
    let gps = georef
      .pixel_center_to_gps(cx, cy)
      .map_err(ProcessingError::from)?;
    Ok(GeolocatedDetection {
      label: model.label(det.class_id),
      coordinates: bbox,
      gps_coordinates: gps,
      confidence: det.score,
    })
  }
}

impl Task<DetectionRequest> for DetectionTask {
  type Output = DetectionOutcome;

  fn run_task(&self, request: DetectionRequest) -> Result<DetectionOutcome, PipelineError> {
    let started = Instant::now();
    let thresholds = Thresholds::new(request.confidence, request.iou)?;
    let model = self.registry.get(&request.model)?;
    let image = &request.image;
    let cancel = &request.cancel;

    // 坐标参考系在切片之前校验
    let georef = Georeferencer::new(image.transform, image.crs)?;
    let planner = TileGridPlanner::from_config(&self.config.tiling).map_err(ProcessingError::from)?;
    let tiles = planner.plan(image.height(), image.width());
    let filter = NodataFilter::new(image.mask.as_ref(), &self.config.nodata);
    info!(
      "开始检测: 模型 '{}'，影像 {}x{}，切片 {} 个",
      request.model,
      image.width(),
      image.height(),
      tiles.len()
    );

    let per_tile: Vec<Vec<GlobalDetection>> = self.pool.install(|| {
      tiles
        .par_iter()
        .map(|tile| self.detect_tile(model, image, tile, &filter, &thresholds, cancel))
        .collect::<Result<Vec<_>, PipelineError>>()
    })?;
    cancel.check()?;
    let detections: Vec<GlobalDetection> = per_tile.into_iter().flatten().collect();
    info!("切片推理完成，耗时: {:.2?}，候选 {} 个", started.elapsed(), detections.len());

    let merged = CrossTileMerger::from_config(&self.config.merge).merge(detections);
    let geolocated = merged
      .iter()
      .map(|det| self.geolocate(model, &georef, image, det))
      .collect::<Result<Vec<_>, _>>()?;

    // 标注图使用未裁剪的合并框，裁剪只用于报告
    let annotated = self.draw.annotate(
      &image.image,
      merged
        .iter()
        .zip(&geolocated)
        .map(|(det, located)| (&det.bbox, located.label.as_str())),
    );
    let report = DetectionReport::new(geolocated, image.width(), image.height(), georef.crs());
    info!(
      "检测完成，共 {} 个目标，总耗时: {:.2?}",
      report.detections.len(),
      started.elapsed()
    );

    Ok(DetectionOutcome { report, annotated })
  }
}

pub struct ConversionRequest {
  pub upload: StagedUpload,
  pub land_type: LandType,
  pub cancel: CancellationToken,
}

impl ConversionRequest {
  pub fn new(upload: StagedUpload, land_type: LandType) -> Self {
    Self {
      upload,
      land_type,
      cancel: CancellationToken::new(),
    }
  }

  /// 先解析地类，再暂存输入文件
  pub fn from_input(
    input: &GeoTiffInput,
    land_type: &str,
    max_bytes: u64,
  ) -> Result<Self, PipelineError> {
    let land_type: LandType = land_type.parse()?;
    let upload = input.stage(max_bytes)?;
    info!("输入文件: {} ({} 字节)", upload.file_name(), upload.size());
    Ok(Self::new(upload, land_type))
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// 地类栅格到 GeoJSON 的转换
pub struct ConversionTask {
  vectorizer: RasterVectorizer,
}

impl ConversionTask {
  pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
    config.validate().map_err(ProcessingError::from)?;
    Ok(Self {
      vectorizer: RasterVectorizer::from_config(&config.vectorize),
    })
  }

  pub fn convert_raster(
    &self,
    raster: &ClassifiedRaster,
    land_type: LandType,
  ) -> Result<FeatureCollection, PipelineError> {
    let started = Instant::now();
    let collection = self.vectorizer.vectorize(raster, land_type)?;
    info!("矢量化耗时: {:.2?}", started.elapsed());
    Ok(collection)
  }
}

impl Task<ConversionRequest> for ConversionTask {
  type Output = FeatureCollection;

  /// 暂存文件在请求结束时随 `ConversionRequest` 一起删除
  fn run_task(&self, request: ConversionRequest) -> Result<FeatureCollection, PipelineError> {
    let land_type = request.land_type;
    request.cancel.check()?;

    let raster = request
      .upload
      .open()
      .map_err(RasterError::from)?
      .into_classified()?;
    info!(
      "读取 {}: {}x{}，nodata = {}",
      request.upload.file_name(),
      raster.width,
      raster.height,
      raster.nodata
    );
    request.cancel.check()?;

    match self.convert_raster(&raster, land_type) {
      Err(PipelineError::NoFeaturesFound { land_type }) => {
        warn!("未检测到 {}", land_type);
        Err(PipelineError::NoFeaturesFound { land_type })
      }
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cancellation_is_shared_between_clones() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(clone.check().is_ok());
    token.cancel();
    assert!(clone.is_cancelled());
    assert!(matches!(clone.check(), Err(PipelineError::Cancelled)));
  }
}
