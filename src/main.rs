// 该文件是 Tianlin （田林） 项目的一部分。
// src/main.rs - 命令行入口
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geojson::FeatureCollection;
use tracing::{error, info, warn};
use url::Url;

use tianlin::{
  FromUrl, PipelineError,
  config::PipelineConfig,
  input::GeoTiffInput,
  output::{JsonFileOutput, OutputWrapper, Render},
  raster::GeoTiff,
  task::{CancellationToken, ConversionRequest, ConversionTask, Task},
  tiling::TileGridPlanner,
};

/// Tianlin 田林：遥感影像切片检测与地类矢量化
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件路径
  #[arg(long, global = true, value_name = "CONFIG")]
  pub config: Option<PathBuf>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 将地类分类 GeoTIFF 转换为 GeoJSON
  Convert {
    /// 输入来源，如 geotiff:///data/landcover.tif
    #[arg(long, value_name = "SOURCE")]
    input: Url,
    /// 地类：trees 或 crops
    #[arg(long = "type", value_name = "LAND_TYPE")]
    land_type: String,
    /// 输出路径，如 json:///data/trees.geojson，缺省时写到标准输出
    #[arg(long, value_name = "OUTPUT")]
    output: Option<Url>,
    /// 简化容差（度）
    #[arg(long, value_name = "DEGREES")]
    simplify_tolerance: Option<f64>,
  },
  /// 打印切片规划
  Tiles {
    #[arg(long)]
    width: u32,
    #[arg(long)]
    height: u32,
    #[arg(long)]
    tile_size: Option<u32>,
    #[arg(long)]
    overlap: Option<f64>,
    #[arg(long, value_name = "OUTPUT")]
    output: Option<Url>,
  },
  /// 打印 GeoTIFF 的尺寸、波段、坐标参考系、nodata 与仿射变换
  Inspect {
    #[arg(long, value_name = "SOURCE")]
    input: Url,
    #[arg(long, value_name = "OUTPUT")]
    output: Option<Url>,
  },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
  match path {
    Some(path) => PipelineConfig::from_json_file(path)
      .with_context(|| format!("无法读取配置文件 {}", path.display())),
    None => Ok(PipelineConfig::default()),
  }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn convert(
  config: &PipelineConfig,
  input: &Url,
  land_type: String,
  cancel: CancellationToken,
) -> Result<FeatureCollection, PipelineError> {
  let task = ConversionTask::new(config)?;
  let input = GeoTiffInput::from_url(input)?;
  let request = ConversionRequest::from_input(&input, &land_type, config.max_upload_bytes())?
    .with_cancel(cancel);
  task.run_task(request)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut config = load_config(args.config.as_ref())?;

  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，取消当前任务...");
      cancel.cancel();
    })
    .context("无法设置 Ctrl-C 处理函数")?;
  }

  match args.command {
    Command::Convert {
      input,
      land_type,
      output,
      simplify_tolerance,
    } => {
      if let Some(tolerance) = simplify_tolerance {
        config.vectorize.simplify_tolerance = tolerance;
      }
      config.validate()?;
      info!("输入来源: {}", input);

      let collection = match convert(&config, &input, land_type, cancel) {
        Ok(collection) => collection,
        Err(err) => {
          error!("转换失败: {}", err);
          print_json(&err.failure())?;
          std::process::exit(1);
        }
      };
      match output {
        Some(url) => OutputWrapper::from_url(&url)?.render_result(&collection)?,
        None => print_json(&collection)?,
      }
    }
    Command::Tiles {
      width,
      height,
      tile_size,
      overlap,
      output,
    } => {
      if let Some(tile_size) = tile_size {
        config.tiling.tile_size = tile_size;
      }
      if let Some(overlap) = overlap {
        config.tiling.overlap = overlap;
      }
      let planner = TileGridPlanner::from_config(&config.tiling)?;
      let tiles = planner.plan(height, width);
      info!(
        "切片尺寸 {}，步长 {}，共 {} 个切片",
        planner.tile_size(),
        planner.step(),
        tiles.len()
      );
      match output {
        Some(url) => JsonFileOutput::from_url(&url)?.render_result(&tiles)?,
        None => print_json(&tiles)?,
      }
    }
    Command::Inspect { input, output } => {
      let input = GeoTiffInput::from_url(&input)?;
      let tiff = GeoTiff::open(input.path())
        .with_context(|| format!("无法打开 {}", input.path().display()))?;
      match output {
        Some(url) => JsonFileOutput::from_url(&url)?.render_result(tiff.info())?,
        None => print_json(tiff.info())?,
      }
    }
  }

  Ok(())
}
