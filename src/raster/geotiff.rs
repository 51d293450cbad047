// 该文件是 Tianlin （田林） 项目的一部分。
// src/raster/geotiff.rs - GeoTIFF 读取
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

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use image::{Rgb, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

use super::{ClassifiedRaster, GeoImage, RasterError, ValidityMask};
use crate::georef::{AffineTransform, Crs};

// GeoKey 编号
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const RASTER_PIXEL_IS_POINT: u16 = 2;
const PLANAR_CONFIG_SEPARATE: u16 = 2;

#[derive(Error, Debug)]
pub enum GeoTiffError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("TIFF 解码错误: {0}")]
  TiffError(#[from] tiff::TiffError),
  #[error("不支持的 TIFF 格式: {0}")]
  Unsupported(String),
  #[error("GeoKey 目录损坏")]
  InvalidGeoKeys,
}

/// GeoTIFF 元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoTiffInfo {
  pub width: u32,
  pub height: u32,
  pub bands: usize,
  pub transform: Option<AffineTransform>,
  pub crs: Option<Crs>,
  pub nodata: Option<f64>,
}

enum Samples {
  U8(Vec<u8>),
  Wide(Vec<f64>),
}

impl Samples {
  fn from_decoding(result: DecodingResult) -> Result<Self, GeoTiffError> {
    fn widen<T: Copy + Into<f64>>(data: Vec<T>) -> Samples {
      Samples::Wide(data.into_iter().map(Into::into).collect())
    }

    #[allow(unreachable_patterns)]
    let samples = match result {
      DecodingResult::U8(data) => Samples::U8(data),
      DecodingResult::U16(data) => widen(data),
      DecodingResult::U32(data) => widen(data),
      DecodingResult::U64(data) => Samples::Wide(data.into_iter().map(|v| v as f64).collect()),
      DecodingResult::I8(data) => widen(data),
      DecodingResult::I16(data) => widen(data),
      DecodingResult::I32(data) => widen(data),
      DecodingResult::I64(data) => Samples::Wide(data.into_iter().map(|v| v as f64).collect()),
      DecodingResult::F32(data) => widen(data),
      DecodingResult::F64(data) => Samples::Wide(data),
      _ => return Err(GeoTiffError::Unsupported("未知采样类型".to_string())),
    };
    Ok(samples)
  }

  fn len(&self) -> usize {
    match self {
      Samples::U8(data) => data.len(),
      Samples::Wide(data) => data.len(),
    }
  }

  fn get(&self, idx: usize) -> f64 {
    match self {
      Samples::U8(data) => data[idx] as f64,
      Samples::Wide(data) => data[idx],
    }
  }

  // 浮点值按饱和方式截断到 0..=255
  fn get_u8(&self, idx: usize) -> u8 {
    match self {
      Samples::U8(data) => data[idx],
      Samples::Wide(data) => data[idx] as u8,
    }
  }
}

/// 已解码的 GeoTIFF（仅第一个 IFD）
pub struct GeoTiff {
  info: GeoTiffInfo,
  samples: Samples,
}

impl GeoTiff {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, GeoTiffError> {
    let path = path.as_ref();
    info!("读取 GeoTIFF: {}", path.display());
    let file = File::open(path)?;
    Self::from_reader(BufReader::new(file))
  }

  pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self, GeoTiffError> {
    let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());
    let (width, height) = decoder.dimensions()?;

    let bands = match decoder.find_tag(Tag::SamplesPerPixel)? {
      Some(value) => value.into_u16()? as usize,
      None => 1,
    };
    if let Some(value) = decoder.find_tag(Tag::PlanarConfiguration)?
      && value.into_u16()? == PLANAR_CONFIG_SEPARATE
    {
      return Err(GeoTiffError::Unsupported("分离平面存储".to_string()));
    }

    let geo_keys = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
      Some(value) => Some(value.into_u16_vec()?),
      None => None,
    };
    let pixel_is_point = geo_keys
      .as_deref()
      .map(|keys| geo_key(keys, GT_RASTER_TYPE_GEO_KEY))
      .transpose()?
      .flatten()
      == Some(RASTER_PIXEL_IS_POINT);

    let transform = read_transform(&mut decoder)?.map(|t| {
      if pixel_is_point {
        // 点像元模型：坐标指向像元中心，平移半个像元到角点
        AffineTransform {
          c: t.c - 0.5 * (t.a + t.b),
          f: t.f - 0.5 * (t.d + t.e),
          ..t
        }
      } else {
        t
      }
    });

    let crs = match geo_keys.as_deref() {
      Some(keys) => read_crs(keys)?,
      None => None,
    };

    let nodata = match decoder.find_tag(Tag::GdalNodata)? {
      Some(value) => parse_nodata(&value.into_string()?),
      None => None,
    };

    let samples = Samples::from_decoding(decoder.read_image()?)?;
    let expected = width as usize * height as usize * bands;
    if samples.len() < expected {
      return Err(GeoTiffError::Unsupported(format!(
        "采样数量不足: 期望 {}, 实际 {}",
        expected,
        samples.len()
      )));
    }

    let info = GeoTiffInfo {
      width,
      height,
      bands,
      transform,
      crs,
      nodata,
    };
    debug!("GeoTIFF 元数据: {:?}", info);

    Ok(GeoTiff { info, samples })
  }

  pub fn info(&self) -> &GeoTiffInfo {
    &self.info
  }

  fn sample(&self, x: u32, y: u32, band: usize) -> f64 {
    let idx = (y as usize * self.info.width as usize + x as usize) * self.info.bands + band;
    self.samples.get(idx)
  }

  fn transform_or_identity(&self) -> AffineTransform {
    self.info.transform.unwrap_or_else(|| {
      warn!("GeoTIFF 缺少仿射变换，使用单位变换");
      AffineTransform::IDENTITY
    })
  }

  fn validity_mask(&self) -> Option<ValidityMask> {
    let GeoTiffInfo {
      width,
      height,
      bands,
      nodata,
      ..
    } = self.info;

    if let Some(nodata) = nodata {
      return Some(ValidityMask::from_fn(width, height, |x, y| {
        let value = self.sample(x, y, 0);
        if nodata.is_nan() {
          !value.is_nan()
        } else {
          value != nodata
        }
      }));
    }

    if bands == 4 {
      // 无 nodata 时以 alpha 波段作为掩膜
      return Some(ValidityMask::from_fn(width, height, |x, y| {
        self.sample(x, y, 3) != 0.0
      }));
    }

    None
  }

  /// 转为检测用 RGB 影像，多于三个波段时只取前三个
  pub fn into_geo_image(self) -> Result<GeoImage, RasterError> {
    let GeoTiffInfo {
      width,
      height,
      bands,
      crs,
      ..
    } = self.info;
    if bands == 0 || width == 0 || height == 0 {
      return Err(RasterError::NoBands);
    }

    let mask = self.validity_mask();
    let transform = self.transform_or_identity();

    let image = RgbImage::from_fn(width, height, |x, y| {
      let base = (y as usize * width as usize + x as usize) * bands;
      if bands >= 3 {
        Rgb([
          self.samples.get_u8(base),
          self.samples.get_u8(base + 1),
          self.samples.get_u8(base + 2),
        ])
      } else {
        let v = self.samples.get_u8(base);
        Rgb([v, v, v])
      }
    });

    Ok(GeoImage {
      image,
      transform,
      crs,
      mask,
    })
  }

  /// 转为单波段分类栅格，要求声明 nodata
  pub fn into_classified(self) -> Result<ClassifiedRaster, RasterError> {
    let GeoTiffInfo {
      width,
      height,
      bands,
      crs,
      nodata,
      ..
    } = self.info;
    if bands == 0 {
      return Err(RasterError::NoBands);
    }
    let nodata = nodata.ok_or(RasterError::MissingNodata)?;
    let transform = self.transform_or_identity();

    let pixels = width as usize * height as usize;
    let values = if bands == 1 {
      match self.samples {
        Samples::U8(data) => data.into_iter().take(pixels).map(f64::from).collect(),
        Samples::Wide(mut data) => {
          data.truncate(pixels);
          data
        }
      }
    } else {
      (0..pixels).map(|i| self.samples.get(i * bands)).collect()
    };

    Ok(ClassifiedRaster {
      width,
      height,
      values,
      transform,
      crs,
      nodata,
    })
  }
}

fn read_transform<R: Read + Seek>(
  decoder: &mut Decoder<R>,
) -> Result<Option<AffineTransform>, GeoTiffError> {
  if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
    let m = value.into_f64_vec()?;
    if m.len() < 8 {
      return Err(GeoTiffError::Unsupported("ModelTransformation 长度不足".to_string()));
    }
    return Ok(Some(AffineTransform::new(m[0], m[1], m[3], m[4], m[5], m[7])));
  }

  let scale = match decoder.find_tag(Tag::ModelPixelScaleTag)? {
    Some(value) => value.into_f64_vec()?,
    None => return Ok(None),
  };
  let tiepoint = match decoder.find_tag(Tag::ModelTiepointTag)? {
    Some(value) => value.into_f64_vec()?,
    None => return Ok(None),
  };
  if scale.len() < 2 || tiepoint.len() < 6 {
    return Err(GeoTiffError::Unsupported("ModelPixelScale/ModelTiepoint 长度不足".to_string()));
  }

  // 栅格点 (i, j) 对应模型坐标 (x, y)
  let (i, j, x, y) = (tiepoint[0], tiepoint[1], tiepoint[3], tiepoint[4]);
  let (sx, sy) = (scale[0], scale[1]);
  Ok(Some(AffineTransform::new(
    sx,
    0.0,
    x - i * sx,
    0.0,
    -sy,
    y + j * sy,
  )))
}

/// 读取内联存储的 GeoKey 值
fn geo_key(keys: &[u16], key_id: u16) -> Result<Option<u16>, GeoTiffError> {
  if keys.len() < 4 {
    return Err(GeoTiffError::InvalidGeoKeys);
  }
  let count = keys[3] as usize;
  if keys.len() < 4 + count * 4 {
    return Err(GeoTiffError::InvalidGeoKeys);
  }
  Ok(
    keys[4..4 + count * 4]
      .chunks_exact(4)
      .find(|entry| entry[0] == key_id && entry[1] == 0)
      .map(|entry| entry[3]),
  )
}

fn read_crs(keys: &[u16]) -> Result<Option<Crs>, GeoTiffError> {
  let code = match geo_key(keys, PROJECTED_CS_TYPE_GEO_KEY)? {
    Some(code) => Some(code),
    None => geo_key(keys, GEOGRAPHIC_TYPE_GEO_KEY)?,
  };
  // 用户自定义坐标系保留下来，由地理定位报告为不支持
  Ok(code.filter(|&code| code != 0).map(Crs::from_epsg))
}

fn parse_nodata(text: &str) -> Option<f64> {
  let trimmed = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
  match trimmed.parse::<f64>() {
    Ok(value) => Some(value),
    Err(_) => {
      warn!("无法解析 nodata 值: {:?}", text);
      None
    }
  }
}
