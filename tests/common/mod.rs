// 该文件是 Tianlin （田林） 项目的一部分。
// tests/common/mod.rs - 测试用 GeoTIFF 构造
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

#![allow(dead_code)]

use std::fs::File;
use std::path::Path;

use tiff::encoder::colortype::ColorType;
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

/// 写入 GeoTIFF 时附带的地理参考标签
#[derive(Debug, Clone)]
pub struct GeoTags {
  pub epsg: Option<u16>,
  pub west: f64,
  pub north: f64,
  pub pixel_size: f64,
  pub nodata: Option<&'static str>,
}

impl GeoTags {
  pub fn wgs84(west: f64, north: f64, pixel_size: f64) -> Self {
    Self {
      epsg: Some(4326),
      west,
      north,
      pixel_size,
      nodata: None,
    }
  }

  pub fn utm33n(west: f64, north: f64, pixel_size: f64) -> Self {
    Self {
      epsg: Some(32633),
      ..Self::wgs84(west, north, pixel_size)
    }
  }

  pub fn with_nodata(mut self, nodata: &'static str) -> Self {
    self.nodata = Some(nodata);
    self
  }

  pub fn without_crs(mut self) -> Self {
    self.epsg = None;
    self
  }

  fn geo_keys(&self) -> Vec<u16> {
    let mut keys = vec![1, 1, 0, 0];
    let mut push = |id: u16, value: u16| keys.extend_from_slice(&[id, 0, 1, value]);
    match self.epsg {
      Some(4326) => {
        push(1024, 2);
        push(1025, 1);
        push(2048, 4326);
      }
      Some(code) => {
        push(1024, 1);
        push(1025, 1);
        push(3072, code);
      }
      None => push(1025, 1),
    }
    keys[3] = ((keys.len() - 4) / 4) as u16;
    keys
  }
}

pub fn write_geotiff<C>(path: &Path, width: u32, height: u32, data: &[C::Inner], tags: &GeoTags)
where
  C: ColorType,
  [C::Inner]: TiffValue,
{
  let file = File::create(path).unwrap();
  let mut encoder = TiffEncoder::new(file).unwrap();
  let mut image = encoder.new_image::<C>(width, height).unwrap();

  let dir = image.encoder();
  dir
    .write_tag(
      Tag::ModelPixelScaleTag,
      &[tags.pixel_size, tags.pixel_size, 0.0][..],
    )
    .unwrap();
  dir
    .write_tag(
      Tag::ModelTiepointTag,
      &[0.0, 0.0, 0.0, tags.west, tags.north, 0.0][..],
    )
    .unwrap();
  dir
    .write_tag(Tag::GeoKeyDirectoryTag, &tags.geo_keys()[..])
    .unwrap();
  if let Some(nodata) = tags.nodata {
    dir.write_tag(Tag::GdalNodata, nodata).unwrap();
  }

  image.write_data(data).unwrap();
}

/// 按行给出每个像素的分类值
pub fn classes(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Vec<u8> {
  let mut data = Vec::with_capacity((width * height) as usize);
  for y in 0..height {
    for x in 0..width {
      data.push(f(x, y));
    }
  }
  data
}
