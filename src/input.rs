// 该文件是 Tianlin （田林） 项目的一部分。
// src/input.rs - GeoTIFF 输入与上传暂存
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
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, error};
use url::Url;

use crate::error::InputError;
use crate::raster::{GeoTiff, GeoTiffError};
use crate::{FromUrl, FromUrlWithScheme};

const ACCEPTED_EXTENSIONS: [&str; 2] = ["tif", "tiff"];

fn check_extension(file_name: &str) -> Result<(), InputError> {
  if file_name.is_empty() {
    return Err(InputError::MissingFile);
  }
  let accepted = Path::new(file_name)
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      ACCEPTED_EXTENSIONS
        .iter()
        .any(|accepted| ext.eq_ignore_ascii_case(accepted))
    });
  if accepted {
    Ok(())
  } else {
    Err(InputError::UnsupportedExtension(file_name.to_string()))
  }
}

/// 暂存到临时目录的上传文件，值被释放时文件随之删除
#[derive(Debug)]
pub struct StagedUpload {
  file: NamedTempFile,
  file_name: String,
  size: u64,
}

impl StagedUpload {
  /// 先校验扩展名与大小，通过后才写入临时文件
  pub fn stage<R: Read>(file_name: &str, reader: R, max_bytes: u64) -> Result<Self, InputError> {
    check_extension(file_name)?;

    let mut data = Vec::new();
    reader.take(max_bytes.saturating_add(1)).read_to_end(&mut data)?;
    if data.len() as u64 > max_bytes {
      return Err(InputError::FileTooLarge {
        limit_mb: max_bytes / (1024 * 1024),
      });
    }
    if data.is_empty() {
      return Err(InputError::MissingFile);
    }

    let mut file = tempfile::Builder::new()
      .prefix("tianlin-")
      .suffix(".tif")
      .tempfile()?;
    file.write_all(&data)?;
    file.flush()?;
    debug!("已暂存 {} ({} 字节) 到 {}", file_name, data.len(), file.path().display());

    Ok(Self {
      file,
      file_name: file_name.to_string(),
      size: data.len() as u64,
    })
  }

  pub fn path(&self) -> &Path {
    self.file.path()
  }

  pub fn file_name(&self) -> &str {
    &self.file_name
  }

  pub fn size(&self) -> u64 {
    self.size
  }

  pub fn open(&self) -> Result<GeoTiff, GeoTiffError> {
    GeoTiff::open(self.path())
  }
}

impl Drop for StagedUpload {
  fn drop(&mut self) {
    debug!("删除暂存文件 {}", self.file.path().display());
  }
}

/// `geotiff:///path/to/raster.tif` 形式的本地 GeoTIFF 输入
#[derive(Debug, Clone)]
pub struct GeoTiffInput {
  path: PathBuf,
}

impl FromUrlWithScheme for GeoTiffInput {
  const SCHEME: &'static str = "geotiff";
}

impl FromUrl for GeoTiffInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "输入方式不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch(url.to_string()));
    }
    Ok(Self {
      path: PathBuf::from(url.path()),
    })
  }
}

impl GeoTiffInput {
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 以上传相同的校验规则暂存本地文件
  pub fn stage(&self, max_bytes: u64) -> Result<StagedUpload, InputError> {
    let file_name = self
      .path
      .file_name()
      .and_then(|name| name.to_str())
      .ok_or(InputError::MissingFile)?;
    check_extension(file_name)?;
    let file = File::open(&self.path)?;
    StagedUpload::stage(file_name, file, max_bytes)
  }
}
