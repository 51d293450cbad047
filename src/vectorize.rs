// 该文件是 Tianlin （田林） 项目的一部分。
// src/vectorize.rs - 地类栅格矢量化
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

use std::fmt;
use std::str::FromStr;

use geo::algorithm::line_intersection::{LineIntersection, line_intersection};
use geo::algorithm::orient::{Direction, Orient};
use geo::{Area, BoundingRect, Contains, Coord, Intersects, LineString, MapCoords, Polygon, SimplifyVwPreserve};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value, feature::Id};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{LandCoverCodes, VectorizeConfig};
use crate::error::{InputError, PipelineError};
use crate::georef::{CoordTransformer, GeorefError};
use crate::raster::{ClassifiedRaster, RasterError};

mod polygonize;
pub use self::polygonize::{PixelPolygon, polygonize};

/// GeoJSON 中以经纬度轴顺序表示 WGS84 的 CRS 名称
pub const CRS84_URN: &str = "urn:ogc:def:crs:OGC:1.3:CRS84";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandType {
  Trees,
  Crops,
}

impl LandType {
  pub fn as_str(&self) -> &'static str {
    match self {
      LandType::Trees => "trees",
      LandType::Crops => "crops",
    }
  }

  pub fn code(&self, codes: &LandCoverCodes) -> i64 {
    match self {
      LandType::Trees => codes.trees,
      LandType::Crops => codes.crops,
    }
  }
}

impl FromStr for LandType {
  type Err = InputError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "trees" => Ok(LandType::Trees),
      "crops" => Ok(LandType::Crops),
      _ => Err(InputError::InvalidLandType(s.to_string())),
    }
  }
}

impl fmt::Display for LandType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 过滤后没有剩余要素，属于正常的业务结果
#[derive(Error, Debug)]
#[error("在提供的 GeoTIFF 中未检测到 {land_type}")]
pub struct NoFeaturesFound {
  pub land_type: LandType,
}

/// 一个连通区域对应的多边形
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFeature {
  pub id: usize,
  pub geometry: Polygon<f64>,
  pub class_value: f64,
}

/// 分类栅格到 GeoJSON 要素集合的转换
///
/// 各步骤都是输入栅格与容差的纯函数，不依赖外部状态。
#[derive(Debug, Clone)]
pub struct RasterVectorizer {
  simplify_tolerance: f64,
  codes: LandCoverCodes,
}

impl RasterVectorizer {
  pub fn new(simplify_tolerance: f64, codes: LandCoverCodes) -> Self {
    Self {
      simplify_tolerance,
      codes,
    }
  }

  pub fn from_config(config: &VectorizeConfig) -> Self {
    Self::new(config.simplify_tolerance, config.land_cover_codes)
  }

  /// 提取所有有效区域，顶点为像素角点经仿射变换后的投影坐标
  pub fn extract(&self, raster: &ClassifiedRaster) -> Vec<VectorFeature> {
    let affine = raster.transform;
    let to_ring = |ring: &[(u32, u32)]| -> LineString<f64> {
      ring
        .iter()
        .map(|&(col, row)| {
          let (x, y) = affine.apply(col as f64, row as f64);
          Coord { x, y }
        })
        .collect()
    };

    polygonize(raster)
      .into_iter()
      .map(|polygon| VectorFeature {
        id: polygon.region,
        geometry: Polygon::new(
          to_ring(polygon.exterior.as_slice()),
          polygon.holes.iter().map(|hole| to_ring(hole.as_slice())).collect(),
        )
        .orient(Direction::Default),
        class_value: polygon.value,
      })
      .collect()
  }

  pub fn filter_class(
    &self,
    features: Vec<VectorFeature>,
    land_type: LandType,
  ) -> Result<Vec<VectorFeature>, NoFeaturesFound> {
    let code = land_type.code(&self.codes) as f64;
    let matched: Vec<VectorFeature> = features
      .into_iter()
      .filter(|f| f.class_value == code)
      .collect();
    if matched.is_empty() {
      return Err(NoFeaturesFound { land_type });
    }
    Ok(matched)
  }

  pub fn reproject(
    &self,
    features: Vec<VectorFeature>,
    transformer: &CoordTransformer,
  ) -> Result<Vec<VectorFeature>, GeorefError> {
    features
      .into_iter()
      .map(|feature| {
        let geometry = feature.geometry.try_map_coords(|c| {
          let (x, y) = transformer.transform(c.x, c.y)?;
          Ok::<_, GeorefError>(Coord { x, y })
        })?;
        Ok(VectorFeature {
          geometry: geometry.orient(Direction::Default),
          ..feature
        })
      })
      .collect()
  }

  /// 保持拓扑的 Visvalingam–Whyatt 简化，面积阈值为容差的平方
  ///
  /// 简化后退化（面积为零或外环不足 4 个坐标）或环之间相交、
  /// 内环越出外环的多边形保留原几何。
  pub fn simplify(&self, features: Vec<VectorFeature>) -> Vec<VectorFeature> {
    let epsilon = self.simplify_tolerance * self.simplify_tolerance;
    features
      .into_iter()
      .map(|feature| {
        let simplified = feature.geometry.simplify_vw_preserve(&epsilon);
        if simplified.unsigned_area() <= 0.0 || simplified.exterior().0.len() < 4 {
          debug!("要素 {} 简化后退化，保留原几何", feature.id);
          feature
        } else if !rings_are_valid(&simplified) {
          debug!("要素 {} 简化后环相交，保留原几何", feature.id);
          feature
        } else {
          VectorFeature {
            geometry: simplified,
            ..feature
          }
        }
      })
      .collect()
  }

  pub fn to_feature_collection(
    &self,
    features: &[VectorFeature],
    land_type: LandType,
  ) -> FeatureCollection {
    let features = features
      .iter()
      .map(|feature| {
        let mut properties = JsonObject::new();
        properties.insert("value".to_string(), json!(feature.class_value));
        Feature {
          bbox: None,
          geometry: Some(Geometry::new(polygon_value(&feature.geometry))),
          id: Some(Id::String(feature.id.to_string())),
          properties: Some(properties),
          foreign_members: None,
        }
      })
      .collect();

    let mut foreign_members = JsonObject::new();
    foreign_members.insert("name".to_string(), json!(land_type.as_str()));
    foreign_members.insert(
      "crs".to_string(),
      json!({ "type": "name", "properties": { "name": CRS84_URN } }),
    );

    FeatureCollection {
      bbox: None,
      features,
      foreign_members: Some(foreign_members),
    }
  }

  /// 完整流程：提取、按地类过滤、投影到 WGS84、简化、打包
  pub fn vectorize(
    &self,
    raster: &ClassifiedRaster,
    land_type: LandType,
  ) -> Result<FeatureCollection, PipelineError> {
    let crs = raster.crs.ok_or(RasterError::MissingCrs)?;
    let transformer = CoordTransformer::to_wgs84(crs)?;

    let features = self.extract(raster);
    debug!("提取到 {} 个区域", features.len());
    let features = self.filter_class(features, land_type)?;
    let features = self.reproject(features, &transformer)?;
    let features = self.simplify(features);
    info!("{} 矢量化完成，共 {} 个要素", land_type, features.len());

    Ok(self.to_feature_collection(&features, land_type))
  }
}

/// 两个环之间只允许在单个点处相接
fn rings_meet_properly(a: &LineString<f64>, b: &LineString<f64>) -> bool {
  if let (Some(ra), Some(rb)) = (a.bounding_rect(), b.bounding_rect())
    && !ra.intersects(&rb)
  {
    return true;
  }

  let mut touch: Option<Coord<f64>> = None;
  for la in a.lines() {
    for lb in b.lines() {
      match line_intersection(la, lb) {
        None => {}
        Some(LineIntersection::Collinear { .. }) => return false,
        Some(LineIntersection::SinglePoint {
          is_proper: true, ..
        }) => return false,
        Some(LineIntersection::SinglePoint { intersection, .. }) => match touch {
          None => touch = Some(intersection),
          Some(point) if point == intersection => {}
          Some(_) => return false,
        },
      }
    }
  }
  true
}

/// 环两两之间不交叉，内环位于外环之内且互不包含
fn rings_are_valid(polygon: &Polygon<f64>) -> bool {
  let exterior = polygon.exterior();
  let interiors = polygon.interiors();
  let shell = Polygon::new(exterior.clone(), Vec::new());

  for (i, hole) in interiors.iter().enumerate() {
    if !rings_meet_properly(exterior, hole) {
      return false;
    }
    if !hole.coords().all(|c| shell.intersects(c)) {
      return false;
    }
    for other in &interiors[i + 1..] {
      if !rings_meet_properly(hole, other) {
        return false;
      }
      let other_area = Polygon::new(other.clone(), Vec::new());
      let hole_area = Polygon::new(hole.clone(), Vec::new());
      if hole.coords().any(|c| other_area.contains(c))
        || other.coords().any(|c| hole_area.contains(c))
      {
        return false;
      }
    }
  }
  true
}

fn ring_positions(ring: &LineString<f64>) -> Vec<Vec<f64>> {
  ring.coords().map(|c| vec![c.x, c.y]).collect()
}

fn polygon_value(polygon: &Polygon<f64>) -> Value {
  let mut rings = vec![ring_positions(polygon.exterior())];
  rings.extend(polygon.interiors().iter().map(ring_positions));
  Value::Polygon(rings)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::FailureKind;
  use crate::georef::{AffineTransform, Crs};
  use approx::assert_abs_diff_eq;
  use geo::{Intersects, Line, Winding};

  fn raster(width: u32, values: Vec<f64>, transform: AffineTransform) -> ClassifiedRaster {
    ClassifiedRaster {
      width,
      height: values.len() as u32 / width,
      values,
      transform,
      crs: Some(Crs::WGS84),
      nodata: 0.0,
    }
  }

  fn vectorizer() -> RasterVectorizer {
    RasterVectorizer::from_config(&VectorizeConfig::default())
  }

  /// 圆盘形的树木区域，边界是阶梯状的像素边
  fn disc(size: u32, pixel: f64) -> ClassifiedRaster {
    let r = size as f64 / 2.0 - 1.0;
    let c = size as f64 / 2.0;
    let values = (0..size * size)
      .map(|i| {
        let (x, y) = ((i % size) as f64 + 0.5, (i / size) as f64 + 0.5);
        if (x - c).powi(2) + (y - c).powi(2) <= r * r {
          2.0
        } else {
          5.0
        }
      })
      .collect();
    raster(size, values, AffineTransform::from_origin(10.0, 50.0, pixel, pixel))
  }

  fn has_self_intersection(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring.lines().collect();
    let n = lines.len();
    for i in 0..n {
      for j in i + 2..n {
        if i == 0 && j == n - 1 {
          continue;
        }
        if lines[i].intersects(&lines[j]) {
          return true;
        }
      }
    }
    false
  }

  #[test]
  fn parses_land_type_case_insensitively() {
    assert_eq!("Trees".parse::<LandType>().unwrap(), LandType::Trees);
    assert_eq!("CROPS".parse::<LandType>().unwrap(), LandType::Crops);
    assert!(matches!(
      "water".parse::<LandType>(),
      Err(InputError::InvalidLandType(_))
    ));
    assert_eq!(LandType::Crops.code(&LandCoverCodes::default()), 5);
  }

  #[test]
  fn filters_to_target_class() {
    #[rustfmt::skip]
    let r = raster(3, vec![
      2.0, 2.0, 5.0,
      2.0, 5.0, 5.0,
      0.0, 0.0, 2.0,
    ], AffineTransform::IDENTITY);
    let v = vectorizer();
    let features = v.extract(&r);
    assert_eq!(features.len(), 3);

    let trees = v.filter_class(features.clone(), LandType::Trees).unwrap();
    assert_eq!(trees.len(), 2);
    assert!(trees.iter().all(|f| f.class_value == 2.0));

    let crops = v.filter_class(features, LandType::Crops).unwrap();
    assert_eq!(crops.len(), 1);
    assert_abs_diff_eq!(crops[0].geometry.unsigned_area(), 3.0);
  }

  #[test]
  fn absent_class_is_no_features_found() {
    let r = raster(2, vec![5.0, 5.0, 0.0, 5.0], AffineTransform::IDENTITY);
    let err = vectorizer().vectorize(&r, LandType::Trees).unwrap_err();
    assert_eq!(err.kind(), FailureKind::NoFeaturesFound);
  }

  #[test]
  fn missing_crs_fails_before_extraction() {
    let mut r = raster(1, vec![2.0], AffineTransform::IDENTITY);
    r.crs = None;
    let err = vectorizer().vectorize(&r, LandType::Trees).unwrap_err();
    assert_eq!(err.kind(), FailureKind::RasterError);
  }

  #[test]
  fn extracted_rings_follow_right_hand_rule() {
    #[rustfmt::skip]
    let r = raster(3, vec![
      2.0, 2.0, 2.0,
      2.0, 5.0, 2.0,
      2.0, 2.0, 2.0,
    ], AffineTransform::from_origin(100.0, 200.0, 10.0, 10.0));
    let features = vectorizer().extract(&r);
    let ring = &features[0].geometry;
    assert_eq!(ring.interiors().len(), 1);
    // 外环逆时针，内环顺时针
    assert!(ring.exterior().is_ccw());
    assert!(ring.interiors()[0].is_cw());
    assert_abs_diff_eq!(ring.unsigned_area(), 800.0);
  }

  #[test]
  fn simplification_reduces_vertices_safely() {
    let r = disc(40, 0.00005);
    let v = vectorizer();
    let features = v.filter_class(v.extract(&r), LandType::Trees).unwrap();
    assert_eq!(features.len(), 1);
    let before = &features[0].geometry;

    let simplified = v.simplify(features.clone());
    let after = &simplified[0].geometry;

    assert!(after.exterior().0.len() < before.exterior().0.len());
    assert!(after.exterior().0.len() >= 4);
    assert!(after.unsigned_area() > 0.0);
    assert!(!has_self_intersection(after.exterior()));
    // 面积变化不超过原面积的 10%
    assert!((after.unsigned_area() - before.unsigned_area()).abs() < 0.1 * before.unsigned_area());
  }

  fn ring(points: &[(f64, f64)]) -> LineString<f64> {
    points.iter().map(|&(x, y)| Coord { x, y }).collect()
  }

  /// 不同环之间的真交叉、共线重叠，以及越出外环的内环顶点数
  fn ring_violations(polygon: &Polygon<f64>) -> usize {
    let mut rings = vec![polygon.exterior()];
    rings.extend(polygon.interiors());
    let mut count = 0;
    for i in 0..rings.len() {
      for j in i + 1..rings.len() {
        for a in rings[i].lines() {
          for b in rings[j].lines() {
            match line_intersection(a, b) {
              Some(LineIntersection::SinglePoint {
                is_proper: false, ..
              })
              | None => {}
              Some(_) => count += 1,
            }
          }
        }
      }
    }
    let shell = Polygon::new(polygon.exterior().clone(), Vec::new());
    for hole in polygon.interiors() {
      count += hole.coords().filter(|c| !shell.intersects(*c)).count();
    }
    count
  }

  /// 以树木为主、夹杂作物与 nodata 的噪声栅格
  fn noisy_raster(seed: u64, size: u32, pixel: f64) -> ClassifiedRaster {
    let mut state = seed;
    let values = (0..size * size)
      .map(|_| {
        state = state
          .wrapping_mul(6364136223846793005)
          .wrapping_add(1442695040888963407);
        match (state >> 33) % 10 {
          0..=5 => 2.0,
          6..=8 => 5.0,
          _ => 0.0,
        }
      })
      .collect();
    raster(size, values, AffineTransform::from_origin(10.0, 50.0, pixel, pixel))
  }

  #[test]
  fn ring_checks_accept_touching_and_reject_crossing() {
    let square = ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]);

    // 内环在一个顶点处与外环相接
    let touching = Polygon::new(
      square.clone(),
      vec![ring(&[(0.0, 0.0), (1.0, 2.0), (2.0, 1.0), (0.0, 0.0)])],
    );
    assert!(rings_are_valid(&touching));

    let crossing = Polygon::new(
      square.clone(),
      vec![ring(&[(3.0, 1.0), (5.0, 1.0), (5.0, 2.0), (3.0, 2.0), (3.0, 1.0)])],
    );
    assert!(!rings_are_valid(&crossing));

    let outside = Polygon::new(
      square.clone(),
      vec![ring(&[(5.0, 1.0), (6.0, 1.0), (6.0, 2.0), (5.0, 1.0)])],
    );
    assert!(!rings_are_valid(&outside));

    let nested = Polygon::new(
      square,
      vec![
        ring(&[(1.0, 1.0), (3.0, 1.0), (3.0, 3.0), (1.0, 3.0), (1.0, 1.0)]),
        ring(&[(1.5, 1.5), (2.5, 1.5), (2.5, 2.5), (1.5, 1.5)]),
      ],
    );
    assert!(!rings_are_valid(&nested));
  }

  #[test]
  fn simplification_never_pushes_a_hole_outside() {
    // 顶部三角形尖角内有一个小内环，删去尖角会使内环落到外环之外
    let exterior = ring(&[
      (0.0, 0.0),
      (10.0, 0.0),
      (10.0, 10.0),
      (6.0, 10.0),
      (5.0, 11.0),
      (4.0, 10.0),
      (0.0, 10.0),
      (0.0, 0.0),
    ]);
    let hole = ring(&[(4.9, 10.2), (4.9, 10.4), (5.1, 10.4), (5.1, 10.2), (4.9, 10.2)]);
    let feature = VectorFeature {
      id: 0,
      geometry: Polygon::new(exterior, vec![hole]),
      class_value: 2.0,
    };
    assert!(rings_are_valid(&feature.geometry));

    let v = RasterVectorizer::new(2.0, LandCoverCodes::default());
    let simplified = v.simplify(vec![feature]);
    let after = &simplified[0].geometry;

    assert!(rings_are_valid(after));
    assert_eq!(ring_violations(after), 0);
    assert!(after.exterior().coords().any(|c| *c == Coord { x: 5.0, y: 11.0 }));
  }

  #[test]
  fn simplified_noisy_rasters_keep_valid_rings() {
    let v = vectorizer();
    let mut holed = 0;
    for seed in 0..60 {
      let r = noisy_raster(seed, 24, 0.00005);
      let features = v.extract(&r);
      for (before, after) in features.iter().zip(v.simplify(features.clone())) {
        assert_eq!(ring_violations(&before.geometry), 0, "seed {} 要素 {}", seed, before.id);
        assert_eq!(ring_violations(&after.geometry), 0, "seed {} 要素 {}", seed, after.id);
        assert!(after.geometry.unsigned_area() > 0.0);
        if !after.geometry.interiors().is_empty() {
          holed += 1;
        }
      }
    }
    assert!(holed > 0);
  }

  #[test]
  fn tiny_polygon_never_collapses() {
    let r = raster(1, vec![2.0], AffineTransform::from_origin(0.0, 0.0, 1e-6, 1e-6));
    let v = vectorizer();
    let simplified = v.simplify(v.extract(&r));
    assert!(simplified[0].geometry.unsigned_area() > 0.0);
    assert!(simplified[0].geometry.exterior().0.len() >= 4);
  }

  #[test]
  fn feature_collection_envelope() {
    let r = raster(2, vec![2.0, 0.0, 0.0, 0.0], AffineTransform::from_origin(10.0, 50.0, 0.5, 0.5));
    let collection = vectorizer().vectorize(&r, LandType::Trees).unwrap();
    let json = serde_json::to_value(&collection).unwrap();

    assert_eq!(json["type"], "FeatureCollection");
    assert_eq!(json["name"], "trees");
    assert_eq!(json["crs"]["properties"]["name"], CRS84_URN);

    let feature = &json["features"][0];
    assert_eq!(feature["id"], "0");
    assert_eq!(feature["properties"]["value"], 2.0);
    assert_eq!(feature["geometry"]["type"], "Polygon");
    let ring = feature["geometry"]["coordinates"][0].as_array().unwrap();
    assert_eq!(ring.first(), ring.last());
    for position in ring {
      let lon = position[0].as_f64().unwrap();
      let lat = position[1].as_f64().unwrap();
      assert!((10.0..=10.5).contains(&lon));
      assert!((49.5..=50.0).contains(&lat));
    }
  }

  #[test]
  fn reprojects_projected_coordinates() {
    let mut r = raster(
      2,
      vec![2.0, 2.0, 2.0, 2.0],
      AffineTransform::from_origin(500_000.0, 5_000_000.0, 10.0, 10.0),
    );
    r.crs = Some(Crs::from_epsg(32633));
    let collection = vectorizer().vectorize(&r, LandType::Trees).unwrap();
    let Some(Geometry {
      value: Value::Polygon(rings),
      ..
    }) = &collection.features[0].geometry
    else {
      panic!("期望 Polygon 几何");
    };
    for position in &rings[0] {
      // UTM 33N 中央经线为 15°E
      assert_abs_diff_eq!(position[0], 15.0, epsilon = 0.01);
      assert!(position[1] > 45.0 && position[1] < 45.5);
    }
  }
}
