// 该文件是 Tianlin （田林） 项目的一部分。
// src/vectorize/polygonize.rs - 分类栅格区域提取与边界追踪
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

use std::collections::HashMap;

use geo::{Contains, Coord, LineString, Point, Polygon};

use crate::raster::ClassifiedRaster;

const UNLABELLED: usize = usize::MAX;

/// 像素角点坐标
pub type Vertex = (u32, u32);

/// 像素角点坐标下的多边形，环不重复首点
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPolygon {
  pub region: usize,
  pub value: f64,
  pub exterior: Vec<Vertex>,
  pub holes: Vec<Vec<Vertex>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Dir {
  East,
  South,
  West,
  North,
}

impl Dir {
  fn step(self) -> (i64, i64) {
    match self {
      Dir::East => (1, 0),
      Dir::South => (0, 1),
      Dir::West => (-1, 0),
      Dir::North => (0, -1),
    }
  }

  /// 区域内部始终位于行进方向的这一侧
  fn inward(self) -> Dir {
    match self {
      Dir::East => Dir::South,
      Dir::South => Dir::West,
      Dir::West => Dir::North,
      Dir::North => Dir::East,
    }
  }

  fn outward(self) -> Dir {
    match self {
      Dir::East => Dir::North,
      Dir::North => Dir::West,
      Dir::West => Dir::South,
      Dir::South => Dir::East,
    }
  }

  fn between(from: Vertex, to: Vertex) -> Dir {
    match (to.0.cmp(&from.0), to.1.cmp(&from.1)) {
      (std::cmp::Ordering::Greater, _) => Dir::East,
      (std::cmp::Ordering::Less, _) => Dir::West,
      (_, std::cmp::Ordering::Greater) => Dir::South,
      _ => Dir::North,
    }
  }
}

/// 单位长度的有向边界边
#[derive(Debug, Clone, Copy)]
struct Edge {
  start: Vertex,
  dir: Dir,
  region: usize,
}

impl Edge {
  fn end(&self) -> Vertex {
    let (dx, dy) = self.dir.step();
    (
      (self.start.0 as i64 + dx) as u32,
      (self.start.1 as i64 + dy) as u32,
    )
  }
}

fn same_value(a: f64, b: f64) -> bool {
  a == b || (a.is_nan() && b.is_nan())
}

/// 4 连通、值相同的有效像素标记为同一区域，区域编号按首个像素的行优先顺序
fn label_regions(raster: &ClassifiedRaster) -> (Vec<usize>, Vec<f64>) {
  let (w, h) = (raster.width as usize, raster.height as usize);
  let mut labels = vec![UNLABELLED; w * h];
  let mut values = Vec::new();
  let mut stack = Vec::new();

  for start in 0..w * h {
    let value = raster.values[start];
    if labels[start] != UNLABELLED || !raster.is_valid_value(value) {
      continue;
    }
    let id = values.len();
    values.push(value);
    labels[start] = id;
    stack.push(start);

    while let Some(i) = stack.pop() {
      let (x, y) = (i % w, i / w);
      let neighbours = [
        (x > 0).then(|| i - 1),
        (x + 1 < w).then(|| i + 1),
        (y > 0).then(|| i - w),
        (y + 1 < h).then(|| i + w),
      ];
      for j in neighbours.into_iter().flatten() {
        if labels[j] == UNLABELLED && same_value(raster.values[j], value) {
          labels[j] = id;
          stack.push(j);
        }
      }
    }
  }

  (labels, values)
}

fn boundary_edges(labels: &[usize], width: u32, height: u32) -> Vec<Edge> {
  let label_at = |x: i64, y: i64| -> usize {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
      UNLABELLED
    } else {
      labels[y as usize * width as usize + x as usize]
    }
  };

  let mut edges = Vec::new();
  for y in 0..height {
    for x in 0..width {
      let region = labels[y as usize * width as usize + x as usize];
      if region == UNLABELLED {
        continue;
      }
      let (xi, yi) = (x as i64, y as i64);
      let mut push = |start: Vertex, dir: Dir| edges.push(Edge { start, dir, region });
      if label_at(xi, yi - 1) != region {
        push((x, y), Dir::East);
      }
      if label_at(xi + 1, yi) != region {
        push((x + 1, y), Dir::South);
      }
      if label_at(xi, yi + 1) != region {
        push((x + 1, y + 1), Dir::West);
      }
      if label_at(xi - 1, yi) != region {
        push((x, y + 1), Dir::North);
      }
    }
  }
  edges
}

/// 沿边界边追踪闭合环，只保留方向改变处的角点
fn trace_rings(edges: &[Edge]) -> Vec<(usize, Vec<Vertex>)> {
  let index: HashMap<(usize, Vertex, Dir), usize> = edges
    .iter()
    .enumerate()
    .map(|(i, e)| ((e.region, e.start, e.dir), i))
    .collect();

  let mut visited = vec![false; edges.len()];
  let mut rings = Vec::new();

  for start in 0..edges.len() {
    if visited[start] {
      continue;
    }
    let mut ring = Vec::new();
    let mut current = start;
    loop {
      visited[current] = true;
      ring.push(current);
      let edge = &edges[current];
      let end = edge.end();
      let next = [edge.dir.inward(), edge.dir, edge.dir.outward()]
        .into_iter()
        .find_map(|dir| index.get(&(edge.region, end, dir)).copied());
      match next {
        Some(next) if !visited[next] => current = next,
        _ => break,
      }
    }

    let corners: Vec<Vertex> = (0..ring.len())
      .filter(|&i| {
        let prev = ring[(i + ring.len() - 1) % ring.len()];
        edges[prev].dir != edges[ring[i]].dir
      })
      .map(|i| edges[ring[i]].start)
      .collect();

    for piece in split_at_pinches(corners) {
      rings.push((edges[start].region, piece));
    }
  }
  rings
}

/// 在同一环内重复出现的顶点处拆分，保证每个环都是简单环
fn split_at_pinches(corners: Vec<Vertex>) -> Vec<Vec<Vertex>> {
  let mut pieces = Vec::new();
  let mut stack: Vec<Vertex> = Vec::with_capacity(corners.len());
  let mut position: HashMap<Vertex, usize> = HashMap::new();

  for vertex in corners {
    if let Some(&at) = position.get(&vertex) {
      let piece: Vec<Vertex> = stack.drain(at..).collect();
      for v in &piece {
        position.remove(v);
      }
      pieces.push(piece);
    }
    position.insert(vertex, stack.len());
    stack.push(vertex);
  }
  pieces.push(stack);
  pieces
}

/// 鞋带公式的两倍面积，像素坐标下外环为正、内环为负
fn doubled_area(ring: &[Vertex]) -> i64 {
  (0..ring.len())
    .map(|i| {
      let (x0, y0) = ring[i];
      let (x1, y1) = ring[(i + 1) % ring.len()];
      x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
    })
    .sum()
}

/// 与环首条边相邻的区域像素中心
fn probe(ring: &[Vertex]) -> Point<f64> {
  let (x, y) = ring[0];
  let dir = Dir::between(ring[0], ring[1 % ring.len()]);
  let (dx, dy) = dir.step();
  let (ix, iy) = dir.inward().step();
  Point::new(
    x as f64 + 0.5 * (dx + ix) as f64,
    y as f64 + 0.5 * (dy + iy) as f64,
  )
}

fn to_line_string(ring: &[Vertex]) -> LineString<f64> {
  ring
    .iter()
    .map(|&(x, y)| Coord {
      x: x as f64,
      y: y as f64,
    })
    .collect()
}

/// 提取所有区域的多边形，结果按区域编号排列
pub fn polygonize(raster: &ClassifiedRaster) -> Vec<PixelPolygon> {
  let (labels, values) = label_regions(raster);
  let edges = boundary_edges(&labels, raster.width, raster.height);

  let mut exteriors: Vec<Vec<Vec<Vertex>>> = vec![Vec::new(); values.len()];
  let mut holes: Vec<Vec<Vec<Vertex>>> = vec![Vec::new(); values.len()];
  for (region, ring) in trace_rings(&edges) {
    match doubled_area(&ring) {
      a if a > 0 => exteriors[region].push(ring),
      a if a < 0 => holes[region].push(ring),
      _ => {}
    }
  }

  let mut polygons = Vec::new();
  for (region, (shells, region_holes)) in exteriors.into_iter().zip(holes).enumerate() {
    let mut assigned: Vec<Vec<Vec<Vertex>>> = vec![Vec::new(); shells.len()];
    if shells.len() == 1 {
      assigned[0] = region_holes;
    } else {
      let outlines: Vec<Polygon<f64>> = shells
        .iter()
        .map(|shell| Polygon::new(to_line_string(shell), Vec::new()))
        .collect();
      for hole in region_holes {
        let point = probe(&hole);
        if let Some(owner) = outlines.iter().position(|outline| outline.contains(&point)) {
          assigned[owner].push(hole);
        }
      }
    }

    for (exterior, holes) in shells.into_iter().zip(assigned) {
      polygons.push(PixelPolygon {
        region,
        value: values[region],
        exterior,
        holes,
      });
    }
  }
  polygons
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::georef::AffineTransform;

  fn raster(width: u32, values: &[f64]) -> ClassifiedRaster {
    ClassifiedRaster {
      width,
      height: values.len() as u32 / width,
      values: values.to_vec(),
      transform: AffineTransform::IDENTITY,
      crs: None,
      nodata: 0.0,
    }
  }

  fn area(ring: &[Vertex]) -> f64 {
    doubled_area(ring) as f64 / 2.0
  }

  fn assert_simple(ring: &[Vertex]) {
    let mut seen = std::collections::HashSet::new();
    for v in ring {
      assert!(seen.insert(*v), "环内顶点 {:?} 重复", v);
    }
  }

  #[test]
  fn block_becomes_rectangle() {
    let polygons = polygonize(&raster(2, &[2.0, 2.0, 2.0, 2.0]));
    assert_eq!(polygons.len(), 1);
    assert_eq!(polygons[0].exterior, vec![(0, 0), (2, 0), (2, 2), (0, 2)]);
    assert!(polygons[0].holes.is_empty());
  }

  #[test]
  fn nodata_is_not_a_region() {
    let polygons = polygonize(&raster(3, &[0.0, 2.0, 0.0]));
    assert_eq!(polygons.len(), 1);
    assert_eq!(polygons[0].value, 2.0);
    assert_eq!(area(&polygons[0].exterior), 1.0);
  }

  #[test]
  fn enclosed_region_becomes_hole() {
    #[rustfmt::skip]
    let polygons = polygonize(&raster(3, &[
      2.0, 2.0, 2.0,
      2.0, 5.0, 2.0,
      2.0, 2.0, 2.0,
    ]));
    assert_eq!(polygons.len(), 2);

    let outer = &polygons[0];
    assert_eq!(outer.value, 2.0);
    assert_eq!(area(&outer.exterior), 9.0);
    assert_eq!(outer.holes.len(), 1);
    assert_eq!(area(&outer.holes[0]), -1.0);

    let inner = &polygons[1];
    assert_eq!(inner.value, 5.0);
    assert_eq!(inner.exterior, vec![(1, 1), (2, 1), (2, 2), (1, 2)]);
  }

  #[test]
  fn diagonal_neighbours_are_separate_regions() {
    let polygons = polygonize(&raster(2, &[2.0, 5.0, 5.0, 2.0]));
    assert_eq!(polygons.len(), 4);
    for polygon in &polygons {
      assert_eq!(area(&polygon.exterior), 1.0);
      assert!(polygon.holes.is_empty());
    }
  }

  #[test]
  fn pinch_between_shell_and_hole() {
    #[rustfmt::skip]
    let polygons = polygonize(&raster(3, &[
      2.0, 2.0, 2.0,
      2.0, 5.0, 2.0,
      2.0, 2.0, 5.0,
    ]));
    let twos: Vec<_> = polygons.iter().filter(|p| p.value == 2.0).collect();
    assert_eq!(twos.len(), 1);
    assert_eq!(area(&twos[0].exterior), 8.0);
    assert_eq!(twos[0].holes.len(), 1);
    assert_eq!(area(&twos[0].holes[0]), -1.0);
    assert_simple(&twos[0].exterior);
    assert_simple(&twos[0].holes[0]);
  }

  #[test]
  fn pinch_between_two_holes() {
    #[rustfmt::skip]
    let polygons = polygonize(&raster(4, &[
      2.0, 2.0, 2.0, 2.0,
      2.0, 5.0, 2.0, 2.0,
      2.0, 2.0, 5.0, 2.0,
      2.0, 2.0, 2.0, 2.0,
    ]));
    let twos: Vec<_> = polygons.iter().filter(|p| p.value == 2.0).collect();
    assert_eq!(twos.len(), 1);
    assert_eq!(area(&twos[0].exterior), 16.0);
    assert_eq!(twos[0].holes.len(), 2);
    for hole in &twos[0].holes {
      assert_eq!(area(hole), -1.0);
      assert_simple(hole);
    }
    assert_eq!(polygons.iter().filter(|p| p.value == 5.0).count(), 2);
  }

  #[test]
  fn regions_cover_valid_area() {
    #[rustfmt::skip]
    let values = [
      2.0, 2.0, 5.0, 0.0,
      2.0, 5.0, 5.0, 2.0,
      0.0, 5.0, 2.0, 2.0,
    ];
    let polygons = polygonize(&raster(4, &values));
    let total: f64 = polygons
      .iter()
      .map(|p| area(&p.exterior) + p.holes.iter().map(|h| area(h)).sum::<f64>())
      .sum();
    let valid = values.iter().filter(|&&v| v != 0.0).count() as f64;
    assert_eq!(total, valid);
  }
}
