// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/model/tracker.rs - 目标跟踪
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

use crate::model::{DetectItem, DetectResult};

const DEFAULT_IOU_THRESHOLD: f32 = 0.3;
const DEFAULT_MAX_AGE: u32 = 30;

pub trait Tracker {
  /// 为检测结果补充跟踪编号
  fn update(&mut self, result: DetectResult) -> DetectResult;
}

/// 两个 [x_min, y_min, x_max, y_max] 框的交并比
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

#[derive(Debug, Clone)]
struct TrackState {
  id: u64,
  class_id: u32,
  bbox: [f32; 4],
  missed: u32,
}

/// 基于 IoU 的贪心关联跟踪器。
///
/// 遮挡后目标可能丢失或更换编号，这是可接受的近似。
/// 模型已经给出的 `track_id` 原样保留。
#[derive(Debug, Clone)]
pub struct IouTracker {
  iou_threshold: f32,
  max_age: u32,
  next_id: u64,
  tracks: Vec<TrackState>,
}

impl Default for IouTracker {
  fn default() -> Self {
    Self::new(DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_AGE)
  }
}

impl IouTracker {
  pub fn new(iou_threshold: f32, max_age: u32) -> Self {
    Self {
      iou_threshold,
      max_age,
      next_id: 1,
      tracks: Vec::new(),
    }
  }

  pub fn active_tracks(&self) -> usize {
    self.tracks.len()
  }
}

impl Tracker for IouTracker {
  fn update(&mut self, result: DetectResult) -> DetectResult {
    let mut items: Vec<DetectItem> = result.items.into_vec();
    let mut track_matched = vec![false; self.tracks.len()];

    // 新分配的编号必须越过模型给出的编号
    if let Some(max_id) = items.iter().filter_map(|item| item.track_id).max() {
      self.next_id = self.next_id.max(max_id.saturating_add(1));
    }

    // 候选配对按 IoU 从高到低贪心分配
    let mut candidates = Vec::new();
    for (di, item) in items.iter().enumerate() {
      if item.track_id.is_some() {
        continue;
      }
      for (ti, track) in self.tracks.iter().enumerate() {
        if track.class_id != item.class_id {
          continue;
        }
        let overlap = iou(&item.bbox, &track.bbox);
        if overlap >= self.iou_threshold {
          candidates.push((overlap, di, ti));
        }
      }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut assigned = vec![None; items.len()];
    for (_, di, ti) in candidates {
      if assigned[di].is_some() || track_matched[ti] {
        continue;
      }
      assigned[di] = Some(ti);
      track_matched[ti] = true;
    }

    let mut born = Vec::new();
    for (di, item) in items.iter_mut().enumerate() {
      if let Some(id) = item.track_id {
        // 模型自带编号，同步到已有轨迹上
        match self.tracks.iter().position(|t| t.id == id) {
          Some(ti) => {
            self.tracks[ti].bbox = item.bbox;
            if ti < track_matched.len() {
              track_matched[ti] = true;
            }
          }
          None => born.push(TrackState {
            id,
            class_id: item.class_id,
            bbox: item.bbox,
            missed: 0,
          }),
        }
        continue;
      }

      match assigned[di] {
        Some(ti) => {
          let track = &mut self.tracks[ti];
          track.bbox = item.bbox;
          track.missed = 0;
          item.track_id = Some(track.id);
        }
        None => {
          let id = self.next_id;
          self.next_id += 1;
          item.track_id = Some(id);
          born.push(TrackState {
            id,
            class_id: item.class_id,
            bbox: item.bbox,
            missed: 0,
          });
        }
      }
    }

    for (track, matched) in self.tracks.iter_mut().zip(track_matched.iter()) {
      if *matched {
        track.missed = 0;
      } else {
        track.missed += 1;
      }
    }
    let max_age = self.max_age;
    self.tracks.retain(|track| track.missed <= max_age);
    self.tracks.extend(born);

    DetectResult::from(items)
  }
}
