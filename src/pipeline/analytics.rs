// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/pipeline/analytics.rs - 人数统计
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

use serde::{Deserialize, Serialize};

/// 一次批处理的汇总结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunAnalytics {
  pub peak_count: u32,
  /// 保留两位小数，四舍五入（half up）
  pub average_count: f64,
  pub total_frames: u64,
}

impl RunAnalytics {
  pub fn from_counts(counts: &[u32]) -> Self {
    counts
      .iter()
      .fold(CountAccumulator::default(), |mut acc, &count| {
        acc.push(count);
        acc
      })
      .finish()
  }
}

/// 按帧顺序累积人数
#[derive(Debug, Clone, Default)]
pub struct CountAccumulator {
  peak: u32,
  sum: u64,
  frames: u64,
}

impl CountAccumulator {
  pub fn push(&mut self, count: u32) {
    self.peak = self.peak.max(count);
    self.sum += u64::from(count);
    self.frames += 1;
  }

  pub fn frames(&self) -> u64 {
    self.frames
  }

  pub fn finish(&self) -> RunAnalytics {
    RunAnalytics {
      peak_count: self.peak,
      average_count: round_average(self.sum, self.frames),
      total_frames: self.frames,
    }
  }
}

// floor(sum * 100 / n + 1/2) 用整数精确计算
fn round_average(sum: u64, frames: u64) -> f64 {
  if frames == 0 {
    return 0.0;
  }
  let (sum, n) = (u128::from(sum), u128::from(frames));
  let centi = (sum * 200 + n) / (2 * n);
  centi as f64 / 100.0
}
