// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/model/gate.rs - 推理槽位限制
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

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::debug;

use crate::{
  frame::Frame,
  model::{DetectResult, Model, ModelError, SharedModel},
};

/// 推理后端不保证可重入时，用固定数量的槽位串行化对模型的访问。
pub struct InferenceGate {
  inner: SharedModel,
  free_slots: Mutex<usize>,
  released: Condvar,
}

struct SlotGuard<'a> {
  gate: &'a InferenceGate,
}

impl Drop for SlotGuard<'_> {
  fn drop(&mut self) {
    let mut free = self
      .gate
      .free_slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *free += 1;
    self.gate.released.notify_one();
  }
}

impl InferenceGate {
  pub fn new(inner: SharedModel, slots: usize) -> Self {
    Self {
      inner,
      free_slots: Mutex::new(slots.max(1)),
      released: Condvar::new(),
    }
  }

  fn acquire(&self) -> SlotGuard<'_> {
    let mut free = self
      .free_slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    while *free == 0 {
      debug!("等待空闲推理槽位");
      free = self
        .released
        .wait(free)
        .unwrap_or_else(PoisonError::into_inner);
    }
    *free -= 1;
    SlotGuard { gate: self }
  }
}

impl Model for InferenceGate {
  type Input = Frame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Frame) -> Result<DetectResult, ModelError> {
    let _slot = self.acquire();
    self.inner.infer(input)
  }
}

pub fn gated(model: SharedModel, slots: usize) -> SharedModel {
  Arc::new(InferenceGate::new(model, slots))
}
