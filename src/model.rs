// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/model.rs - 检测模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

/// COCO 数据集中 "person" 的类别编号
pub const PERSON_CLASS_ID: u32 = 0;

// COCO 80 类别名称
const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn coco_label(class_id: u32) -> &'static str {
  COCO_CLASSES
    .get(class_id as usize)
    .copied()
    .unwrap_or("unknown")
}

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 所有流水线共享的检测能力
pub type SharedModel =
  Arc<dyn Model<Input = Frame, Output = DetectResult, Error = ModelError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub track_id: Option<u64>,
}

impl DetectItem {
  pub fn new(class_id: u32, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      class_id,
      score,
      bbox,
      track_id: None,
    }
  }

  pub fn person(bbox: [f32; 4]) -> Self {
    Self::new(PERSON_CLASS_ID, 1.0, bbox)
  }

  pub fn with_track_id(mut self, track_id: u64) -> Self {
    self.track_id = Some(track_id);
    self
  }

  pub fn is_person(&self) -> bool {
    self.class_id == PERSON_CLASS_ID
  }

  pub fn label(&self) -> &'static str {
    coco_label(self.class_id)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &DetectItem> {
    self.items.iter()
  }

  pub fn person_count(&self) -> u32 {
    self.items.iter().filter(|item| item.is_person()).count() as u32
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型 URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型加载错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("检测脚本第 {line} 行解析失败: {source}")]
  Script {
    line: usize,
    source: serde_json::Error,
  },
  #[error("推理错误: {0}")]
  Inference(String),
}

const NULL_MODEL_SCHEME: &str = "null";

/// 根据 URL 方案加载检测模型
///
/// - `null://` 不产生任何检测结果
/// - `replay:///path/to/detections.jsonl` 按帧序号回放预先计算的检测结果
pub fn load_model(url: &Url) -> Result<SharedModel, ModelError> {
  match url.scheme() {
    NULL_MODEL_SCHEME => {
      info!("使用空检测模型");
      Ok(Arc::new(ReplayModel::default()))
    }
    ReplayModel::SCHEME => Ok(Arc::new(ReplayModel::from_url(url)?)),
    other => Err(ModelError::SchemeMismatch(other.to_string())),
  }
}

mod gate;
mod replay;
mod tracker;

pub use self::gate::{InferenceGate, gated};
pub use self::replay::ReplayModel;
pub use self::tracker::{IouTracker, Tracker, iou};
