// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/server.rs - HTTP 接口
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

//! # HTTP 接口
//!
//! | 方法 | 路径 | 说明 |
//! |------|------|------|
//! | POST | `/api/login` | 口令校验 |
//! | POST | `/api/upload` | 上传视频（multipart 字段 `video`），返回任务编号 |
//! | GET | `/api/status/{task_id}` | 任务状态 |
//! | GET | `/api/analytics/{task_id}` | 任务统计结果 |
//! | GET | `/video_feed/{source}` | MJPEG 直播流 |
//! | GET | `/processed/{file}` | 处理结果文件 |

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
  Json, Router,
  body::Body,
  extract::{
    DefaultBodyLimit, Multipart, Path, RawPathParams, State,
    multipart::{Field, MultipartError},
    rejection::JsonRejection,
  },
  http::{StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
  backend::Backend,
  model::SharedModel,
  output::{draw::Draw, mjpeg},
  pipeline::LiveStream,
  task::{TaskError, TaskId, TaskRunner},
};

mod source;
pub use self::source::{resolve_source, secure_filename};

const UPLOAD_FIELD: &str = "video";
const LIVE_CHANNEL_CAPACITY: usize = 2;
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// 服务提供的功能
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OperationMode {
  /// 只接受上传
  Upload,
  /// 只提供直播流
  Live,
  /// 两者都提供
  #[default]
  Hybrid,
}

impl OperationMode {
  pub fn allows_uploads(&self) -> bool {
    !matches!(self, OperationMode::Live)
  }

  pub fn allows_live(&self) -> bool {
    !matches!(self, OperationMode::Upload)
  }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub upload_dir: PathBuf,
  pub passkey: String,
  pub mode: OperationMode,
  pub webcam_index: u32,
  pub cctv_url: Option<Url>,
  pub jpeg_quality: u8,
  pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      upload_dir: PathBuf::from("static/uploads"),
      passkey: String::from("098"),
      mode: OperationMode::default(),
      webcam_index: 0,
      cctv_url: None,
      jpeg_quality: mjpeg::DEFAULT_JPEG_QUALITY,
      max_upload_bytes: 512 * 1024 * 1024,
    }
  }
}

#[derive(Clone)]
pub struct AppState {
  config: Arc<ServerConfig>,
  runner: TaskRunner,
  backend: Arc<dyn Backend>,
  model: SharedModel,
  draw: Arc<Draw>,
}

impl AppState {
  pub fn new(
    config: ServerConfig,
    runner: TaskRunner,
    backend: Arc<dyn Backend>,
    model: SharedModel,
    draw: Arc<Draw>,
  ) -> Self {
    Self {
      config: Arc::new(config),
      runner,
      backend,
      model,
      draw,
    }
  }
}

#[derive(Error, Debug)]
pub enum ApiError {
  #[error("No video file provided")]
  NoVideo,
  #[error("Uploads not available in live mode")]
  UploadsDisabled,
  #[error("Task not found")]
  TaskNotFound,
  #[error("Analytics not found")]
  AnalyticsNotFound,
  #[error("File not found")]
  FileNotFound,
  #[error("Video feed not available in upload mode.")]
  LiveDisabled,
  #[error("Unknown video source: {0}")]
  UnknownSource(String),
  #[error("Invalid video source selector: {0}")]
  InvalidSelector(String),
  #[error("Malformed upload: {0}")]
  Upload(#[from] MultipartError),
  #[error("Failed to store upload")]
  Storage(#[source] io::Error),
}

impl From<TaskError> for ApiError {
  fn from(_: TaskError) -> Self {
    ApiError::TaskNotFound
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::NoVideo | ApiError::InvalidSelector(_) => StatusCode::BAD_REQUEST,
      // 超出大小限制时为 413
      ApiError::Upload(e) => e.status(),
      ApiError::UploadsDisabled => StatusCode::FORBIDDEN,
      ApiError::TaskNotFound
      | ApiError::AnalyticsNotFound
      | ApiError::FileNotFound
      | ApiError::LiveDisabled
      | ApiError::UnknownSource(_) => StatusCode::NOT_FOUND,
      ApiError::Storage(e) => {
        error!("保存上传文件失败: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
      }
    };
    match self {
      // 与浏览器直接打开的直播地址保持纯文本
      ApiError::LiveDisabled => (status, self.to_string()).into_response(),
      ApiError::Upload(e) => {
        (status, Json(json!({ "error": e.body_text() }))).into_response()
      }
      _ => (status, Json(json!({ "error": self.to_string() }))).into_response(),
    }
  }
}

pub fn router(state: AppState) -> Router {
  let body_limit = state.config.max_upload_bytes;
  Router::new()
    .route("/api/login", post(login))
    .route("/api/upload", post(upload))
    .route("/api/status/{task_id}", get(status))
    .route("/api/analytics/{task_id}", get(analytics))
    .route("/video_feed/{source}", get(video_feed))
    .route("/processed/{file}", get(processed_file))
    .layer(DefaultBodyLimit::max(body_limit))
    .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> io::Result<()> {
  let listener = TcpListener::bind(addr).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);
  axum::serve(listener, router(state))
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  info!("服务已停止");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!("无法监听中断信号: {}", e);
      std::future::pending::<()>().await;
    }
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(e) => {
        error!("无法监听终止信号: {}", e);
        std::future::pending::<()>().await;
      }
    }
  };
  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }

  info!("收到中断信号，准备退出...");
  // 直播连接不会自行结束，超时后强制退出
  tokio::spawn(async {
    tokio::time::sleep(FORCE_EXIT_AFTER).await;
    warn!("强制退出程序");
    std::process::exit(1);
  });
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
  #[serde(default)]
  passkey: Option<String>,
}

async fn login(
  State(state): State<AppState>,
  body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
  let accepted = matches!(
    &body,
    Ok(Json(LoginRequest { passkey: Some(passkey) })) if *passkey == state.config.passkey
  );
  if accepted {
    Json(json!({ "success": true })).into_response()
  } else {
    debug!("口令校验失败");
    (
      StatusCode::UNAUTHORIZED,
      Json(json!({ "success": false, "error": "Invalid passkey" })),
    )
      .into_response()
  }
}

async fn upload(
  State(state): State<AppState>,
  mut multipart: Multipart,
) -> Result<Response, ApiError> {
  if !state.config.mode.allows_uploads() {
    return Err(ApiError::UploadsDisabled);
  }

  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(UPLOAD_FIELD) {
      continue;
    }
    let Some(video_path) = store_upload(&state, field).await? else {
      continue;
    };
    let task_id = state.runner.submit(video_path);
    return Ok(
      (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Processing started", "task_id": task_id.to_string() })),
      )
        .into_response(),
    );
  }

  Err(ApiError::NoVideo)
}

/// 以 `<uuid>_<安全文件名>` 保存上传文件；没有文件名的字段视为未提供
async fn store_upload(state: &AppState, mut field: Field<'_>) -> Result<Option<PathBuf>, ApiError> {
  let Some(original) = field.file_name().map(str::to_owned) else {
    return Ok(None);
  };
  if original.is_empty() {
    return Ok(None);
  }
  let mut name = secure_filename(&original);
  if name.is_empty() {
    name = String::from("video.mp4");
  }

  let upload_dir = &state.config.upload_dir;
  tokio::fs::create_dir_all(upload_dir)
    .await
    .map_err(ApiError::Storage)?;
  let path = upload_dir.join(format!("{}_{}", Uuid::new_v4().simple(), name));

  let mut file = tokio::fs::File::create(&path)
    .await
    .map_err(ApiError::Storage)?;
  let mut written = 0usize;
  let copied: Result<(), ApiError> = async {
    while let Some(chunk) = field.chunk().await? {
      file.write_all(&chunk).await.map_err(ApiError::Storage)?;
      written += chunk.len();
    }
    file.flush().await.map_err(ApiError::Storage)
  }
  .await;

  if let Err(e) = copied {
    drop(file);
    let _ = tokio::fs::remove_file(&path).await;
    return Err(e);
  }

  info!("收到上传 {} ({} 字节) -> {}", original, written, path.display());
  Ok(Some(path))
}

fn parse_task_id(raw: &str) -> Option<TaskId> {
  raw.parse().ok()
}

async fn status(
  State(state): State<AppState>,
  Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
  let id = parse_task_id(&task_id).ok_or(ApiError::TaskNotFound)?;
  let task = state.runner.registry().get(&id)?;
  Ok(Json(task).into_response())
}

async fn analytics(
  State(state): State<AppState>,
  Path(task_id): Path<String>,
) -> Result<Response, ApiError> {
  let id = parse_task_id(&task_id).ok_or(ApiError::AnalyticsNotFound)?;
  let data = tokio::fs::read(state.runner.analytics_path(&id))
    .await
    .map_err(|_| ApiError::AnalyticsNotFound)?;
  Ok(([(header::CONTENT_TYPE, "application/json")], data).into_response())
}

async fn processed_file(
  State(state): State<AppState>,
  Path(file): Path<String>,
) -> Result<Response, ApiError> {
  // 只允许访问结果目录下的普通文件名
  if file.is_empty() || secure_filename(&file) != file {
    return Err(ApiError::FileNotFound);
  }
  let data = tokio::fs::read(state.runner.processed_dir().join(&file))
    .await
    .map_err(|_| ApiError::FileNotFound)?;
  let content_type = match file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
    Some(ext) if ext == "mp4" => "video/mp4",
    Some(ext) if ext == "json" => "application/json",
    _ => "application/octet-stream",
  };
  Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

async fn video_feed(
  State(state): State<AppState>,
  params: RawPathParams,
) -> Result<Response, ApiError> {
  if !state.config.mode.allows_live() {
    return Err(ApiError::LiveDisabled);
  }
  let raw = params
    .iter()
    .find(|(key, _)| *key == "source")
    .map(|(_, value)| value)
    .unwrap_or_default();
  let locator = resolve_source(
    raw,
    state.config.webcam_index,
    state.config.cctv_url.as_ref(),
  )?;
  info!("新的直播连接: {}", locator);

  let stream = LiveStream::new(
    locator,
    state.backend.clone(),
    state.model.clone(),
    state.draw.clone(),
  )
  .with_jpeg_quality(state.config.jpeg_quality);

  let (tx, rx) = mpsc::channel::<Result<Vec<u8>, io::Error>>(LIVE_CHANNEL_CAPACITY);
  tokio::task::spawn_blocking(move || {
    for payload in stream {
      if tx.blocking_send(Ok(payload)).is_err() {
        info!("直播客户端已断开");
        break;
      }
    }
    // stream 在此处 drop，释放输入源
  });

  Ok(
    (
      [
        (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
        (header::CACHE_CONTROL, "no-cache"),
      ],
      Body::from_stream(ReceiverStream::new(rx)),
    )
      .into_response(),
  )
}
