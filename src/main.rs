// 该文件是 Crowd Pulse （人流脉搏） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crowd_pulse::{
  backend::{Backend, FfmpegBackend},
  model::{SharedModel, gated, load_model},
  output::draw::Draw,
  pipeline::BatchPipeline,
  server::{self, AppState, ServerConfig},
  task::{TaskRegistry, TaskRunner},
};

use args::{Args, Command, ProcessArgs, ServeArgs};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("检测模型: {}", args.common.model);
  info!("推理槽位: {}", args.common.inference_slots);
  let model = gated(
    load_model(&args.common.model).context("无法加载检测模型")?,
    args.common.inference_slots,
  );

  let draw = match &args.common.font {
    Some(path) => Draw::from_font_file(path).context("无法加载字体")?,
    None => Draw::default(),
  };
  let draw = Arc::new(draw);
  let backend: Arc<dyn Backend> = Arc::new(FfmpegBackend::new(
    args.common.ffmpeg.clone(),
    args.common.ffprobe.clone(),
  ));

  match args.command {
    Command::Serve(serve) => run_server(serve, model, backend, draw),
    Command::Process(process) => run_process(process, model, backend, draw),
  }
}

fn run_server(
  args: ServeArgs,
  model: SharedModel,
  backend: Arc<dyn Backend>,
  draw: Arc<Draw>,
) -> Result<()> {
  info!("运行模式: {:?}", args.mode);
  std::fs::create_dir_all(&args.upload_dir)
    .with_context(|| format!("无法创建上传目录 {}", args.upload_dir.display()))?;
  std::fs::create_dir_all(&args.processed_dir)
    .with_context(|| format!("无法创建结果目录 {}", args.processed_dir.display()))?;

  let pipeline = BatchPipeline::new(model.clone(), backend.clone(), draw.clone());
  let runner = TaskRunner::new(TaskRegistry::new(), pipeline, args.processed_dir.clone())
    .with_max_jobs(args.max_jobs);
  let config = ServerConfig {
    upload_dir: args.upload_dir,
    passkey: args.passkey,
    mode: args.mode,
    webcam_index: args.webcam_index,
    cctv_url: args.cctv_url,
    jpeg_quality: args.jpeg_quality,
    max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
  };
  let state = AppState::new(config, runner, backend, model, draw);

  let runtime = tokio::runtime::Builder::new_multi_thread()
    .enable_all()
    .build()
    .context("无法创建异步运行时")?;
  runtime.block_on(server::serve(args.bind, state))?;
  Ok(())
}

fn run_process(
  args: ProcessArgs,
  model: SharedModel,
  backend: Arc<dyn Backend>,
  draw: Arc<Draw>,
) -> Result<()> {
  info!("输入视频: {}", args.input.display());
  info!("输出目录: {}", args.output_dir.display());

  let output = BatchPipeline::new(model, backend, draw)
    .process(&args.input, &args.output_dir)
    .with_context(|| format!("处理 {} 失败", args.input.display()))?;

  let json = serde_json::to_string(&output.analytics)?;
  if let Some(path) = &args.analytics {
    std::fs::write(path, &json)
      .with_context(|| format!("无法写入统计结果 {}", path.display()))?;
    info!("统计结果: {}", path.display());
  }

  info!("输出视频: {}", output.artifact.display());
  println!("{}", json);
  Ok(())
}
