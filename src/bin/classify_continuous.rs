// 该文件是 Jianshi （拣识） 项目的一部分。
// src/bin/classify_continuous.rs - 批量分类，Ctrl-C 结束
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use jianshi::{
  FromUrl,
  args::ExplainArgs,
  classifier::{ConvNetBuilder, SerializedClassifier},
  input::InputWrapper,
  output::SaveImageFileOutput,
  pipeline::ClassificationPipeline,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Jianshi 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型权重，例如 convnet:///path/to/weights.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，例如 dir:///path/to/photos
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出目录，例如 dir:///path/to/results
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 最多处理的图像数量
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
  /// 串行化模型调用（用于不可重入的推理后端）
  #[arg(long)]
  pub serialize: bool,
  #[command(flatten)]
  pub explain: ExplainArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ConvNetBuilder::from_url(&args.model)?.build()?;
  let output = SaveImageFileOutput::from_url(&args.output)?;
  let task = ContinuousTask::default().with_frame_number(args.frame_number);

  if args.serialize {
    let model = SerializedClassifier::new(model);
    let pipeline = ClassificationPipeline::new(Arc::new(model), args.explain.to_config())?;
    task.run_task(input, pipeline, output)?;
  } else {
    let pipeline = ClassificationPipeline::new(Arc::new(model), args.explain.to_config())?;
    task.run_task(input, pipeline, output)?;
  }

  Ok(())
}
