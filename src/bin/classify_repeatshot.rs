// 该文件是 Jianshi （拣识） 项目的一部分。
// src/bin/classify_repeatshot.rs - 重复推理测速与一致性校验
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
  classifier::ConvNetBuilder,
  input::InputWrapper,
  output::SaveImageFileOutput,
  pipeline::ClassificationPipeline,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// Jianshi 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型权重，例如 convnet:///path/to/weights.json
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 重复次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
  #[command(flatten)]
  pub explain: ExplainArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);
  info!("重复次数: {}", args.repeat);

  let input = InputWrapper::from_url(&args.input)?;
  let model = ConvNetBuilder::from_url(&args.model)?.build()?;
  let pipeline = ClassificationPipeline::new(Arc::new(model), args.explain.to_config())?;
  let output = SaveImageFileOutput::from_url(&args.output)?;

  RepeatShotTask::default()
    .with_repeat_times(args.repeat)
    .run_task(input, pipeline, output)?;

  Ok(())
}
