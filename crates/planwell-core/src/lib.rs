pub mod bucket;
pub mod cli;
pub mod columns;
pub mod commands;
pub mod config;
pub mod conflict;
pub mod datetime;
pub mod diagnostic;
pub mod entity;
pub mod item;
pub mod normalize;
pub mod pipeline;
pub mod recurrence;
pub mod render;
pub mod snapshot;
pub mod window;

use std::ffi::OsString;

use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let cli =
    cli::GlobalCli::parse_from(raw_args);

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting planwell CLI"
  );

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    cli
      .rc_overrides
      .into_iter()
      .map(|kv| (kv.key, kv.value))
  );
  debug!(
    config = ?cfg.loaded_from,
    view = %cfg.default_view(),
    "configuration ready"
  );

  let renderer =
    render::Renderer::new(&cfg);
  commands::dispatch(
    &cfg,
    &renderer,
    cli.command
  )?;

  info!("done");
  Ok(())
}
