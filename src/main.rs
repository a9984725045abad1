use clap::Parser;

use little_xr::engine::cli::Cli;
use little_xr::engine::graphics::HeadlessRenderer;
use little_xr::engine::app::runtime_for;
use little_xr::engine::xr::runtime::LoaderContext;
use little_xr::engine::{AnimationLoop, XrApp};
use little_xr::utils;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    utils::logger::init();

    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    if cli.dump_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    let runtime = runtime_for(&config)?;
    log::info!("runtime: {}", runtime.name());

    let mut app = XrApp::new(
        runtime,
        HeadlessRenderer::new(),
        LoaderContext::default(),
        &config,
    )?;
    let report = AnimationLoop::new(&mut app, config.frames).start()?;
    log::info!(
        "loop finished: {} ticks, {} submitted, {} drained, {} dropped",
        report.ticks,
        report.submitted,
        report.drained,
        report.dropped
    );
    app.shutdown()?;
    Ok(())
}
