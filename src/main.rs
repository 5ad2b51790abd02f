use anyhow::Context;
use sarchange::core::poll::CancelToken;
use sarchange::core::script::maps_link;
use sarchange::io::watch::downloads_dir;
use sarchange::{AoiResolver, ArchiveClient, ChangePipeline, FileWatcher, PipelineConfig};

const SCRIPT_FILE_NAME: &str = "sarchange_script.js";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = PipelineConfig::from_env().context("Failed to load configuration")?;
    let cancel = CancelToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let downloads = downloads_dir()?;
    let input = downloads.join(&config.input_file_name);
    if config.discard_stale_input {
        FileWatcher::discard_stale(&input)?;
    }

    let watcher = FileWatcher::new(config.file_poller(cancel.clone()));
    let input = watcher
        .wait_for(&input)
        .with_context(|| format!("No map export appeared at {}", input.display()))?;

    let request = AoiResolver::resolve_file(&input)
        .with_context(|| format!("Failed to resolve {}", input.display()))?;

    let client = ArchiveClient::from_env()?;
    let pipeline =
        ChangePipeline::new(&client, &client, config.clone()).with_cancel_token(cancel.clone());
    let report = pipeline.run(&request)?;

    if let Some(script) = &report.script {
        let script_path = input.with_file_name(SCRIPT_FILE_NAME);
        std::fs::write(&script_path, script)
            .with_context(|| format!("Failed to write {}", script_path.display()))?;
        log::info!("Code-editor script written to {}", script_path.display());
    }

    if let Some(change) = &report.change {
        log::info!(
            "{} of {} valid pixels changed by more than {}",
            change.mask.significant_pixels(),
            change.raster.valid_pixels(),
            change.mask.threshold
        );
    }
    for outcome in &report.exports {
        log::info!("Export: {:?}", outcome);
    }
    log::info!("Open the area of interest at {}", maps_link(&report.bbox));

    #[cfg(feature = "gdal")]
    inspect_download(&report, &watcher, &downloads, &config.export_description)?;

    Ok(())
}

/// Cancel `token` on the first Ctrl-C so pending waits stop at their next check
fn cancel_on_ctrl_c(token: CancelToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                log::warn!("Ctrl-C handling unavailable: {}", e);
                return;
            }
        };
        match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                log::warn!("Interrupted, cancelling the run");
                token.cancel();
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

/// Wait for the exported change raster to be downloaded and log its statistics
#[cfg(feature = "gdal")]
fn inspect_download(
    report: &sarchange::RunReport,
    watcher: &FileWatcher,
    downloads: &std::path::Path,
    description: &str,
) -> anyhow::Result<()> {
    if report.change.is_none() || !report.all_exports_completed() {
        return Ok(());
    }

    let file_name = format!("{}.tif", sarchange::core::export::sanitize_description(description));
    let raster = watcher.wait_for(downloads.join(file_name))?;
    let summary = sarchange::io::RasterReader::inspect(&raster)?;
    log::debug!("Downloaded raster: {:?}", summary);
    Ok(())
}
