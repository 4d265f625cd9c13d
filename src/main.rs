use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{info, warn};
use simplelog::{Config, WriteLogger};

use slidecache::cache::{
    Budget, CacheController, CacheInstance, Document, MupdfDocument, PagePart, PreviewSurface,
    SharedCache,
};
use slidecache::{panic_handler, settings};

/// Warm the page caches of a PDF presentation and report what stays cached
#[derive(Parser, Debug)]
#[command(name = "slidecache", version)]
struct Cli {
    /// PDF file to open
    file: PathBuf,

    /// Pages to show, in order (zero-based)
    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    pages: Vec<usize>,

    /// Viewport of a preview surface as WIDTHxHEIGHT; repeat for more surfaces
    #[arg(short, long = "surface", value_parser = parse_viewport, default_value = "1920x1080")]
    surfaces: Vec<(u32, u32)>,

    /// Byte cap across all caches (overrides the config file)
    #[arg(long)]
    max_size: Option<i64>,

    /// Page cap per cache (overrides the config file)
    #[arg(long)]
    max_count: Option<i64>,

    /// Part of each page to keep: full, left_half or right_half
    #[arg(long, value_parser = parse_part)]
    part: Option<PagePart>,

    /// Seconds to let the scheduler run after each page change
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    #[arg(long, default_value = "slidecache.log")]
    log_file: PathBuf,
}

fn parse_viewport(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {value:?}"))?;
    let w = w.trim().parse().map_err(|e| format!("width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("height: {e}"))?;
    Ok((w, h))
}

fn parse_part(value: &str) -> Result<PagePart, String> {
    serde_yaml::from_str(value).map_err(|_| format!("unknown page part {value:?}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    settings::load_settings();
    WriteLogger::init(
        settings::get_log_level(),
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    panic_handler::initialize_panic_handler();

    info!("Starting slidecache on {}", cli.file.display());

    let document: Arc<dyn Document> = Arc::new(
        MupdfDocument::open(&cli.file)
            .with_context(|| format!("opening {}", cli.file.display()))?,
    );
    let page_count = document.page_count();
    if page_count == 0 {
        bail!("{} has no pages", cli.file.display());
    }

    let defaults = settings::get_cache_budget();
    let budget = Budget::new(
        cli.max_size.unwrap_or(defaults.max_size_bytes),
        cli.max_count.unwrap_or(defaults.max_count),
    );
    let part = cli.part.unwrap_or_else(settings::get_page_part);
    let first_page = cli.pages.first().copied().unwrap_or(0);

    let mut controller = CacheController::new(Arc::clone(&document), budget)
        .with_stop_timeout(settings::get_worker_stop_timeout());
    let mut surfaces: Vec<PreviewSurface> = Vec::new();

    for (index, &(width, height)) in cli.surfaces.iter().enumerate() {
        let cache = SharedCache::new(
            CacheInstance::new(
                format!("surface-{index}"),
                Arc::clone(&document),
                settings::get_default_resolution(),
                part,
            )
            .with_stop_timeout(settings::get_worker_stop_timeout()),
        );
        let mut surface = PreviewSurface::new(format!("surface-{index}"), cache);
        if let Some(size) = document.page_size(first_page) {
            surface.resize(width, height, size);
        }

        // Surfaces at the same resolution share one instance.
        let resolution = surface.cache().borrow().resolution();
        let existing = surfaces
            .iter()
            .find(|s| s.cache().borrow().resolution().same_as(resolution))
            .map(|s| s.cache().clone());
        if let Some(shared) = existing {
            surface.swap_cache(shared);
        }

        controller.attach(surface.cache().clone());
        surfaces.push(surface);
    }
    println!(
        "{}: {page_count} pages, {} surfaces, {} cache instances",
        cli.file.display(),
        surfaces.len(),
        controller.instances().len()
    );

    for &page in &cli.pages {
        if page >= page_count {
            warn!("Skipping page {page}, document has {page_count} pages");
            continue;
        }
        for surface in &surfaces {
            if surface.page_bytes(page).is_none() {
                warn!("{}: page {page} could not be rendered", surface.name());
            }
        }

        controller.set_current_page(page);
        let report = controller.run_until_idle(Duration::from_secs(cli.timeout));

        println!(
            "page {page}: rendered {} pages in background, stop: {:?}{}",
            report.dispatched.len(),
            report.stop,
            if report.timed_out { " (timed out)" } else { "" }
        );
        for cache in controller.instances() {
            let stats = cache.borrow().stats();
            println!(
                "  {:<12} {:>4} pages {:>10} bytes at {}",
                cache.borrow().name(),
                stats.entries,
                stats.size_bytes,
                stats.resolution
            );
        }
    }

    let abandoned = controller.shutdown();
    if abandoned > 0 {
        warn!("{abandoned} render workers did not stop in time");
    }
    info!("Total cache size: {} bytes", controller.total_size_bytes());
    Ok(())
}
