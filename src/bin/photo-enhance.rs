use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use photo_enhance::{
    ArtifactStore, BackgroundRemover, EnhanceService, FitMode, Pipeline, PipelineConfig,
    ProcessResult, RemoteRemover, RemovalFallback, ServiceConfig, ShadowConfig,
    UnavailableRemover,
};

#[derive(Clone, Copy, ValueEnum)]
enum Fallback {
    /// Keep going with the uncut photo
    Opaque,
    /// Fail the photo
    Fail,
}

#[derive(Parser)]
#[command(
    name = "photo-enhance",
    about = "Cut out product photos and re-compose them on a clean white canvas",
    version,
    after_help = "Simple usage: photo-enhance <image> --remote-url <URL>\n\n\
                  Without --remote-url (or --model with the `onnx` feature) no background\n\
                  removal engine is available; combine with --fallback opaque to still\n\
                  compose and enhance the uncut photo."
)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Input image file or directory
    input: PathBuf,

    /// Output directory for the enhanced PNGs
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// TOML pipeline configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Background removal service endpoint
    #[arg(long, env = "PHOTO_ENHANCE_REMOTE_URL")]
    remote_url: Option<String>,

    /// API key sent to the background removal service
    #[arg(long, env = "PHOTO_ENHANCE_REMOTE_KEY", hide_env_values = true)]
    remote_key: Option<String>,

    /// Timeout for the background removal service, in seconds
    #[arg(long, default_value = "30")]
    remote_timeout: u64,

    /// Local ONNX segmentation model (requires the `onnx` feature)
    #[arg(long)]
    model: Option<PathBuf>,

    /// What to do when background removal fails
    #[arg(long, value_enum)]
    fallback: Option<Fallback>,

    /// Keep the original resolution instead of fitting into a square
    #[arg(long)]
    fit_original: bool,

    /// Paint a soft drop shadow behind the subject
    #[arg(long)]
    shadow: bool,

    /// Print one JSON object per stored photo on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all non-error output
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            process::exit(1);
        }
    };

    let remover = match build_remover(&cli) {
        Ok(r) => r,
        Err(e) => {
            log::error!("Failed to initialize background removal: {e}");
            process::exit(1);
        }
    };
    if !remover.is_available() {
        log::warn!("No background removal engine configured");
    }

    let service = match Pipeline::new(config, remover)
        .and_then(|pipeline| {
            let store = ArtifactStore::open(&cli.output)?;
            EnhanceService::new(pipeline, store, None, ServiceConfig::default())
        }) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Fatal: {e}");
            process::exit(1);
        }
    };

    if !cli.input.exists() {
        log::error!("Input path does not exist: {}", cli.input.display());
        process::exit(1);
    }

    let results = if cli.input.is_dir() {
        service.process_directory(&cli.input)
    } else {
        vec![service.process_file(&cli.input)]
    };

    let mut success_count = 0u32;
    let mut fail_count = 0u32;
    for r in &results {
        print_result(r, &cli);
        if r.success {
            success_count += 1;
        } else {
            fail_count += 1;
        }
    }

    if results.len() > 1 {
        log::info!(
            "[Summary] Processed: {success_count}, Failed: {fail_count} (Total: {})",
            results.len()
        );
    }

    if fail_count > 0 {
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> photo_enhance::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(fallback) = cli.fallback {
        config.fallback = match fallback {
            Fallback::Opaque => RemovalFallback::Opaque,
            Fallback::Fail => RemovalFallback::Fail,
        };
    }
    if cli.fit_original {
        config.fit = FitMode::Original;
    }
    if cli.shadow && config.shadow.is_none() {
        config.shadow = Some(ShadowConfig::default());
    }

    config.validate()?;
    Ok(config)
}

fn build_remover(cli: &Cli) -> photo_enhance::Result<Arc<dyn BackgroundRemover>> {
    if let Some(model) = &cli.model {
        return local_remover(model);
    }
    match &cli.remote_url {
        Some(url) => Ok(Arc::new(RemoteRemover::new(
            url.clone(),
            cli.remote_key.clone(),
            Duration::from_secs(cli.remote_timeout),
        )?)),
        None => Ok(Arc::new(UnavailableRemover)),
    }
}

#[cfg(feature = "onnx")]
fn local_remover(model: &Path) -> photo_enhance::Result<Arc<dyn BackgroundRemover>> {
    Ok(Arc::new(photo_enhance::OnnxRemover::new(model)?))
}

#[cfg(not(feature = "onnx"))]
fn local_remover(model: &Path) -> photo_enhance::Result<Arc<dyn BackgroundRemover>> {
    Err(photo_enhance::Error::Config(format!(
        "cannot load {}: built without the `onnx` feature",
        model.display()
    )))
}

fn print_result(result: &ProcessResult, cli: &Cli) {
    let filename = result.path.file_name().map_or_else(
        || result.path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    );

    if !result.success {
        log::error!("[FAIL] {filename}: {}", result.message);
        return;
    }

    if let (true, Some(artifact)) = (cli.json, &result.artifact) {
        match serde_json::to_string(artifact) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("Failed to serialize result: {e}"),
        }
    }
    log::info!("[OK] {filename}: {}", result.message);
}
