use anyhow::Context;
use clap::Parser;
use pdf_squeeze::cli::{Args, Commands, RunOverrides};
use pdf_squeeze::config::{CompressionLevel, Settings, StorageBackend};
use pdf_squeeze::constants::DEFAULT_CONFIG_PATH;
use pdf_squeeze::control::RunControl;
use pdf_squeeze::error::SqueezeError;
use pdf_squeeze::logger::{init_logging, is_quiet, LogOptions};
use pdf_squeeze::pdf;
use pdf_squeeze::pipeline::Pipeline;
use pdf_squeeze::selector::{CompressionSelector, Selection};
use pdf_squeeze::storage::{LocalStorage, RcloneStorage, RemoteStorage};
use pdf_squeeze::strategies::StrategySet;
use pdf_squeeze::utils::{format_duration, format_file_size};
use pdf_squeeze::workspace::ScratchArea;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_options = LogOptions {
        verbosity: args.verbose,
        quiet: args.quiet,
        json: args.json_logs,
        file: args.log_file.clone(),
    };
    if let Err(e) = init_logging(&log_options) {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    match dispatch(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Runs the chosen command. `Ok(false)` means it finished but something failed.
async fn dispatch(args: Args) -> anyhow::Result<bool> {
    match args.command {
        Commands::Run {
            overrides,
            dry_run,
            stats_json,
        } => {
            let settings = load_settings(args.config.as_deref(), &overrides)?;
            run_batch(settings, dry_run, stats_json.as_deref()).await
        }
        Commands::Scan { overrides } => {
            let settings = load_settings(args.config.as_deref(), &overrides)?;
            scan(settings).await?;
            Ok(true)
        }
        Commands::Compress { input, output, level } => {
            let settings = load_settings(args.config.as_deref(), &RunOverrides::default())?;
            compress_local(&settings, &input, &output, level.as_deref()).await
        }
        Commands::Info { input } => {
            show_pdf_info(&input).await?;
            Ok(true)
        }
        Commands::Doctor => doctor(args.config.as_deref()).await,
    }
}

/// Loads the configuration file and applies command-line overrides.
///
/// A missing file is only an error when it was named explicitly.
fn load_settings(path: Option<&Path>, overrides: &RunOverrides) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => Settings::load(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default.exists() {
                Settings::load(&default)?
            } else {
                debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_PATH);
                Settings::default()
            }
        }
    };
    overrides.apply(&mut settings)?;
    Ok(settings)
}

async fn open_storage(settings: &Settings) -> anyhow::Result<Arc<dyn RemoteStorage>> {
    let storage = &settings.storage;
    let remote: Arc<dyn RemoteStorage> = match storage.backend {
        StorageBackend::Rclone => Arc::new(
            RcloneStorage::connect(&storage.rclone_bin, &storage.remote, storage.retries).await?,
        ),
        StorageBackend::Local => {
            let root = storage
                .root
                .clone()
                .context("storage.root is required for the local backend")?;
            Arc::new(LocalStorage::new(root))
        }
    };
    Ok(remote)
}

async fn run_batch(
    settings: Settings,
    dry_run: bool,
    stats_json: Option<&Path>,
) -> anyhow::Result<bool> {
    let request = RunOverrides::request(&settings, dry_run);
    let storage = open_storage(&settings).await?;
    let pipeline = Pipeline::new(storage, settings)?;

    let control = RunControl::new(request.timeout);
    let signal_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, finishing files already in flight");
            signal_control.request_stop();
        }
    });

    info!(
        "🚀 Compressing up to {} files at level {} with {} workers",
        request.max_files, request.level, request.workers
    );
    let stats = pipeline.run_with_control(&request, control).await?;

    if let Some(path) = stats_json {
        stats.write_json(path)?;
        info!("📝 Statistics written to {}", path.display());
    }
    if !is_quiet() {
        println!("{}", stats.render_summary());
    }
    Ok(!stats.has_failures())
}

async fn scan(settings: Settings) -> anyhow::Result<()> {
    let max_files = settings.limits.max_files_per_run;
    let storage = open_storage(&settings).await?;
    let pipeline = Pipeline::new(storage, settings)?;
    let set = pipeline.scan(max_files).await?;

    println!("📂 Listed {} entries", set.listed);
    println!("📄 Next run would process {} files:", set.candidates.len());
    for entry in &set.candidates {
        println!("  {} ({})", entry.path, format_file_size(entry.size_bytes));
    }
    if !set.deferred.is_empty() {
        println!("⏭️  Deferred beyond the file cap: {}", set.deferred.len());
    }
    if !set.ineligible.is_empty() {
        println!("🚫 Ineligible: {}", set.ineligible.len());
        for (entry, reason) in &set.ineligible {
            debug!("  {}: {}", entry.path, reason);
        }
    }
    Ok(())
}

async fn compress_local(
    settings: &Settings,
    input: &Path,
    output: &Path,
    level: Option<&str>,
) -> anyhow::Result<bool> {
    if !input.exists() {
        return Err(SqueezeError::FileNotFound(input.to_path_buf()).into());
    }
    let level = match level {
        Some(level) => level.parse::<CompressionLevel>()?,
        None => settings.compression.default_level,
    };
    settings.ensure_valid()?;

    let strategies = StrategySet::from_settings(&settings.compression)?;
    let selector = CompressionSelector::new(strategies, settings.compression.min_compression_percent);
    let scratch = ScratchArea::new(settings.limits.work_dir.as_deref())?;
    let started = std::time::Instant::now();

    println!("🗜️  Compressing {} at level {}", input.display(), level);
    let selection = selector
        .select(input, scratch.path(), &settings.compression.profile(level))
        .await;
    for attempt in selection.attempts() {
        debug!("  {}", attempt);
    }

    match selection {
        Selection::Accepted { result, artifact, .. } => {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&artifact, output)
                .await
                .with_context(|| format!("cannot write {}", output.display()))?;
            println!("✅ Compressed with {}", result.winning_strategy);
            println!(
                "📊 {} -> {} ({:.1}% saved) in {}",
                format_file_size(result.original_size),
                format_file_size(result.compressed_size),
                result.percent_saved,
                format_duration(started.elapsed())
            );
            Ok(true)
        }
        Selection::NoAcceptableResult { attempts } => {
            println!("⚠️  No backend produced an acceptable result:");
            for attempt in &attempts {
                println!("  {}", attempt);
            }
            Ok(false)
        }
    }
}

async fn show_pdf_info(input: &Path) -> anyhow::Result<()> {
    println!("📋 Getting info for: {:?}", input);
    if !input.exists() {
        return Err(SqueezeError::FileNotFound(input.to_path_buf()).into());
    }
    let info = pdf::inspect(input).await.map_err(SqueezeError::Inspection)?;

    println!("📄 Pages: {}", info.pages);
    println!("📁 File size: {}", format_file_size(info.size_bytes));
    println!("🔒 Encrypted: {}", yes_no(info.encrypted));
    println!("📝 Forms: {}", yes_no(info.has_forms));
    println!("💬 Annotations: {}", yes_no(info.has_annotations));
    println!("🖼️  Images: {}", yes_no(info.has_images));
    if info.prefers_structure_preserving() {
        println!("💡 Structure-preserving backends will be tried first");
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

async fn doctor(config: Option<&Path>) -> anyhow::Result<bool> {
    let settings = load_settings(config, &RunOverrides::default())?;
    let report = settings.validate();
    let mut healthy = report.is_ok();

    for err in &report.errors {
        println!("❌ {}", err);
    }
    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
    if report.is_ok() {
        println!("✅ Configuration is valid");
    }

    match StrategySet::from_settings(&settings.compression) {
        Ok(strategies) => {
            if let Some(warning) = strategies.structure_first_warning() {
                println!("⚠️  {}", warning);
            }
            for strategy in strategies.all() {
                if strategy.available().await {
                    println!("✅ Backend {} is available", strategy.name());
                } else {
                    println!("⚠️  Backend {} is not available", strategy.name());
                }
            }
        }
        Err(e) => {
            println!("❌ {}", e);
            healthy = false;
        }
    }

    match open_storage(&settings).await {
        Ok(storage) => println!("✅ Storage session ({}) is ready", storage.name()),
        Err(e) => {
            println!("❌ Storage session failed: {:#}", e);
            healthy = false;
        }
    }
    Ok(healthy)
}
