use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use leviso_bundle::{bundle, tool_available, BundleConfig, Platform, SystemLinkEditor, DEFAULT_STORE_PREFIX};

/// Compose a relocatable bundle from a pre-built tree and its dependency roots.
#[derive(Parser, Debug)]
#[command(name = "leviso-bundle", version, about)]
struct Cli {
    /// Pre-built artifact tree (bin/, lib/, extra dirs)
    #[arg(long)]
    source: PathBuf,

    /// Output directory for the bundle
    #[arg(long)]
    output: PathBuf,

    /// Newline-delimited list of dependency candidate roots
    #[arg(long)]
    roots: PathBuf,

    /// Target platform: linux (ELF) or darwin (Mach-O)
    #[arg(long, default_value_t = Platform::native())]
    platform: Platform,

    /// Newline-delimited glob list of system libraries
    #[arg(long)]
    system_patterns: Option<PathBuf>,

    /// Newline-delimited glob list of host-provided libraries
    #[arg(long)]
    host_patterns: Option<PathBuf>,

    /// Do not add the built-in platform patterns
    #[arg(long)]
    no_default_patterns: bool,

    /// Newline-delimited list of source directories copied verbatim
    #[arg(long)]
    extra_dirs: Option<PathBuf>,

    /// Warn instead of failing on embedded build-store byte references
    #[arg(long)]
    tolerate_store_references: bool,

    /// Build-store path prefix that must not remain in the bundle
    #[arg(long, default_value = DEFAULT_STORE_PREFIX)]
    store_prefix: String,
}

fn load_optional(path: &Option<PathBuf>) -> Result<Vec<String>> {
    match path {
        Some(path) => Ok(BundleConfig::load_list(path)?),
        None => Ok(Vec::new()),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let roots = BundleConfig::load_list(&cli.roots)?
        .into_iter()
        .map(PathBuf::from)
        .collect();

    let config = BundleConfig::new(&cli.source, &cli.output)
        .with_candidate_roots(roots)
        .with_platform(cli.platform)
        .with_patterns(load_optional(&cli.system_patterns)?, load_optional(&cli.host_patterns)?)
        .with_default_patterns(!cli.no_default_patterns)
        .with_extra_dirs(load_optional(&cli.extra_dirs)?)
        .with_tolerate_store_references(cli.tolerate_store_references)
        .with_store_prefix(cli.store_prefix.clone());

    let tool = match config.platform {
        Platform::Linux => "patchelf",
        Platform::Darwin => "install_name_tool",
    };
    if !tool_available(tool) {
        warn!("{tool} not found on PATH - link metadata cannot be rewritten");
    }

    info!(
        "Bundling {} into {} ({} candidate roots, {})",
        config.source_root.display(),
        config.output_root.display(),
        config.candidate_roots.len(),
        config.platform
    );

    let report = bundle(&config, &SystemLinkEditor)?;
    info!(
        "Bundled {} libraries, {} plugin dir(s), {} rewrite failure(s)",
        report.libraries_bundled,
        report.discovery.plugin_dirs.len(),
        report.rewrite.failures.len()
    );

    report.into_result()?;
    println!("Bundle is portable: {}", config.output_root.display());
    Ok(())
}
