use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use f1_forecast::PipelineConfig;
use f1_forecast::archive::{self, TABLE_FILES};
use f1_forecast::archive_cache::ArchiveCache;
use f1_forecast::config::ArchiveSource;

const DEFAULT_OUT_DIR: &str = "f1db_csv";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::from_env();
    let url = parse_string_arg("--url")
        .or_else(|| match &config.source {
            ArchiveSource::Remote(url) => Some(url.clone()),
            ArchiveSource::Directory(_) => None,
        })
        .ok_or_else(|| anyhow!("no archive url: pass --url or unset F1_ARCHIVE_DIR"))?;
    let out_dir = parse_string_arg("--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR));

    let bytes = archive::download_archive(&url, &config)?;
    let texts = archive::extract_tables(&bytes)?;

    fs::create_dir_all(&out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    for (name, text) in TABLE_FILES.iter().zip(texts.iter()) {
        let path = out_dir.join(name);
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    }

    // Parse once so a broken archive fails here rather than at forecast time.
    let tables = archive::load_directory(&out_dir)?;

    println!("Archive extracted");
    println!("Source: {url}");
    println!("Dir: {}", out_dir.display());
    println!("Fingerprint: {}", tables.fingerprint);
    println!(
        "Rows: drivers={} races={} results={} qualifying={}",
        tables.drivers.len(),
        tables.races.len(),
        tables.results.len(),
        tables.qualifying.len()
    );
    if let Some(cache) = ArchiveCache::default_location() {
        println!("Download cache: {}", cache.dir().display());
    }
    println!("Use it with F1_ARCHIVE_DIR={}", out_dir.display());
    Ok(())
}

fn parse_string_arg(flag: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == flag {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(next.trim().to_string());
            }
        }
    }
    None
}
