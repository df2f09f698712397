//! Main entry point for the mapbundle CLI application.
//!
//! Lists and extracts the files of a map bundle stored on the local
//! filesystem or behind an HTTP URL that supports Range requests.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use mapbundle::{
    Bundle, CacheConfig, Cli, FileEntry, HttpSource, LocalSource, RangeSource, ResourceCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cache = ResourceCache::new(CacheConfig {
        max_entries: cli.max_cache_entries,
    });

    if cli.is_http_url() {
        let source = Arc::new(HttpSource::new(cli.file.clone()).await?);
        process_bundle(Bundle::with_cache(source.clone(), cache), &cli).await?;

        if !cli.is_quiet() {
            eprintln!("\nTotal bytes transferred: {}", format_size(source.transferred_bytes()));
        }
    } else {
        let source = Arc::new(
            LocalSource::open(Path::new(&cli.file))
                .with_context(|| format!("cannot open {}", cli.file))?,
        );
        process_bundle(Bundle::with_cache(source, cache), &cli).await?;
    }

    Ok(())
}

/// List or extract the bundle's files according to `cli`.
async fn process_bundle<S: RangeSource + 'static>(bundle: Bundle<S>, cli: &Cli) -> Result<()> {
    let table = bundle.file_list().await?;
    let entries = table.sorted_by_offset();

    if cli.list || cli.verbose {
        list_files(&entries, cli.verbose);
        return Ok(());
    }

    let selected: Vec<_> = entries
        .into_iter()
        .filter(|e| !e.is_directory() && cli.selects(&e.path))
        .collect();
    if selected.is_empty() && !cli.files.is_empty() {
        bail!("no matching files in {}", cli.file);
    }

    let show_names = cli.pipe && selected.len() > 1;
    for entry in selected {
        extract_file(&bundle, entry, cli, show_names).await?;
    }

    Ok(())
}

fn list_files(entries: &[&FileEntry], verbose: bool) {
    if !verbose {
        for entry in entries {
            println!("{}", entry.path);
        }
        return;
    }

    println!("{:>12}  {:>14}  {:>7}  Name", "Length", "Offset", "Method");
    println!("{}", "-".repeat(70));

    let mut total = 0u64;
    let mut count = 0usize;
    for entry in entries {
        let method = if entry.is_stored() { "Stored" } else { "Packed" };
        println!(
            "{:>12}  {:>14}  {:>7}  {}",
            entry.size, entry.absolute_offset, method, entry.path
        );
        if !entry.is_directory() {
            total += entry.size;
            count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!("{:>12}  {:>24}  {} files", total, "", count);
}

/// Write one entry to stdout or to disk.
async fn extract_file<S: RangeSource + 'static>(
    bundle: &Bundle<S>,
    entry: &FileEntry,
    cli: &Cli,
    show_name: bool,
) -> Result<()> {
    if cli.pipe {
        let data = fetch(bundle, entry).await?;
        let mut stdout = tokio::io::stdout();
        if show_name {
            stdout
                .write_all(format!("--- {} ---\n", entry.path).as_bytes())
                .await?;
        }
        stdout.write_all(&data).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let file_name = if cli.junk_paths {
        mapbundle::cli::basename(&entry.path)
    } else {
        entry.path.as_str()
    };
    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(file_name),
        None => PathBuf::from(file_name),
    };

    if output_path.exists() && (cli.never_overwrite || !cli.overwrite) {
        if !cli.is_quiet() {
            let hint = if cli.never_overwrite { "file exists" } else { "use -o to overwrite" };
            eprintln!("Skipping: {} ({})", entry.path, hint);
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", entry.path);
    }

    let data = fetch(bundle, entry).await?;
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&output_path, &data).await?;

    Ok(())
}

async fn fetch<S: RangeSource + 'static>(
    bundle: &Bundle<S>,
    entry: &FileEntry,
) -> Result<bytes::Bytes> {
    bundle
        .get_file(&entry.path, None)
        .await?
        .with_context(|| format!("{} disappeared from the bundle", entry.path))
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
