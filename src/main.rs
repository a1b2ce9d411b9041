//! Rpak CLI - command-line tool for RPak asset containers.
//!
//! Inspects container headers and tables, converts between compressed and
//! decoded forms, and loads containers through the asynchronous runtime.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn, LevelFilter};

use rpak::format::{ContainerFile, ContainerLayout, PatchFileHeader, PatchInfo};
use rpak::prelude::*;
use rpak::runtime::chain_file_name;

/// Rpak - RPak asset container tool
#[derive(Parser)]
#[command(name = "rpak")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Runtime configuration file (TOML)
    #[arg(short, long, global = true, env = "RPAK_CONFIG")]
    config: Option<PathBuf>,

    /// More log output; repeat for more
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a container's header and tables
    Info {
        /// Container file
        input: PathBuf,

        /// List every asset
        #[arg(short, long)]
        assets: bool,
    },

    /// Write the decoded form of a compressed container
    ///
    /// For a patch container the chain sizes in its patch area are refreshed
    /// from the chain files next to the output, or failing that next to the
    /// input.
    Decompress {
        /// Input container
        #[arg(short, long)]
        input: PathBuf,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compress a decoded container
    Compress {
        /// Input container (decoded)
        #[arg(short, long)]
        input: PathBuf,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,

        /// Use Zstandard instead of DEFLATE
        #[arg(long)]
        zstd: bool,

        /// Compression level
        #[arg(short, long, default_value_t = 6)]
        level: u32,
    },

    /// Load containers through the runtime and report what they publish
    Load {
        /// Container names, resolved like the game does
        #[arg(required = true)]
        names: Vec<String>,

        /// Game root; overrides the configuration
        #[arg(short, long, env = "RPAK_BASE_DIR")]
        base_dir: Option<PathBuf>,

        /// Asset job threads (0 = one per CPU)
        #[arg(short, long, default_value_t = 0)]
        threads: usize,

        /// Also print the asset type table the loads filled in
        #[arg(long)]
        types: bool,
    },

    /// Print the GUID of an asset path
    Guid {
        /// Asset paths
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::Info { input, assets } => {
            cmd_info(&input, assets)?;
        }
        Commands::Decompress { input, output } => {
            cmd_decompress(&input, &output)?;
        }
        Commands::Compress {
            input,
            output,
            zstd,
            level,
        } => {
            let compression = if zstd { Compression::Zstd } else { Compression::Deflate };
            cmd_compress(&input, &output, compression, level)?;
        }
        Commands::Load {
            names,
            base_dir,
            threads,
            types,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(base_dir) = base_dir {
                config.base_dir = base_dir;
            }
            cmd_load(config, &names, threads, types)?;
        }
        Commands::Guid { names } => {
            for name in names {
                println!("{} {}", PakGuid::from_name(&name), name);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PakConfig> {
    match path {
        Some(path) => PakConfig::load(path).with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(PakConfig::default()),
    }
}

fn open_container(path: &Path) -> Result<ContainerFile> {
    ContainerFile::open(path, &FormatLimits::default()).with_context(|| format!("Failed to open {}", path.display()))
}

fn decode(bytes: &[u8]) -> Result<Vec<u8>> {
    decode_container(bytes, &FormatLimits::default(), &DecoderConfig::default()).context("Failed to decode container")
}

fn cmd_info(path: &Path, list_assets: bool) -> Result<()> {
    let file = open_container(path)?;
    let header = *file.header();

    println!("File:          {}", path.display());
    println!("Version:       {}", header.version);
    println!("Flags:         {:#06x}", header.flags);
    println!("Compression:   {}", header.compression().name());
    println!(
        "Size:          {} bytes on disk, {} decoded",
        header.compressed_size, header.decompressed_size
    );
    if header.embedded_size > 0 || header.embedded_opt_size > 0 {
        println!(
            "Embedded:      {} mandatory, {} optional streaming bytes",
            header.embedded_size, header.embedded_opt_size
        );
    }

    let decoded = decode(file.bytes())?;

    if header.is_patched() {
        let info = PatchInfo::parse(&decoded, &header).context("Failed to read patch area")?;
        println!("Patch:         {} chain files", info.files.len());
        for (number, file) in info.numbers.iter().zip(&info.files) {
            println!(
                "  ({number:02}) {:>12} {:>12}",
                file.compressed_size, file.decompressed_size
            );
        }
        println!("Edit stream:   {} bytes", info.data.edit_stream_size);
        return Ok(());
    }

    let container = PakContainer::parse(&decoded, &FormatLimits::default()).context("Failed to parse tables")?;
    println!("Segments:      {}", container.segments().len());
    for (index, segment) in container.segments().iter().enumerate() {
        println!(
            "  [{index:>2}] {:<5} align {:>5} size {:>10}",
            format!("{:?}", segment.kind()),
            segment.alignment,
            segment.size
        );
    }
    println!(
        "Pages:         {} ({} bytes)",
        container.page_count(),
        container.page_data_size()
    );
    println!("Pointers:      {}", container.pointers().len());
    println!("Assets:        {}", container.assets().len());
    println!("Dependencies:  {}", container.guid_descriptors().len());
    for name in container.stream_names() {
        println!("Streaming:     {name}");
    }
    for name in container.opt_stream_names() {
        println!("Optional:      {name}");
    }

    if list_assets {
        for asset in container.assets() {
            println!(
                "{} {} v{:<3} head {}:{:<6} deps {:>3}",
                asset.guid,
                asset.tag,
                asset.version,
                asset.head.index,
                asset.head.offset,
                asset.dependencies_count
            );
        }
    }

    Ok(())
}

fn cmd_decompress(input: &Path, output: &Path) -> Result<()> {
    let file = open_container(input)?;
    let bytes = file.bytes();
    let start = Instant::now();
    let mut decoded = decode(bytes)?;
    if file.header().is_patched() && !update_patch_headers(&mut decoded, input, output)? {
        warn!(
            "{} is a patch container but its chain files were not found; patch headers left as they were",
            input.display()
        );
    }
    fs::write(output, &decoded).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Decoded {} -> {} bytes in {:?}",
        bytes.len(),
        decoded.len(),
        start.elapsed()
    );
    Ok(())
}

/// Rewrite the chain entries of a decoded patch container with the sizes of
/// the chain files that sit next to `output`, or else next to `input`.
/// Returns false, leaving `decoded` untouched, when a chain file is missing.
fn update_patch_headers(decoded: &mut [u8], input: &Path, output: &Path) -> Result<bool> {
    let header = PakHeader::read(decoded)?;
    let info = PatchInfo::parse(decoded, &header).context("Failed to read patch area")?;

    let Some(files) = [output, input]
        .into_iter()
        .find_map(|container| chain_headers(container, &info.numbers))
    else {
        return Ok(false);
    };

    let layout = ContainerLayout::new(&header);
    let entry = std::mem::size_of::<PatchFileHeader>();
    for (index, (path, file)) in files.iter().enumerate() {
        info!(
            "patch header {index}: {} is {} bytes on disk, {} decoded",
            path.display(),
            file.compressed_size,
            file.decompressed_size
        );
        let start = layout.patch_files.start + index * entry;
        decoded[start..start + 8].copy_from_slice(&file.compressed_size.to_le_bytes());
        decoded[start + 8..start + entry].copy_from_slice(&file.decompressed_size.to_le_bytes());
    }
    Ok(true)
}

/// Sizes of every chain file of `container`, if all of them exist.
fn chain_headers(container: &Path, numbers: &[u16]) -> Option<Vec<(PathBuf, PatchFileHeader)>> {
    let base = chain_base_name(container)?;
    let dir = container.parent().unwrap_or(Path::new(""));
    numbers
        .iter()
        .map(|&number| {
            let path = dir.join(chain_file_name(&base, number));
            let file = ContainerFile::open(&path, &FormatLimits::default()).ok()?;
            let sizes = PatchFileHeader {
                compressed_size: file.bytes().len() as u64,
                decompressed_size: file.header().decompressed_size,
            };
            Some((path, sizes))
        })
        .collect()
}

/// File name of `container` with any `(nn)` chain suffix removed.
fn chain_base_name(container: &Path) -> Option<String> {
    let stem = container.file_stem()?.to_str()?;
    let stem = match stem.rfind('(') {
        Some(open) if open > 0 && stem.ends_with(')') => &stem[..open],
        _ => stem,
    };
    Some(match container.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    })
}

fn cmd_compress(input: &Path, output: &Path, compression: Compression, level: u32) -> Result<()> {
    let file = open_container(input)?;
    let bytes = file.bytes();
    let start = Instant::now();
    let encoded = encode_container(bytes, compression, level, &FormatLimits::default())
        .with_context(|| format!("Failed to compress {}", input.display()))?;
    fs::write(output, &encoded).with_context(|| format!("Failed to write {}", output.display()))?;
    println!(
        "Encoded {} -> {} bytes with {} in {:?}",
        bytes.len(),
        encoded.len(),
        compression.name(),
        start.elapsed()
    );
    Ok(())
}

fn cmd_load(config: PakConfig, names: &[String], threads: usize, list_types: bool) -> Result<()> {
    let runtime = PakRuntime::threaded(config, threads).context("Failed to start runtime")?;

    let mut handles = Vec::with_capacity(names.len());
    for name in names {
        let handle = runtime
            .load(name, Arc::new(DefaultAllocator), IoPriority::Normal, LoadFlags::NONE)
            .with_context(|| format!("No free container slot for {name}"))?;
        handles.push(handle);
    }

    let pb = ProgressBar::new(handles.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    loop {
        let busy = runtime.tick();
        pb.set_position((handles.len() - busy.min(handles.len())) as u64);
        if busy == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    pb.finish_with_message("Done");

    let mut failed = 0;
    for info in runtime.loaded_paks() {
        match &info.error {
            Some(error) => {
                failed += 1;
                println!("{} {}: {error}", info.handle, info.name);
            }
            None => println!(
                "{} {}: {} assets, {} pages ({} bytes), {} streaming files, {}",
                info.handle,
                info.name,
                info.asset_count,
                info.page_count,
                info.page_bytes,
                info.streaming_files,
                info.compression.map_or("?", Compression::name)
            ),
        }
    }
    println!(
        "{} assets registered in {:?}",
        runtime.registry().len(),
        start.elapsed()
    );
    if list_types {
        print!("{}", type_table(&runtime.bindings().list()));
    }

    if failed > 0 {
        bail!("{failed} of {} containers failed to load", names.len());
    }
    Ok(())
}

fn type_table(bindings: &[AssetBinding]) -> String {
    let rule = "|------|---------------------------|---------|-------------|-------------|\n";
    let mut table = String::from("| ext  | description               | version | header size | native size |\n");
    table.push_str(rule);
    for binding in bindings {
        table.push_str(&format!(
            "| {:<4} | {:<25} | {:>7} | {:>11} | {:>11} |\n",
            binding.tag.to_string(),
            binding.description,
            binding.version,
            binding.header_size,
            binding.native_size
        ));
    }
    table.push_str(rule);
    table.push_str(&format!("{} registered types\n", bindings.len()));
    table
}
