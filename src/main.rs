//! layerfs - a stackable block-transform filesystem pipeline.
//!
//! Drives the filesystem-call surface of a pipeline assembled from a JSON
//! configuration: block alignment, per-block ciphers and multi-device coding.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use layerfs::config::{CipherMode, CoderMode, KeyMaterial, PipelineConfig};
use layerfs::crypto::KeyDerivation;
use layerfs::{FileKind, Pipeline};
use log::LevelFilter;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "layerfs")]
#[command(author, version, about, long_about = None)]
#[command(
    about = "Stackable filesystem pipeline with block ciphers and multi-device coding",
    long_about = "Runs filesystem calls through a block aligner, a per-block cipher and a replicating, XOR or erasure coding device stage."
)]
struct Cli {
    /// Pipeline configuration (JSON)
    #[arg(long, short, global = true, default_value = "layerfs.json")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write data into a file, creating it if needed
    Write {
        /// Pipeline path of the file
        path: String,

        /// Input file to write
        #[arg(long, conflicts_with = "data")]
        input: Option<PathBuf>,

        /// String data to write
        #[arg(long, conflicts_with = "input")]
        data: Option<String>,

        /// Byte offset to write at
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Read a file
    Read {
        /// Pipeline path of the file
        path: String,

        /// Byte offset to read from
        #[arg(long, default_value = "0")]
        offset: u64,

        /// Bytes to read (default: to end of file)
        #[arg(long)]
        size: Option<usize>,

        /// Output file (default: stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show attributes of a path
    Stat {
        path: String,
    },

    /// Set the size of a file
    Truncate {
        path: String,
        size: u64,
    },

    /// List directory contents
    Ls {
        /// Directory to list (default: /)
        #[arg(default_value = "/")]
        path: String,
    },

    /// Create a directory
    Mkdir {
        path: String,
    },

    /// Delete a file
    Rm {
        path: String,
    },

    /// Delete an empty directory
    Rmdir {
        path: String,
    },

    /// Rename a file or directory
    Mv {
        from: String,
        to: String,
    },

    /// Print a configuration for the given devices
    InitConfig {
        /// Device root directory (repeat per device)
        #[arg(long = "device", required = true)]
        devices: Vec<PathBuf>,

        #[arg(long, value_enum, default_value = "replicate")]
        coder: CoderArg,

        #[arg(long, value_enum, default_value = "null")]
        cipher: CipherArg,

        /// Block size in bytes
        #[arg(long, default_value = "4096")]
        block_size: u64,

        /// Erasure data shards
        #[arg(long, default_value = "2")]
        k: usize,

        /// Erasure parity shards
        #[arg(long, default_value = "1")]
        m: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CoderArg {
    Replicate,
    Xor,
    Erasure,
}

#[derive(Clone, Copy, ValueEnum)]
enum CipherArg {
    Null,
    NullPadded,
    Deterministic,
    RandomIv,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        config,
        verbose,
        command,
    } = cli;

    match command {
        Commands::InitConfig {
            devices,
            coder,
            cipher,
            block_size,
            k,
            m,
        } => {
            init_logging(verbose, None);
            cmd_init_config(devices, coder, cipher, block_size, k, m)
        }
        command => {
            let loaded = PipelineConfig::load(&config)?;
            init_logging(verbose, loaded.log_level.as_deref());
            let pipeline = Pipeline::assemble_with_prompt(loaded, |prompt| {
                rpassword::prompt_password(prompt).map_err(layerfs::Error::from)
            })
            .with_context(|| format!("cannot assemble pipeline from {}", config.display()))?;

            let result = run_command(&pipeline, command);
            pipeline.shutdown()?;
            result
        }
    }
}

fn run_command(pipeline: &Pipeline, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Write {
            path,
            input,
            data,
            offset,
        } => cmd_write(pipeline, &path, input, data, offset),
        Commands::Read {
            path,
            offset,
            size,
            output,
        } => cmd_read(pipeline, &path, offset, size, output.as_deref()),
        Commands::Stat { path } => cmd_stat(pipeline, &path),
        Commands::Truncate { path, size } => {
            pipeline.truncate(&path, size, None)?;
            println!("Truncated {} to {} bytes", path, size);
            Ok(())
        }
        Commands::Ls { path } => cmd_ls(pipeline, &path),
        Commands::Mkdir { path } => {
            pipeline.mkdir(&path, 0o755)?;
            println!("Created directory {}", path);
            Ok(())
        }
        Commands::Rm { path } => {
            pipeline.unlink(&path)?;
            println!("Deleted {}", path);
            Ok(())
        }
        Commands::Rmdir { path } => {
            pipeline.rmdir(&path)?;
            println!("Deleted directory {}", path);
            Ok(())
        }
        Commands::Mv { from, to } => {
            pipeline.rename(&from, &to)?;
            println!("Renamed {} to {}", from, to);
            Ok(())
        }
        Commands::InitConfig { .. } => bail!("init-config does not run against a pipeline"),
    }
}

/// RUST_LOG wins, then -v flags, then the configured level.
fn init_logging(verbose: u8, configured: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    let level = match verbose {
        0 => configured
            .and_then(|level| level.parse().ok())
            .unwrap_or(LevelFilter::Warn),
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn cmd_write(
    pipeline: &Pipeline,
    path: &str,
    input: Option<PathBuf>,
    data: Option<String>,
    offset: u64,
) -> anyhow::Result<()> {
    let content = match (input, data) {
        (Some(file), None) => {
            std::fs::read(&file).with_context(|| format!("cannot read {}", file.display()))?
        }
        (None, Some(s)) => s.into_bytes(),
        (None, None) => {
            let mut buffer = Vec::new();
            io::stdin().read_to_end(&mut buffer)?;
            buffer
        }
        (Some(_), Some(_)) => bail!("--input and --data are mutually exclusive"),
    };

    let written = pipeline.write_file(path, &content, offset)?;
    println!("Wrote {} bytes to {} at offset {}", written, path, offset);
    if written < content.len() {
        bail!("short write: {} of {} bytes", written, content.len());
    }
    Ok(())
}

fn cmd_read(
    pipeline: &Pipeline,
    path: &str,
    offset: u64,
    size: Option<usize>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let data = pipeline.read_file(path, offset, size)?;

    match output {
        Some(file) => {
            std::fs::write(file, &data)?;
            println!("Wrote {} bytes to {}", data.len(), file.display());
        }
        None => io::stdout().write_all(&data)?,
    }
    Ok(())
}

fn cmd_stat(pipeline: &Pipeline, path: &str) -> anyhow::Result<()> {
    let attr = pipeline.getattr(path)?;

    println!("Path:     {}", path);
    println!("Type:     {:?}", attr.kind);
    println!("Size:     {} bytes", attr.size);
    println!("Mode:     {:o}", attr.mode & 0o7777);
    println!("Links:    {}", attr.nlink);
    println!("Owner:    {}:{}", attr.uid, attr.gid);
    println!("Modified: {}", attr.modified);
    Ok(())
}

fn cmd_ls(pipeline: &Pipeline, path: &str) -> anyhow::Result<()> {
    let handle = pipeline.opendir(path)?;
    let entries = pipeline.readdir(path, &handle);
    pipeline.releasedir(path, handle)?;
    let entries = entries?;

    if entries.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    let base = path.trim_end_matches('/');
    for entry in entries {
        let type_char = match entry.kind {
            FileKind::Directory => 'd',
            FileKind::Symlink => 'l',
            _ => '-',
        };
        let size = if entry.kind == FileKind::File {
            pipeline
                .getattr(&format!("{}/{}", base, entry.name))
                .map(|attr| attr.size.to_string())
                .unwrap_or_else(|_| "?".to_string())
        } else {
            "-".to_string()
        };
        println!("{} {:>10}  {}", type_char, size, entry.name);
    }
    Ok(())
}

fn cmd_init_config(
    devices: Vec<PathBuf>,
    coder: CoderArg,
    cipher: CipherArg,
    block_size: u64,
    k: usize,
    m: usize,
) -> anyhow::Result<()> {
    let coder = match coder {
        CoderArg::Replicate => CoderMode::Replicate,
        CoderArg::Xor => CoderMode::Xor,
        CoderArg::Erasure => CoderMode::Erasure,
    };
    let cipher = match cipher {
        CipherArg::Null => CipherMode::Null,
        CipherArg::NullPadded => CipherMode::NullPadded,
        CipherArg::Deterministic => CipherMode::Deterministic,
        CipherArg::RandomIv => CipherMode::RandomIv,
    };
    let key = match cipher {
        CipherMode::Deterministic | CipherMode::RandomIv => Some(KeyMaterial::Prompt {
            salt: KeyDerivation::new().salt_hex(),
        }),
        _ => None,
    };

    let mut config = PipelineConfig::new(devices)
        .with_block_size(block_size)
        .with_coder(coder)
        .with_cipher(cipher, key);
    if coder == CoderMode::Erasure {
        config = config.with_erasure(k, m);
    }
    config.validate()?;

    println!("{}", config.to_json()?);
    Ok(())
}
