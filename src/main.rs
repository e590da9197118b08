use anyhow::{Context, Result, anyhow, bail};
use chunkup::{FileHandle, LocalFile, UploadError, UploadEvent, UploadSession, auto_chunk_size};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use futures::StreamExt;
use iocraft::prelude::*;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::config::{ChunkSize, Config, parse_chunk_size};
use crate::ui::{
    ConfigHeader, ErrorMessage, InputPrompt, PlanTable, ProgressBar, SuccessMessage, format_size,
};

mod config;
mod ui;

const PLAN_TABLE_ROWS: usize = 50;

#[derive(Parser)]
#[command(name = "chunkup")]
#[command(version)]
#[command(about = "Upload large files to a remote store in parts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct UploadArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    file: PathBuf,
    /// Name to store the file under (defaults to the file name)
    #[arg(short, long)]
    name: Option<String>,
    /// MIME type (guessed from the extension when omitted)
    #[arg(short, long)]
    mime: Option<String>,
    /// Part size, e.g. 5MiB, 8388608 or auto
    #[arg(short = 's', long, value_parser = parse_chunk_size)]
    chunk_size: Option<ChunkSize>,
    /// Number of parts to upload at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
    /// Retries per part for network and server errors
    #[arg(long)]
    retries: Option<u32>,
    /// Update the progress bar as bytes are sent rather than per part
    #[arg(long)]
    byte_progress: bool,
    /// Ask the server to discard stored parts if the upload fails
    #[arg(long)]
    abort_on_failure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file
    Upload(UploadArgs),
    /// Show how a file would be split into parts
    Plan {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Part size, e.g. 5MiB, 8388608 or auto
        #[arg(short = 's', long, value_parser = parse_chunk_size)]
        chunk_size: Option<ChunkSize>,
    },
    /// Configure chunkup interactively
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    rt.block_on(async {
        match cli.command {
            Commands::Config => interactive_config(),
            Commands::Plan { file, chunk_size } => {
                let config = config::read_config()?;
                print_plan(&file, chunk_size.unwrap_or(config.chunk_size)).await
            }
            Commands::Upload(args) => {
                let config = config::read_config()?;
                upload_file(&config, args).await
            }
        }
    })
}

fn resolve_chunk_size(chunk_size: ChunkSize, file_size: u64) -> Result<u64> {
    match chunk_size {
        ChunkSize::Bytes(bytes) => Ok(bytes),
        ChunkSize::Auto => Ok(auto_chunk_size(file_size)?),
    }
}

async fn print_plan(path: &Path, chunk_size: ChunkSize) -> Result<()> {
    let file = LocalFile::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let chunk_size = resolve_chunk_size(chunk_size, file.size())?;
    let plan = chunkup::plan(file.size(), chunk_size)?;

    println!(
        "{}: {} in {} part(s) of {}",
        path.display(),
        format_size(plan.file_size()),
        plan.total_parts(),
        format_size(plan.chunk_size())
    );
    let rows: Vec<_> = plan.iter().take(PLAN_TABLE_ROWS).collect();
    element!(PlanTable(parts: rows)).print();
    if plan.total_parts() as usize > PLAN_TABLE_ROWS {
        println!("... {} more part(s)", plan.total_parts() as usize - PLAN_TABLE_ROWS);
    }
    Ok(())
}

async fn upload_file(config: &Config, args: UploadArgs) -> Result<()> {
    let file = LocalFile::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let total_bytes = file.size();

    let filename = args
        .name
        .or_else(|| file.file_name())
        .ok_or_else(|| anyhow!("Unable to determine a name for {}", args.file.display()))?;
    let mime_type = args.mime.unwrap_or_else(|| {
        mime_guess::from_path(&args.file)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    let chunk_size = resolve_chunk_size(args.chunk_size.unwrap_or(config.chunk_size), total_bytes)?;
    let mut options = config.upload_options(chunk_size);
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        options.concurrency = concurrency;
    }
    if let Some(retries) = args.retries {
        options.retry.max_retries = retries;
    }
    options.byte_progress = args.byte_progress;
    options.abort_on_failure |= args.abort_on_failure;

    let session = UploadSession::new(
        Arc::new(config.client()),
        file,
        filename.clone(),
        mime_type,
        options,
    );

    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut stream = session.events();
    let (tx, rx) = watch::channel(0.0f32);

    let process_stream = async {
        let mut bytes_sent = 0u64;
        let mut response = None;
        while let Some(event) = stream.next().await {
            let percent = match event? {
                UploadEvent::Initiated { .. } => continue,
                UploadEvent::Transferred { bytes } => {
                    bytes_sent += bytes;
                    if total_bytes == 0 {
                        continue;
                    }
                    (bytes_sent as f32 / total_bytes as f32 * 100.0).min(100.0)
                }
                UploadEvent::Progress(p) => f32::from(p.percent),
                UploadEvent::Completed(r) => {
                    response = Some(r);
                    break;
                }
            };
            tx.send_if_modified(|current| {
                if percent > *current {
                    *current = percent;
                    true
                } else {
                    false
                }
            });
        }
        response.ok_or_else(|| UploadError::protocol("upload ended without a result"))
    };

    let mut progress_bar =
        element!(ProgressBar(title: format!("Uploading {}", filename), progress: Some(rx)));

    let result = tokio::select! {
        result = process_stream => result,
        _ = progress_bar.render_loop() => {
            unreachable!("render_loop should not terminate")
        }
    };

    match result {
        Ok(response) => {
            element!(SuccessMessage(message: format!("Uploaded {}", filename))).print();
            println!("{}", response.location);
            Ok(())
        }
        Err(UploadError::Cancelled) => {
            element!(ErrorMessage(message: "Upload cancelled".to_string())).print();
            bail!("Upload of {} was cancelled", filename)
        }
        Err(e) => {
            element!(ErrorMessage(message: e.message())).print();
            Err(e).with_context(|| format!("Failed to upload {}", filename))
        }
    }
}

fn read_input(prompt: &str, default: Option<&str>, description: Option<&str>) -> Result<String> {
    element! {
        InputPrompt(
            prompt: prompt.to_string(),
            default: default.map(|s| s.to_string()),
            description: description.map(|s| s.to_string())
        )
    }
    .print();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim().to_string();

    if input.is_empty() {
        Ok(default.map(|d| d.to_string()).unwrap_or(input))
    } else {
        Ok(input)
    }
}

fn interactive_config() -> Result<()> {
    element!(ConfigHeader()).print();

    let existing = config::read_config_file()?;
    let current_url = existing
        .base_url
        .as_ref()
        .map(|url| url.to_string())
        .unwrap_or_else(|| config::DEFAULT_BASE_URL.to_string());
    let current_chunk_size = existing
        .chunk_size
        .clone()
        .unwrap_or_else(|| "5MiB".to_string());
    let current_concurrency = existing.concurrency.unwrap_or(1).to_string();

    let base_url = loop {
        let base_url_str = read_input(
            "Upload server URL",
            Some(&current_url),
            Some("Where the /upload endpoints are served"),
        )?;

        match Url::parse(&base_url_str) {
            Ok(url) => break url,
            Err(e) => {
                element!(ErrorMessage(message: format!("Invalid URL: {}", e))).print();
                println!();
            }
        }
    };

    let chunk_size = loop {
        let chunk_size = read_input(
            "Part size",
            Some(&current_chunk_size),
            Some("Size of each uploaded part, or 'auto' to scale with the file"),
        )?;

        match parse_chunk_size(&chunk_size) {
            Ok(_) => break chunk_size,
            Err(e) => {
                element!(ErrorMessage(message: e)).print();
                println!();
            }
        }
    };

    let concurrency = loop {
        let concurrency = read_input(
            "Concurrent parts",
            Some(&current_concurrency),
            Some("How many parts may be in flight at once"),
        )?;

        match concurrency.parse::<usize>() {
            Ok(n) if n > 0 => break n,
            _ => {
                element!(ErrorMessage(message: "Enter a whole number of at least 1".to_string()))
                    .print();
                println!();
            }
        }
    };

    config::write_config(existing.with_prompted(base_url, chunk_size, concurrency))?;

    element!(SuccessMessage(message: format!(
        "Configuration written to {}",
        config::config_file_path()?.display()
    )))
    .print();

    Ok(())
}
