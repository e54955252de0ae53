use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use nfs_fetch::{DownloadConfig, DownloadOutput, FileHandle, NfsDownload};

pub mod local_client;

use local_client::LocalClient;

const HOSTPORT: &str = "127.0.0.1:2049";

/// Main entry point for the local fetch example
///
/// Serves files from a local directory through an in-process `NfsClient` that
/// answers READs with random-looking delays, then downloads one file either
/// into memory (printing its size) or into a new output file.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let mut config = DownloadConfig::default();
    let mut positional: Vec<String> = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--chunk-size" => {
                let value = args.next().context("--chunk-size needs a value")?;
                config = config.with_chunk_size(value.parse().context("invalid chunk size")?);
            }
            "--in-flight" => {
                let value = args.next().context("--in-flight needs a value")?;
                config = config.with_max_in_flight(value.parse().context("invalid in-flight")?);
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: local_fetch [--chunk-size N] [--in-flight N] <ROOT> <PATH> [OUTPUT]\n\
                     \n\
                     Options:\n\
                       --chunk-size N   Bytes per READ (default 1280)\n\
                       --in-flight N    Outstanding READs (default 4)\n\
                       -h, --help       Show this help and exit"
                );
                return Ok(());
            }
            _ if arg.starts_with('-') => {
                anyhow::bail!("unknown flag: {arg}");
            }
            _ => positional.push(arg),
        }
    }
    let [root, path, rest @ ..] = positional.as_slice() else {
        anyhow::bail!("must supply export root and file path, see --help");
    };

    let client = Arc::new(LocalClient::new(PathBuf::from(root)));
    let mut download =
        NfsDownload::new(client, HOSTPORT.parse()?, FileHandle::default(), path.as_str())
            .with_config(config);
    if let Some(output) = rest.first() {
        download.set_output_file(output)?;
    }
    download.set_progress_callback(|done, total| eprintln!("{done}/{total} bytes"));

    let token = download.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    match download.start().await? {
        DownloadOutput::Buffer(buffer) => println!("downloaded {} bytes into memory", buffer.len()),
        DownloadOutput::File(path) => println!("downloaded to {}", path.display()),
    }
    Ok(())
}
