//! Build an addressee list for automail from a name list and an email
//! directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use automail::directory;

/// Compose addressee records: select by attribute, add parameters, look up
/// each name's email and split it into first and last name.
#[derive(Debug, Parser)]
#[command(name = "makelist", version)]
struct Args {
    /// JSON list of names and other attributes; repeatable
    #[arg(short, long, value_name = "FILE", required = true)]
    list: Vec<PathBuf>,

    /// JSON directory of `name` and `email` records; repeatable
    #[arg(short, long, value_name = "FILE", required = true)]
    directory: Vec<PathBuf>,

    /// Keep only records whose attribute NAME equals VALUE; repeatable
    #[arg(short, long, num_args = 2, value_names = ["NAME", "VALUE"])]
    attribute: Vec<String>,

    /// Set attribute NAME to VALUE on every record; repeatable
    #[arg(short, long, num_args = 2, value_names = ["NAME", "VALUE"])]
    parameter: Vec<String>,

    /// Write here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    outfile: Option<PathBuf>,
}

fn pairs(flat: &[String]) -> Vec<(String, String)> {
    flat.chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();

    let list = directory::load_sources(&args.list).await?;
    let entries = directory::load_sources(&args.directory).await?;
    let records = directory::compose(
        &list,
        &entries,
        &pairs(&args.attribute),
        &pairs(&args.parameter),
    )?;
    tracing::info!(selected = records.len(), of = list.len(), "List composed");

    let mut json = directory::to_json(&records)?;
    json.push('\n');
    match &args.outfile {
        Some(path) => tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print!("{json}"),
    }
    Ok(())
}
