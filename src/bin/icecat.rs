//! Reads a single key out of an Icechunk repository laid out on the
//! local filesystem and writes its bytes to stdout.
//!
//! The repository root is expected to contain the usual
//! `snapshots/`, `manifests/`, `chunks/`, and `refs/` directories, laid
//! out exactly as the object store would see them -- this binary just
//! swaps the HTTP transport for local file reads.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;
use icechunk_store::error::IcechunkError;
use icechunk_store::refs::RefSpec;
use icechunk_store::store::{Store, StoreOptions};
use icechunk_store::transport::{FetchOptions, Transport};

#[derive(Parser)]
struct Args {
    /// Root directory of the Icechunk repository.
    root: PathBuf,

    /// Key to read, e.g. `zarr.json` or `data/c/0/0`. Defaults to the
    /// root group's metadata document.
    #[arg(default_value = "zarr.json")]
    key: String,

    /// Branch to resolve. Ignored if `--tag` or `--snapshot` is given.
    #[arg(long, default_value = "main")]
    branch: String,

    /// Tag to resolve instead of a branch.
    #[arg(long)]
    tag: Option<String>,

    /// Exact snapshot id to resolve instead of a branch or tag.
    #[arg(long)]
    snapshot: Option<String>,
}

/// A [`Transport`] that reads from a directory tree instead of the network.
#[derive(Debug, Clone)]
struct FileTransport {
    root: PathBuf,
}

fn path_for(root: &Path, url: &str) -> PathBuf {
    // `url` arrives as `{root_url}{relative_path}`; `root_url` is built by
    // `url::normalise_root`, which collapses every trailing slash down to
    // exactly one -- so the `file:` scheme we pass to `Store::open` comes
    // back here as `file:/{relative_path}`, not `file://{relative_path}`.
    // Strip the scheme down to `file:` and trim the remaining leading `/`
    // so `Path::join` doesn't treat the fragment as an absolute override
    // of `root`.
    let relative = url.strip_prefix("file:").unwrap_or(url);
    root.join(relative.trim_start_matches('/'))
}

impl Transport for FileTransport {
    async fn fetch(&self, url: &str, _options: Option<FetchOptions>) -> Result<Vec<u8>, IcechunkError> {
        let path = path_for(&self.root, url);
        tokio::fs::read(&path)
            .await
            .map_err(|e| IcechunkError::io(url, None, format!("reading {}: {e}", path.display())))
    }

    async fn fetch_range(
        &self,
        url: &str,
        offset: u64,
        length: u64,
        _options: Option<FetchOptions>,
    ) -> Result<Vec<u8>, IcechunkError> {
        let path = path_for(&self.root, url);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| IcechunkError::io(url, None, format!("reading {}: {e}", path.display())))?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(usize::try_from(length).unwrap_or(usize::MAX));
        data.get(start..end.min(data.len()))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| IcechunkError::io(url, Some(416), "range out of bounds"))
    }
}

fn ref_spec(args: &Args) -> RefSpec {
    if let Some(snapshot) = &args.snapshot {
        RefSpec::Snapshot(snapshot.clone())
    } else if let Some(tag) = &args.tag {
        RefSpec::Tag(tag.clone())
    } else {
        RefSpec::Branch(args.branch.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let transport = FileTransport { root: args.root.clone() };
    let options = StoreOptions { ref_spec: ref_spec(&args), headers: HashMap::new(), ..StoreOptions::default() };

    let store = Store::open(transport, "file://", options, None).await?;

    match store.get(&args.key, None).await? {
        Some(bytes) => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
        None => {
            eprintln!("{}: not found", args.key);
            std::process::exit(1);
        }
    }

    Ok(())
}
