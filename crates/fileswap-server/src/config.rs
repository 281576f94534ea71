use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Sample values from shipped env templates. Treated as unset.
const PLACEHOLDER_VALUES: &[&str] = &[
    "https://your-project-id.supabase.co",
    "your-supabase-anon-key-here",
    "your-vercel-blob-token-here",
];

const DEFAULT_BLOB_URL: &str = "https://blob.vercel-storage.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Memory,
    Json(PathBuf),
    Sqlite(PathBuf),
    Postgrest {
        url: String,
        key: String,
        table: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobConfig {
    Local(PathBuf),
    Hosted {
        url: String,
        token: String,
        /// Host whose URLs may be downloaded or deleted. `None` means the
        /// host of `url`.
        public_host: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub store: StoreConfig,
    pub blob: BlobConfig,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from any key/value source. Blank and placeholder
    /// values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && !PLACEHOLDER_VALUES.contains(&v.as_str()))
        };

        let host = var("FILESWAP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("FILESWAP_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("FILESWAP_PORT must be a port number")?;

        let store_url = var("FILESWAP_STORE_URL");
        let store_key = var("FILESWAP_STORE_KEY");
        let store_path = var("FILESWAP_STORE_PATH").map(PathBuf::from);
        let store_kind = var("FILESWAP_STORE").unwrap_or_else(|| {
            if store_url.is_some() && store_key.is_some() {
                "postgrest".into()
            } else {
                "memory".into()
            }
        });

        let store = match store_kind.to_ascii_lowercase().as_str() {
            "memory" => StoreConfig::Memory,
            "json" => StoreConfig::Json(store_path.unwrap_or_else(|| "fileswap.json".into())),
            "sqlite" => StoreConfig::Sqlite(store_path.unwrap_or_else(|| "fileswap.db".into())),
            "postgrest" => match (store_url, store_key) {
                (Some(url), Some(key)) => StoreConfig::Postgrest {
                    url,
                    key,
                    table: var("FILESWAP_STORE_TABLE").unwrap_or_else(|| "swaps".into()),
                },
                _ => bail!("FILESWAP_STORE=postgrest needs FILESWAP_STORE_URL and FILESWAP_STORE_KEY"),
            },
            other => bail!(
                "Unknown FILESWAP_STORE '{}' (expected memory, json, sqlite or postgrest)",
                other
            ),
        };

        let blob_token = var("FILESWAP_BLOB_TOKEN");
        let blob_kind = var("FILESWAP_BLOB").unwrap_or_else(|| {
            if blob_token.is_some() {
                "hosted".into()
            } else {
                "local".into()
            }
        });

        let blob = match blob_kind.to_ascii_lowercase().as_str() {
            "local" => BlobConfig::Local(
                var("FILESWAP_UPLOADS_DIR")
                    .unwrap_or_else(|| "./public/uploads".into())
                    .into(),
            ),
            "hosted" => match blob_token {
                Some(token) => BlobConfig::Hosted {
                    url: var("FILESWAP_BLOB_URL").unwrap_or_else(|| DEFAULT_BLOB_URL.into()),
                    token,
                    public_host: var("FILESWAP_BLOB_PUBLIC_HOST"),
                },
                None => bail!("FILESWAP_BLOB=hosted needs FILESWAP_BLOB_TOKEN"),
            },
            other => bail!("Unknown FILESWAP_BLOB '{}' (expected local or hosted)", other),
        };

        let sweep_secs: u64 = var("FILESWAP_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|| "300".into())
            .parse()
            .context("FILESWAP_SWEEP_INTERVAL_SECS must be a number of seconds")?;
        if sweep_secs == 0 {
            bail!("FILESWAP_SWEEP_INTERVAL_SECS must be positive");
        }

        Ok(Self {
            host,
            port,
            store,
            blob,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}
