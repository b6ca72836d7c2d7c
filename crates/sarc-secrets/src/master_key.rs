//! Master key discovery and loading

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use sarc_core::config::SecretsConfig;
use sarc_crypto::{MasterKey, KEY_SIZE};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Name of the systemd credential holding the key
pub const SYSTEMD_CREDENTIAL: &str = "sarc-master-key";

/// One place a master key may come from.
#[derive(Debug)]
pub enum MasterKeySource {
    /// File with 32 raw bytes or base64 text
    File { path: PathBuf, origin: String },
    /// Base64 text (from an environment variable)
    Inline { value: SecretString, origin: String },
}

impl MasterKeySource {
    pub fn origin(&self) -> &str {
        match self {
            MasterKeySource::File { origin, .. } | MasterKeySource::Inline { origin, .. } => origin,
        }
    }
}

/// Collect candidate sources in precedence order from env + config.
pub fn discover_sources(config: &SecretsConfig) -> Vec<MasterKeySource> {
    let mut sources = Vec::new();

    if let Ok(cred_dir) = std::env::var("CREDENTIALS_DIRECTORY") {
        let path = PathBuf::from(&cred_dir).join(SYSTEMD_CREDENTIAL);
        if path.exists() {
            sources.push(MasterKeySource::File {
                origin: format!("systemd:{}", path.display()),
                path,
            });
        }
    }

    if let Ok(key_file) = std::env::var("SARC_MASTER_KEY_FILE") {
        let path = PathBuf::from(&key_file);
        sources.push(MasterKeySource::File {
            origin: format!("SARC_MASTER_KEY_FILE:{}", path.display()),
            path,
        });
    }

    if let Ok(value) = std::env::var("SARC_MASTER_KEY") {
        if !value.is_empty() {
            sources.push(MasterKeySource::Inline {
                value: SecretString::from(value),
                origin: "SARC_MASTER_KEY (env)".into(),
            });
        }
    }

    if let Some(path) = &config.master_key_file {
        sources.push(MasterKeySource::File {
            origin: format!("config:{}", path.display()),
            path: path.clone(),
        });
    }

    sources
}

/// Load the master key using the full discovery chain.
///
/// Fails if no source is configured or the first source found does not hold
/// exactly 32 bytes. Later sources are never consulted as a fallback for a
/// broken earlier one.
pub async fn load_master_key(config: &SecretsConfig) -> Result<MasterKey> {
    load_from_sources(discover_sources(config)).await
}

pub async fn load_from_sources(sources: Vec<MasterKeySource>) -> Result<MasterKey> {
    let Some(source) = sources.into_iter().next() else {
        anyhow::bail!(
            "no master key found. Tried: $CREDENTIALS_DIRECTORY/{SYSTEMD_CREDENTIAL}, \
             $SARC_MASTER_KEY_FILE, $SARC_MASTER_KEY, and secrets.master_key_file. \
             Generate one with: sarcd keygen --out <path>"
        );
    };

    let key = match &source {
        MasterKeySource::File { path, .. } => {
            let raw = Zeroizing::new(
                tokio::fs::read(path)
                    .await
                    .with_context(|| format!("reading master key: {}", path.display()))?,
            );
            decode_key_material(&raw)
        }
        MasterKeySource::Inline { value, .. } => {
            decode_key_material(value.expose_secret().as_bytes())
        }
    }
    .with_context(|| format!("invalid master key from {}", source.origin()))?;

    tracing::info!(source = %source.origin(), "master key loaded");
    Ok(key)
}

/// Accept exactly 32 raw bytes, or base64 text that decodes to 32 bytes.
fn decode_key_material(raw: &[u8]) -> Result<MasterKey> {
    if raw.len() == KEY_SIZE {
        return MasterKey::from_slice(raw).map_err(|e| anyhow::anyhow!("{e}"));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| anyhow::anyhow!("expected {KEY_SIZE} raw bytes, got {}", raw.len()))?;
    let decoded = Zeroizing::new(
        STANDARD
            .decode(text.trim())
            .map_err(|_| anyhow::anyhow!("expected {KEY_SIZE} raw bytes or base64 text"))?,
    );
    MasterKey::from_slice(&decoded).map_err(|e| anyhow::anyhow!("{e}"))
}

/// Write a fresh random master key (32 raw bytes) to `path`, mode 0600.
///
/// Refuses to overwrite an existing file: losing the master key makes every
/// archive sealed under it unrecoverable.
pub fn generate_master_key_file(path: &Path) -> Result<()> {
    use std::io::Write;

    if path.exists() {
        anyhow::bail!("refusing to overwrite existing key file: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating key dir: {}", parent.display()))?;
    }

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut key[..]);

    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts
        .open(path)
        .with_context(|| format!("creating key file: {}", path.display()))?;
    file.write_all(&key[..])
        .with_context(|| format!("writing key file: {}", path.display()))?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file_source(path: &Path) -> MasterKeySource {
        MasterKeySource::File {
            path: path.to_path_buf(),
            origin: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_load_raw_key_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("master.key");
        std::fs::write(&path, [7u8; KEY_SIZE]).unwrap();

        let key = load_from_sources(vec![file_source(&path)]).await.unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_SIZE]);
    }

    #[tokio::test]
    async fn test_load_base64_key_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("master.key");
        std::fs::write(&path, format!("{}\n", STANDARD.encode([9u8; KEY_SIZE]))).unwrap();

        let key = load_from_sources(vec![file_source(&path)]).await.unwrap();
        assert_eq!(key.as_bytes(), &[9u8; KEY_SIZE]);
    }

    #[tokio::test]
    async fn test_load_inline() {
        let source = MasterKeySource::Inline {
            value: SecretString::from(STANDARD.encode([3u8; KEY_SIZE])),
            origin: "test".into(),
        };
        let key = load_from_sources(vec![source]).await.unwrap();
        assert_eq!(key.as_bytes(), &[3u8; KEY_SIZE]);
    }

    #[tokio::test]
    async fn test_wrong_length_rejected() {
        let tmp = TempDir::new().unwrap();
        let short = tmp.path().join("short.key");
        std::fs::write(&short, [1u8; 31]).unwrap();
        assert!(load_from_sources(vec![file_source(&short)]).await.is_err());

        let b64_long = tmp.path().join("long.key");
        std::fs::write(&b64_long, STANDARD.encode([1u8; 48])).unwrap();
        assert!(load_from_sources(vec![file_source(&b64_long)]).await.is_err());
    }

    #[tokio::test]
    async fn test_no_source_fails() {
        let err = load_from_sources(Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("no master key found"));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        let result = load_from_sources(vec![file_source(&tmp.path().join("nope"))]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_generate_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys/master.key");

        generate_master_key_file(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), KEY_SIZE as u64);
        assert!(generate_master_key_file(&path).is_err(), "must not overwrite");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        load_from_sources(vec![file_source(&path)]).await.unwrap();
    }
}
