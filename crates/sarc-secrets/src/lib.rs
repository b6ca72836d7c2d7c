//! sarc-secrets: master key and storage credential loading
//!
//! Master key discovery chain (in order of precedence):
//!   1. $CREDENTIALS_DIRECTORY/sarc-master-key  (systemd LoadCredentialEncrypted)
//!   2. $SARC_MASTER_KEY_FILE env var (path to key file)
//!   3. $SARC_MASTER_KEY env var (base64 key)
//!   4. secrets.master_key_file from sarc.toml

pub mod master_key;

pub use master_key::{generate_master_key_file, load_master_key, MasterKeySource};

use anyhow::Result;
use secrecy::SecretString;

/// Loaded S3 credentials
#[derive(Debug)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

/// Credential store for the object storage backend
pub struct CredStore {
    pub s3: Option<S3Credentials>,
    pub source: String,
}

impl CredStore {
    /// Load S3 credentials from the environment (AWS_ACCESS_KEY_ID etc.)
    pub fn load_from_env() -> Result<Self> {
        let access_key = std::env::var("AWS_ACCESS_KEY_ID")
            .or_else(|_| std::env::var("SARC_ACCESS_KEY_ID"))
            .unwrap_or_default();
        let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .or_else(|_| std::env::var("SARC_SECRET_ACCESS_KEY"))
            .unwrap_or_default();

        Ok(CredStore {
            s3: if !access_key.is_empty() {
                Some(S3Credentials {
                    access_key_id: access_key,
                    secret_access_key: SecretString::from(secret_key),
                })
            } else {
                None
            },
            source: "env".into(),
        })
    }
}
