use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use switchboard_core::{decode_input, GlobalConfig, ObjectSchema, RunnerProvider};
use url::Url;

/// Runner configuration schema loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfigFile {
    /// Semver requirement on the provider protocol version, e.g. `"^2"`.
    #[serde(default)]
    pub protocol_version: Option<String>,
    pub global: GlobalSection,
    /// User configuration per context id.
    #[serde(default)]
    pub contexts: BTreeMap<String, toml::Table>,
}

/// `[global]` section: ingest endpoints handed to every provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSection {
    pub public_ingest_uri: String,
    pub private_ingest_uri: String,
}

/// Validated runner configuration with each context's user configuration
/// encoded as JSON bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub protocol_version: Option<String>,
    pub global: GlobalConfig,
    pub user_config: BTreeMap<String, Vec<u8>>,
}

impl RunnerConfig {
    /// Parse and validate runner configuration TOML.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: RunnerConfigFile =
            toml::from_str(input).context("failed to parse runner config TOML")?;
        Self::from_file(file)
    }

    /// Load and validate runner configuration from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read runner config at {}", path.display()))?;

        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid runner config at {}", path.display()))
    }

    /// Validate a parsed file and encode its contexts.
    pub fn from_file(file: RunnerConfigFile) -> Result<Self> {
        validate_uri("global.public_ingest_uri", &file.global.public_ingest_uri)?;
        validate_uri("global.private_ingest_uri", &file.global.private_ingest_uri)?;

        if let Some(requirement) = &file.protocol_version {
            VersionReq::parse(requirement).with_context(|| {
                format!("protocol_version must be a valid semver requirement: {requirement}")
            })?;
        }

        let mut user_config = BTreeMap::new();
        for (context_id, table) in &file.contexts {
            validate_context_id(context_id)?;
            let encoded = serde_json::to_vec(table).with_context(|| {
                format!("failed to encode user config for context {context_id}")
            })?;
            user_config.insert(context_id.clone(), encoded);
        }

        Ok(Self {
            protocol_version: file.protocol_version,
            global: GlobalConfig {
                public_ingest_uri: file.global.public_ingest_uri,
                private_ingest_uri: file.global.private_ingest_uri,
            },
            user_config,
        })
    }

    /// Ensure the configured requirement accepts a provider protocol version.
    pub fn supports_protocol(&self, protocol_version: u32) -> Result<()> {
        let Some(requirement) = &self.protocol_version else {
            return Ok(());
        };
        let parsed = VersionReq::parse(requirement).with_context(|| {
            format!("protocol_version must be a valid semver requirement: {requirement}")
        })?;

        if parsed.matches(&Version::new(u64::from(protocol_version), 0, 0)) {
            Ok(())
        } else {
            bail!(
                "runner requires protocol_version {} but provider speaks {}",
                requirement,
                protocol_version
            )
        }
    }

    /// Check every context's user configuration against a provider's init schema.
    pub fn check_user_config(&self, schema: &ObjectSchema) -> Result<()> {
        for (context_id, bytes) in &self.user_config {
            decode_input(bytes, schema).with_context(|| {
                format!("user config for context {context_id} does not match the init schema")
            })?;
        }
        Ok(())
    }
}

impl RunnerProvider for RunnerConfig {
    fn user_config(&self) -> BTreeMap<String, Vec<u8>> {
        self.user_config.clone()
    }

    fn global_config(&self) -> GlobalConfig {
        self.global.clone()
    }

    fn user_config_for(&self, context_id: &str) -> Option<Vec<u8>> {
        self.user_config.get(context_id).cloned()
    }
}

fn validate_uri(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} must not be empty")
    }
    let url = Url::parse(value).with_context(|| format!("{field} must be an absolute URL"))?;
    if url.host_str().is_none() {
        bail!("{field} must include a host: {value}");
    }
    Ok(())
}

fn validate_context_id(context_id: &str) -> Result<()> {
    if context_id.trim().is_empty() {
        bail!("context ids must not be empty");
    }
    if context_id.chars().any(char::is_whitespace) {
        bail!("context id {:?} must not contain whitespace", context_id);
    }
    Ok(())
}
