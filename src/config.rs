//! `glu.toml` configuration.
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "text"
//!
//! [storage]
//! path = ".glu/history.db"
//!
//! [repositories.config]
//! remote = "https://github.com/get-glu/gitops-example.git"
//! default_branch = "main"
//! path = ".glu/repositories/config"
//! poll_interval_secs = 60
//! credentials = "github"
//! signature = { name = "glu bot", email = "bot@get-glu.dev" }
//! proposals = { labels = ["automerge"] }
//!
//! [credentials.github]
//! type = "token"
//! token_env = "GITHUB_TOKEN"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::history::VersionLog;
use crate::kv::SqliteDb;
use crate::phases::git::ProposalOptions;
use crate::repository::{CommitSignature, Credentials, Repository, RepositoryOptions};

pub const DEFAULT_CONFIG_FILE: &str = "glu.toml";

/// Environment variable overriding `[log] level`.
pub const LOG_ENV: &str = "GLU_LOG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GluConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where version history is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Absent means in-memory history.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub remote: Option<String>,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Bare repository location. Absent means a scratch directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Zero disables background fetching.
    #[serde(default)]
    pub poll_interval_secs: u64,
    /// Name of a `[credentials]` entry.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls: bool,
    #[serde(default)]
    pub signature: SignatureConfig,
    #[serde(default)]
    pub proposals: ProposalsConfig,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            remote: None,
            default_branch: default_branch(),
            path: None,
            poll_interval_secs: 0,
            credentials: None,
            insecure_skip_tls: false,
            signature: SignatureConfig::default(),
            proposals: ProposalsConfig::default(),
        }
    }
}

impl RepositoryConfig {
    pub fn proposal_options(&self) -> ProposalOptions {
        ProposalOptions {
            labels: self.proposals.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureConfig {
    pub name: String,
    pub email: String,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        let signature = CommitSignature::default();
        Self {
            name: signature.name,
            email: signature.email,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalsConfig {
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CredentialConfig {
    Basic {
        username: String,
        password: String,
    },
    Token {
        #[serde(default)]
        token: Option<String>,
        /// Environment variable holding the token.
        #[serde(default)]
        token_env: Option<String>,
    },
    SshAgent {
        #[serde(default)]
        username: Option<String>,
    },
    SshKey {
        #[serde(default)]
        username: Option<String>,
        private_key: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

impl CredentialConfig {
    /// Resolve into transport credentials, reading environment variables.
    pub fn resolve(&self) -> Result<Credentials> {
        Ok(match self {
            CredentialConfig::Basic { username, password } => Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            CredentialConfig::Token { token, token_env } => {
                let token = match (token, token_env) {
                    (Some(token), _) => token.clone(),
                    (None, Some(var)) => std::env::var(var).map_err(|_| {
                        Error::Configuration(format!("environment variable {var} is not set"))
                    })?,
                    (None, None) => {
                        return Err(Error::Configuration(
                            "token credentials need token or token_env".into(),
                        ));
                    }
                };
                Credentials::Token { token }
            }
            CredentialConfig::SshAgent { username } => Credentials::SshAgent {
                username: username.clone(),
            },
            CredentialConfig::SshKey {
                username,
                private_key,
                passphrase,
            } => Credentials::SshKey {
                username: username.clone(),
                private_key: private_key.clone(),
                passphrase: passphrase.clone(),
            },
        })
    }
}

impl GluConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Failed to parse glu.toml")
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize glu.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Scaffold written by `glu config init`.
    pub fn example() -> Self {
        Self {
            storage: StorageConfig {
                path: Some(PathBuf::from(".glu/history.db")),
            },
            repositories: BTreeMap::from([(
                "config".to_string(),
                RepositoryConfig {
                    path: Some(PathBuf::from(".glu/repositories/config")),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        }
    }

    /// Check the configuration. Hard errors fail; softer problems come back
    /// as warnings.
    pub fn validate(&self) -> anyhow::Result<Vec<String>> {
        let mut warnings = Vec::new();

        match self.log.level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => warnings.push(format!(
                "log.level {other:?} is not a known level, filter directives will be used as is"
            )),
        }

        if self.storage.path.is_none() {
            warnings.push("storage.path is not set, history is kept in memory only".to_string());
        }

        for (name, repo) in &self.repositories {
            if repo.default_branch.trim().is_empty() {
                bail!("repositories.{name}.default_branch cannot be empty");
            }
            if let Some(credentials) = &repo.credentials
                && !self.credentials.contains_key(credentials)
            {
                bail!("repositories.{name}.credentials references unknown credentials {credentials:?}");
            }
            if repo.remote.is_none() {
                if repo.poll_interval_secs > 0 {
                    warnings.push(format!(
                        "repositories.{name} has no remote, poll_interval_secs is ignored"
                    ));
                }
                if repo.credentials.is_some() {
                    warnings.push(format!(
                        "repositories.{name} has no remote, credentials are unused"
                    ));
                }
            }
            if repo.insecure_skip_tls {
                warnings.push(format!(
                    "repositories.{name} skips TLS certificate verification"
                ));
            }
        }

        for (name, credentials) in &self.credentials {
            match credentials {
                CredentialConfig::Basic { username, password } => {
                    if username.is_empty() || password.is_empty() {
                        bail!("credentials.{name}: both username and password are required");
                    }
                }
                CredentialConfig::Token {
                    token: None,
                    token_env: None,
                } => bail!("credentials.{name}: one of token or token_env is required"),
                CredentialConfig::SshKey { private_key, .. } if !private_key.exists() => {
                    warnings.push(format!(
                        "credentials.{name}: private key {} does not exist",
                        private_key.display()
                    ));
                }
                _ => {}
            }
        }

        Ok(warnings)
    }

    pub fn repository(&self, name: &str) -> Result<&RepositoryConfig> {
        self.repositories
            .get(name)
            .ok_or_else(|| Error::not_found("repository", name))
    }

    /// Open the repository configured under `[repositories.<name>]`.
    pub async fn open_repository(&self, name: &str) -> Result<Arc<Repository>> {
        let config = self.repository(name)?;

        let mut options = RepositoryOptions::new()
            .with_default_branch(config.default_branch.clone())
            .with_signature(config.signature.name.clone(), config.signature.email.clone())
            .with_insecure_skip_tls(config.insecure_skip_tls);
        if let Some(remote) = &config.remote {
            options = options.with_remote(remote.clone());
        }
        if let Some(path) = &config.path {
            options = options.with_path(path.clone());
        }
        if config.poll_interval_secs > 0 {
            options = options.with_poll_interval(Duration::from_secs(config.poll_interval_secs));
        }
        if let Some(reference) = &config.credentials {
            let credentials = self.credentials.get(reference).ok_or_else(|| {
                Error::Configuration(format!(
                    "repository {name} references unknown credentials {reference}"
                ))
            })?;
            options = options.with_credentials(credentials.resolve()?);
        }

        tracing::debug!(
            repository = %name,
            remote = config.remote.as_deref().unwrap_or("<none>"),
            branch = %config.default_branch,
            "opening repository"
        );
        Repository::open(options).await
    }

    /// Open the durable version log, or an in-memory one without
    /// `[storage] path`.
    pub fn open_version_log(&self) -> Result<VersionLog> {
        match &self.storage.path {
            Some(path) => Ok(VersionLog::new(Arc::new(SqliteDb::open(path)?))),
            None => Ok(VersionLog::in_memory()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = GluConfig::parse("").unwrap();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert!(config.storage.path.is_none());
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let config = GluConfig::parse(
            r#"
[log]
level = "debug"
format = "json"

[storage]
path = "/tmp/glu.db"

[repositories.config]
remote = "https://github.com/get-glu/gitops-example.git"
poll_interval_secs = 30
credentials = "github"
proposals = { labels = ["automerge"] }

[credentials.github]
type = "token"
token_env = "GITHUB_TOKEN"

[credentials.deploy]
type = "ssh-key"
private_key = "/home/glu/.ssh/id_ed25519"
"#,
        )
        .unwrap();

        assert_eq!(config.log.format, LogFormat::Json);
        let repo = &config.repositories["config"];
        assert_eq!(repo.default_branch, "main");
        assert_eq!(repo.poll_interval_secs, 30);
        assert_eq!(repo.signature, SignatureConfig::default());
        assert_eq!(repo.proposal_options().labels, ["automerge"]);
        assert!(matches!(
            config.credentials["github"],
            CredentialConfig::Token { token: None, .. }
        ));
        assert!(matches!(
            config.credentials["deploy"],
            CredentialConfig::SshKey { .. }
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_credentials() {
        let config = GluConfig::parse(
            r#"
[repositories.config]
remote = "https://example.com/repo.git"
credentials = "missing"
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown credentials"));
    }

    #[test]
    fn test_validate_rejects_empty_branch() {
        let config = GluConfig::parse(
            r#"
[repositories.config]
default_branch = ""
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_warnings() {
        let config = GluConfig::parse(
            r#"
[log]
level = "loud"

[repositories.local]
poll_interval_secs = 10
"#,
        )
        .unwrap();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.contains("log.level")));
        assert!(warnings.iter().any(|w| w.contains("history is kept in memory")));
        assert!(warnings.iter().any(|w| w.contains("poll_interval_secs is ignored")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glu.toml");
        let config = GluConfig::example();
        config.save(&path).unwrap();
        assert_eq!(GluConfig::load(&path).unwrap(), config);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = GluConfig::load_or_default(&dir.path().join("glu.toml")).unwrap();
        assert_eq!(config, GluConfig::default());
    }

    #[test]
    fn test_token_credentials_resolve_inline_token() {
        let creds = CredentialConfig::Token {
            token: Some("abc".into()),
            token_env: None,
        };
        assert_eq!(
            creds.resolve().unwrap(),
            Credentials::Token {
                token: "abc".into()
            }
        );
        let missing = CredentialConfig::Token {
            token: None,
            token_env: Some("GLU_TEST_TOKEN_THAT_IS_NOT_SET".into()),
        };
        assert!(matches!(missing.resolve(), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_open_repository_and_version_log() {
        let dir = tempdir().unwrap();
        let mut config = GluConfig::default();
        config.storage.path = Some(dir.path().join("history.db"));
        config.repositories.insert(
            "config".into(),
            RepositoryConfig {
                path: Some(dir.path().join("repo.git")),
                ..Default::default()
            },
        );

        let repo = config.open_repository("config").await.unwrap();
        assert_eq!(repo.default_branch(), "main");
        assert!(repo.resolve("main").is_ok());
        assert!(config.open_repository("other").await.unwrap_err().is_not_found());

        config.open_version_log().unwrap();
        assert!(dir.path().join("history.db").exists());
    }
}
