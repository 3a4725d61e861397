use std::cell::RefCell;
use std::path::{Path, PathBuf};

use git2::{CertificateCheckStatus, Cred, CredentialType, FetchOptions, PushOptions, RemoteCallbacks};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::errors::{Error, Result};

/// Name of the single remote glu manages.
pub const REMOTE_NAME: &str = "origin";

/// How to authenticate against the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Credentials {
    /// SSH agent for SSH URLs, git credential helpers for HTTPS.
    #[default]
    Default,
    Basic {
        username: String,
        password: String,
    },
    /// Personal access token sent as an HTTPS password.
    Token { token: String },
    SshAgent { username: Option<String> },
    SshKey {
        username: Option<String>,
        private_key: PathBuf,
        passphrase: Option<String>,
    },
}

/// Connection settings shared by fetch and push.
#[derive(Debug, Clone, Default)]
pub(crate) struct Connection {
    pub(crate) credentials: Credentials,
    pub(crate) insecure_skip_tls: bool,
}

/// libgit2 re-asks for credentials after a rejection; stop after this many.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

fn callbacks<'a>(
    config: Option<git2::Config>,
    connection: &'a Connection,
    cancel: CancellationToken,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        credential(&connection.credentials, config.as_ref(), url, username_from_url, allowed)
    });
    if connection.insecure_skip_tls {
        callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
    }
    callbacks.transfer_progress(move |_progress| !cancel.is_cancelled());
    callbacks
}

fn credential(
    credentials: &Credentials,
    config: Option<&git2::Config>,
    url: &str,
    username_from_url: Option<&str>,
    allowed: CredentialType,
) -> std::result::Result<Cred, git2::Error> {
    match credentials {
        Credentials::Basic { username, password } => Cred::userpass_plaintext(username, password),
        Credentials::Token { token } => {
            Cred::userpass_plaintext(username_from_url.unwrap_or("x-access-token"), token)
        }
        Credentials::SshAgent { username } => {
            Cred::ssh_key_from_agent(username.as_deref().or(username_from_url).unwrap_or("git"))
        }
        Credentials::SshKey {
            username,
            private_key,
            passphrase,
        } => Cred::ssh_key(
            username.as_deref().or(username_from_url).unwrap_or("git"),
            None,
            private_key,
            passphrase.as_deref(),
        ),
        Credentials::Default => {
            if allowed.is_ssh_key()
                && let Some(user) = username_from_url
            {
                return Cred::ssh_key_from_agent(user);
            }
            if allowed.is_user_pass_plaintext()
                && let Some(cfg) = config
                && let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url)
            {
                return Ok(cred);
            }
            Cred::default()
        }
    }
}

/// Fetch `refspecs` from the remote. Runs on the blocking pool.
pub(crate) async fn fetch(
    path: &Path,
    refspecs: Vec<String>,
    connection: &Connection,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = path.to_path_buf();
    let connection = connection.clone();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let repo = git2::Repository::open_bare(&path)?;
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(callbacks(repo.config().ok(), &connection, cancel.clone()));
        let specs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        remote
            .fetch(&specs, Some(&mut options), Some("glu: fetch"))
            .map_err(|e| {
                if cancel.is_cancelled() {
                    Error::Transport("fetch cancelled".into())
                } else {
                    Error::Transport(format!("fetch from {REMOTE_NAME}: {e}"))
                }
            })
    })
    .await?
}

/// Push local `refs/heads/<branch>` to the remote branch of the same name.
///
/// A rejected non-fast-forward update surfaces as `Conflict`.
pub(crate) async fn push(
    path: &Path,
    branch: &str,
    force: bool,
    connection: &Connection,
    cancel: &CancellationToken,
) -> Result<()> {
    let path = path.to_path_buf();
    let branch = branch.to_string();
    let connection = connection.clone();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let repo = git2::Repository::open_bare(&path)?;
        let mut remote = repo.find_remote(REMOTE_NAME)?;
        let reference = format!("refs/heads/{branch}");
        let refspec = if force {
            format!("+{reference}:{reference}")
        } else {
            format!("{reference}:{reference}")
        };

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        {
            let mut callbacks = callbacks(repo.config().ok(), &connection, cancel);
            callbacks.push_update_reference(|_name, status| {
                if let Some(msg) = status {
                    *rejection.borrow_mut() = Some(msg.to_string());
                }
                Ok(())
            });
            let mut options = PushOptions::new();
            options.remote_callbacks(callbacks);

            if let Err(e) = remote.push(&[refspec.as_str()], Some(&mut options)) {
                let msg = e.to_string();
                if e.code() == git2::ErrorCode::NotFastForward || is_non_fast_forward(&msg) {
                    return Err(Error::conflict(reference, msg));
                }
                return Err(Error::Transport(format!("push to {REMOTE_NAME}: {msg}")));
            }
        }

        if let Some(msg) = rejection.into_inner() {
            if is_non_fast_forward(&msg) {
                return Err(Error::conflict(reference, msg));
            }
            return Err(Error::Transport(format!("push rejected: {msg}")));
        }
        Ok(())
    })
    .await?
}

fn is_non_fast_forward(msg: &str) -> bool {
    msg.contains("non-fast-forward")
        || msg.contains("non-fastforward")
        || msg.contains("fetch first")
        || msg.contains("cannot lock ref")
        || msg.contains("failed to update ref")
}

/// Parse a remote into a URL. scp-style `user@host:path` remotes are
/// rewritten to `ssh://user@host/path`. Local paths yield `None`.
fn parse_remote(remote: &str) -> Option<Url> {
    if remote.contains("://") {
        return Url::parse(remote).ok();
    }
    let (authority, path) = remote.split_once(':')?;
    if authority.is_empty() || authority.contains('/') {
        return None;
    }
    Url::parse(&format!("ssh://{authority}/{}", path.trim_start_matches('/'))).ok()
}

/// Browsable commit URL for GitHub remotes (https, ssh or scp-style).
pub(crate) fn commit_url(remote: &str, commit: &str) -> Option<String> {
    let url = parse_remote(remote)?;
    let host = url.host_str()?;
    if host.strip_prefix("www.").unwrap_or(host) != "github.com" {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let name = segments.next()?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    Some(format!("https://github.com/{owner}/{name}/commit/{commit}"))
}
