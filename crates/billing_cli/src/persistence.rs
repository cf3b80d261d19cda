use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use billing_engine::{AtomicFileWriter, CredentialStore, LogoutHook};
use billing_logging::{billing_error, billing_info, billing_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSession {
    base_url: String,
    token: String,
    saved_at: DateTime<Utc>,
}

/// Credential store backed by a small ron file, scoped to one API base url.
pub struct FileCredentialStore {
    path: PathBuf,
    base_url: String,
    session: Mutex<Option<PersistedSession>>,
}

impl FileCredentialStore {
    pub fn open(path: PathBuf, base_url: &str) -> Self {
        let session = load_session(&path).filter(|session| {
            let same_backend = session.base_url == base_url;
            if !same_backend {
                billing_info!(
                    "Ignoring stored session for {} (current backend is {})",
                    session.base_url,
                    base_url
                );
            }
            same_backend
        });
        Self {
            path,
            base_url: base_url.to_string(),
            session: Mutex::new(session),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|session| session.saved_at))
    }
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Option<String> {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|session| session.token.clone()))
    }

    fn store(&self, token: &str) {
        let session = PersistedSession {
            base_url: self.base_url.clone(),
            token: token.to_string(),
            saved_at: Utc::now(),
        };
        save_session(&self.path, &session);
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session);
        }
    }

    fn clear(&self) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => billing_info!("Removed session file {:?}", self.path),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => billing_warn!("Failed to remove session file {:?}: {}", self.path, err),
        }
    }
}

fn load_session(path: &Path) -> Option<PersistedSession> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            billing_warn!("Failed to read session from {:?}: {}", path, err);
            return None;
        }
    };

    match ron::from_str(&content) {
        Ok(session) => Some(session),
        Err(err) => {
            billing_warn!("Failed to parse session from {:?}: {}", path, err);
            None
        }
    }
}

fn save_session(path: &Path, session: &PersistedSession) {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        billing_error!("Session path {:?} has no file name", path);
        return;
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let pretty = ron::ser::PrettyConfig::new();
    let content = match ron::ser::to_string_pretty(session, pretty) {
        Ok(text) => text,
        Err(err) => {
            billing_error!("Failed to serialize session: {}", err);
            return;
        }
    };

    let writer = AtomicFileWriter::new(dir);
    if let Err(err) = writer.write(filename, content.as_bytes()) {
        billing_error!("Failed to write session to {:?}: {}", path, err);
    }
}

/// Sends the user back to sign-in once the gateway drops the session, and
/// tells running commands through [`TerminalLogoutHook::subscribe`].
pub struct TerminalLogoutHook {
    ended: watch::Sender<bool>,
}

impl TerminalLogoutHook {
    pub fn new() -> Self {
        let (ended, _) = watch::channel(false);
        Self { ended }
    }

    /// Flips to `true` when the session ends.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }
}

impl Default for TerminalLogoutHook {
    fn default() -> Self {
        Self::new()
    }
}

impl LogoutHook for TerminalLogoutHook {
    fn on_logout(&self) {
        eprintln!("Session ended. Run `billing login --username <name>` to sign in again.");
        self.ended.send_replace(true);
    }
}
