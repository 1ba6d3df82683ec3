use crate::config::{write_atomic, CURRENT_SCHEMA_VERSION};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

const PASSWORD_LENGTH: usize = 24;
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const SSE_SECRET_BYTES: usize = 32;
const DEFAULT_USERNAME: &str = "admin";

/// String wrapper that renders `[REDACTED]` in Debug/Display so secrets
/// cannot leak through logs. `expose()` returns the real value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

/// How the secrets file was loaded. `Fallback` means the file exists but
/// could not be parsed; in that state nothing may be written back, or the
/// operator's data would be destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsStatus {
    Loaded,
    Missing,
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secrets {
    pub schema_version: i32,
    pub basic_auth_username: String,
    pub basic_auth_password: Secret,
    pub webhook_url: Secret,
    pub sse_secret: Secret,
}

impl Secrets {
    pub fn load_from(path: &Path) -> (Secrets, SecretsStatus) {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return (Secrets::default(), SecretsStatus::Missing);
            }
            Err(err) => {
                warn!(error = %err, "failed to read secrets file");
                return (Secrets::default(), SecretsStatus::Fallback);
            }
        };

        match serde_json::from_slice::<Secrets>(&data) {
            Ok(secrets) => (secrets, SecretsStatus::Loaded),
            Err(err) => {
                warn!(error = %err, "secrets file is corrupt; new credentials will not be saved");
                (Secrets::default(), SecretsStatus::Fallback)
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        let mut secrets = self.clone();
        secrets.schema_version = CURRENT_SCHEMA_VERSION;
        let data = serde_json::to_vec_pretty(&secrets)?;
        write_atomic(path, &data)
    }

    /// Generate basic-auth credentials when LAN mode needs them and none are
    /// configured. Returns the plaintext password only when one was freshly
    /// generated, so the caller can hand it to the operator exactly once.
    pub fn ensure_lan_auth(&mut self, lan_enabled: bool) -> Option<String> {
        if !lan_enabled {
            return None;
        }
        if !self.basic_auth_username.is_empty() && !self.basic_auth_password.is_empty() {
            return None;
        }
        if self.basic_auth_username.is_empty() {
            self.basic_auth_username = DEFAULT_USERNAME.to_string();
        }
        let password = generate_password();
        self.basic_auth_password = Secret::new(password.clone());
        Some(password)
    }

    /// The SSE signing secret is always needed for token issuance.
    /// Returns true when a new secret was generated.
    pub fn ensure_sse_secret(&mut self) -> bool {
        if !self.sse_secret.is_empty() {
            return false;
        }
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..SSE_SECRET_BYTES).map(|_| rng.gen()).collect();
        self.sse_secret = Secret::new(hex::encode(bytes));
        true
    }
}

fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LENGTH)
        .map(|_| PASSWORD_CHARSET[rng.gen_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

/// Write freshly generated credentials to a file the operator is told to
/// read and delete, instead of echoing the password into logs.
pub fn write_password_file(
    dir: &Path,
    username: &str,
    password: &str,
) -> std::io::Result<std::path::PathBuf> {
    let path = dir.join(crate::paths::PASSWORD_FILE_NAME);
    let body = format!(
        "VRClog Companion generated credentials\n\nUsername: {username}\nPassword: {password}\n\nDelete this file after saving the credentials.\n"
    );
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_in_debug_and_display() {
        let s = Secret::new("hunter2");
        assert_eq!(format!("{s:?}"), "[REDACTED]");
        assert_eq!(format!("{s}"), "[REDACTED]");
        assert_eq!(s.expose(), "hunter2");
    }

    #[test]
    fn missing_file_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let (_, status) = Secrets::load_from(&dir.path().join("secrets.json"));
        assert_eq!(status, SecretsStatus::Missing);
    }

    #[test]
    fn corrupt_file_reports_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        std::fs::write(&path, b"]]").unwrap();
        let (secrets, status) = Secrets::load_from(&path);
        assert_eq!(status, SecretsStatus::Fallback);
        assert_eq!(secrets, Secrets::default());
    }

    #[test]
    fn ensure_lan_auth_generates_once() {
        let mut secrets = Secrets::default();
        let generated = secrets.ensure_lan_auth(true).unwrap();
        assert_eq!(generated.len(), PASSWORD_LENGTH);
        assert!(generated.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(secrets.basic_auth_username, DEFAULT_USERNAME);

        assert!(secrets.ensure_lan_auth(true).is_none());
    }

    #[test]
    fn ensure_lan_auth_noop_when_disabled() {
        let mut secrets = Secrets::default();
        assert!(secrets.ensure_lan_auth(false).is_none());
        assert!(secrets.basic_auth_username.is_empty());
    }

    #[test]
    fn ensure_sse_secret_is_stable_once_set() {
        let mut secrets = Secrets::default();
        assert!(secrets.ensure_sse_secret());
        let first = secrets.sse_secret.expose().to_string();
        assert!(!secrets.ensure_sse_secret());
        assert_eq!(secrets.sse_secret.expose(), first);
        assert_eq!(first.len(), SSE_SECRET_BYTES * 2);
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.json");
        let mut secrets = Secrets::default();
        secrets.basic_auth_username = "admin".to_string();
        secrets.basic_auth_password = Secret::new("pw");
        secrets.save_to(&path).unwrap();
        let (loaded, status) = Secrets::load_from(&path);
        assert_eq!(status, SecretsStatus::Loaded);
        assert_eq!(loaded.basic_auth_password.expose(), "pw");
    }
}
