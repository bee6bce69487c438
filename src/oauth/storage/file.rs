//! Encrypted token file
//!
//! Writes go to a sibling temp file created with owner-only permissions,
//! are synced, then renamed over the target, so a reader only ever sees the
//! old file or the new one. The parent directory is synced after the rename.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::TokenStore;
use crate::oauth::crypto::TokenCipher;
use crate::oauth::record::TokenRecord;
use crate::{Error, Result};

/// Token record sealed with a machine-bound key
#[derive(Debug)]
pub struct EncryptedFileStore {
    path: PathBuf,
    cipher: TokenCipher,
    lock: RwLock<()>,
}

impl EncryptedFileStore {
    /// Store at `path` sealed with `cipher`
    pub fn new(path: impl Into<PathBuf>, cipher: TokenCipher) -> Self {
        Self {
            path: path.into(),
            cipher,
            lock: RwLock::new(()),
        }
    }

    /// Location of the token file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and report the precise failure.
    ///
    /// Unlike [`TokenStore::load`] a missing file is [`Error::NotFound`], an
    /// undecryptable one [`Error::DecryptionFailed`] and a malformed record
    /// [`Error::CorruptRecord`].
    pub fn load_checked(&self) -> Result<TokenRecord> {
        let _guard = self.lock.read();

        let encoded = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let plaintext = self.cipher.open(&encoded)?;
        serde_json::from_slice(&plaintext).map_err(|e| Error::CorruptRecord(e.to_string()))
    }

    fn ensure_parent(&self) -> Result<()> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
            }
        }
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "tokens".into(), |n| n.to_string_lossy().to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
    }

    fn write_atomic(&self, contents: &[u8]) -> Result<()> {
        self.ensure_parent()?;
        let temp = self.temp_path();

        let written = open_private(&temp).and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        });
        let result = written.and_then(|()| fs::rename(&temp, &self.path));

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_file(&temp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %cleanup, "Failed to remove temp token file");
                }
            }
            return Err(e.into());
        }
        sync_parent(&self.path)?;
        Ok(())
    }
}

/// Flush the directory entry of `path` so a rename or unlink survives power loss
fn sync_parent(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn open_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

impl TokenStore for EncryptedFileStore {
    fn load(&self) -> Result<Option<TokenRecord>> {
        match self.load_checked() {
            Ok(record) => {
                debug!(path = %self.path.display(), expires_at = %record.expires_at, "Loaded token file");
                Ok(Some(record))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e @ (Error::DecryptionFailed(_) | Error::CorruptRecord(_))) => {
                warn!(
                    path = %self.path.display(),
                    kind = %e.kind(),
                    error = %e,
                    "Token file unusable; treating as absent"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, record: &TokenRecord) -> Result<()> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(record)?);
        let sealed = self.cipher.seal(&plaintext)?;

        let _guard = self.lock.write();
        self.write_atomic(sealed.as_bytes())?;
        info!(path = %self.path.display(), expires_at = %record.expires_at, "Saved token file");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let _guard = self.lock.write();
        match fs::remove_file(&self.path) {
            Ok(()) => {
                sync_parent(&self.path)?;
                info!(path = %self.path.display(), "Deleted token file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> &'static str {
        "encrypted-file"
    }
}
