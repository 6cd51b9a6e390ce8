use sdk::errors::EngineError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Names that are never written into the workspace, whatever directory the
/// client claims they came from.
const DENY_LIST: &[&str] = &[
    ".env",
    ".ssh",
    ".aws",
    ".gnupg",
    ".kube",
    ".npmrc",
    ".pypirc",
    ".netrc",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
    "credentials",
    "private_key",
];

/// A file written by [`Workspace::store_upload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Workspace directory shared by shell snippets and uploads.
///
/// Uploads are stored flat in the workspace root. A client-supplied name is
/// reduced to its final path component and checked against the deny list
/// before anything touches the disk:
/// 1. Strip directories (both `/` and `\` separators)
/// 2. Reject empty names, `.` and `..`
/// 3. Reject deny-listed names
/// 4. Refuse to follow an existing symlink out of the workspace
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    max_upload_bytes: usize,
}

impl Workspace {
    /// Create the directory if needed and resolve it to a canonical path.
    pub fn open(root: &Path, max_upload_bytes: usize) -> Result<Self, EngineError> {
        std::fs::create_dir_all(root)?;
        let root = root
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(root.to_path_buf(), e.to_string()))?;

        info!("Workspace ready at {}", root.display());
        Ok(Self {
            root,
            max_upload_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Reduce a client-supplied name to a safe bare filename.
    pub fn sanitize_filename(raw: &str) -> Result<String, EngineError> {
        let name = raw
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();

        if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
            return Err(EngineError::InvalidRequest(format!(
                "Invalid filename '{}'",
                raw
            )));
        }

        if DENY_LIST.iter().any(|d| name.eq_ignore_ascii_case(d)) {
            return Err(EngineError::PathDenied(PathBuf::from(name)));
        }

        Ok(name.to_string())
    }

    /// Write `bytes` into the workspace under the sanitized `raw_name`,
    /// replacing any previous upload with the same name.
    pub async fn store_upload(
        &self,
        raw_name: &str,
        bytes: &[u8],
    ) -> Result<StoredUpload, EngineError> {
        if bytes.len() > self.max_upload_bytes {
            return Err(EngineError::UploadTooLarge {
                size: bytes.len(),
                limit: self.max_upload_bytes,
            });
        }

        let filename = Self::sanitize_filename(raw_name)?;
        let path = self.root.join(&filename);

        if let Ok(existing) = tokio::fs::canonicalize(&path).await {
            if !existing.starts_with(&self.root) {
                return Err(EngineError::PathOutsideWorkspace(existing));
            }
        }

        tokio::fs::write(&path, bytes).await?;
        debug!("Stored upload {} ({} bytes)", filename, bytes.len());

        Ok(StoredUpload {
            filename,
            path,
            size: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(
            Workspace::sanitize_filename("../../etc/passwd").unwrap(),
            "passwd"
        );
        assert_eq!(
            Workspace::sanitize_filename("C:\\Users\\me\\notes.txt").unwrap(),
            "notes.txt"
        );
        assert_eq!(Workspace::sanitize_filename("report.pdf").unwrap(), "report.pdf");
    }

    #[test]
    fn test_sanitize_rejects_bad_names() {
        for name in ["", "   ", ".", "..", "dir/", "a/.."] {
            assert!(
                matches!(
                    Workspace::sanitize_filename(name),
                    Err(EngineError::InvalidRequest(_))
                ),
                "{:?} should be rejected",
                name
            );
        }
        for name in [".env", "keys/id_rsa", ".SSH"] {
            assert!(matches!(
                Workspace::sanitize_filename(name),
                Err(EngineError::PathDenied(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_store_upload_writes_into_root() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(&temp.path().join("ws"), 1024).unwrap();

        let stored = workspace
            .store_upload("nested/hello.txt", b"hello")
            .await
            .unwrap();

        assert_eq!(stored.filename, "hello.txt");
        assert_eq!(stored.size, 5);
        assert_eq!(stored.path, workspace.root().join("hello.txt"));
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_store_upload_enforces_size_limit() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(temp.path(), 4).unwrap();

        let err = workspace.store_upload("big.bin", b"12345").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UploadTooLarge { size: 5, limit: 4 }
        ));
        assert!(!workspace.root().join("big.bin").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_store_upload_refuses_symlink_escape() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("victim.txt");
        std::fs::write(&target, "keep").unwrap();

        let workspace = Workspace::open(temp.path(), 1024).unwrap();
        std::os::unix::fs::symlink(&target, workspace.root().join("link.txt")).unwrap();

        let err = workspace.store_upload("link.txt", b"overwrite").await.unwrap_err();
        assert!(matches!(err, EngineError::PathOutsideWorkspace(_)));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "keep");
    }
}
