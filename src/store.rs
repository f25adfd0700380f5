use {
    crate::session::SessionId,
    std::{
        io,
        path::{Path, PathBuf},
    },
    tokio::fs,
};

/// Directory of uploaded sources, one file per session.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(root: P) -> io::Result<Self> {
        let root = root.as_ref();
        if fs::metadata(root).await.map(|m| !m.is_dir()).unwrap_or(false) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("'{}' exists, but is not a directory", root.display()),
            ));
        }
        log::debug!("Creating upload directory at '{}'", root.display());
        fs::create_dir_all(root).await?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &SessionId) -> PathBuf {
        self.root.join(format!("{}.mp4", id))
    }

    /// Writes the upload under a temporary name and renames it into place,
    /// so a crash never leaves a half-written source behind a session id.
    pub async fn persist(&self, id: &SessionId, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self.path_for(id);
        let partial = path.with_extension("mp4.part");
        if let Err(e) = fs::write(&partial, contents).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        fs::rename(&partial, &path).await?;
        log::debug!("Stored {} bytes at {}", contents.len(), path.display());
        Ok(path)
    }

    /// Deletes a stored source. Failures are logged, never returned.
    pub async fn discard(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => log::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}
