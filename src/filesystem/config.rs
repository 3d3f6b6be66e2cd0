use std::path::{Path, PathBuf};

/// Default read size per chunk when streaming a download (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for the ROM library
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Canonical ROM directory; the only tree files may be served from
    pub root: PathBuf,

    /// List and serve hidden files
    pub include_hidden: bool,

    /// List and serve symlinks whose target stays inside `root`
    pub follow_symlinks: bool,

    /// File names matching these globs are neither listed nor served
    pub exclude_patterns: Vec<String>,

    /// Bytes read from disk per chunk while streaming
    pub chunk_size: usize,
}

impl LibraryConfig {
    /// Build a config rooted at `root`. The directory must exist; its
    /// canonical form becomes the trust boundary.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root,
            include_hidden: false,
            follow_symlinks: false,
            exclude_patterns: default_exclude_patterns(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }
}

/// Partial copies that should never be handed out
pub fn default_exclude_patterns() -> Vec<String> {
    vec![
        "*.part".to_string(),
        "*.tmp".to_string(),
        "*.crdownload".to_string(),
    ]
}
