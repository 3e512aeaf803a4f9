//! Symlink copying with in-tree target rewriting.
//!
//! An absolute link that resolves inside the tree being copied is recreated
//! pointing at the same relative location inside the destination tree, so
//! the copy stays self-consistent even though its root differs. Relative
//! links and links leaving the tree are copied verbatim.

use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::fsops::remove_entry;
use crate::path_map::rebase;

#[derive(Debug, Clone)]
pub struct SymlinkRewriter {
    from_root: PathBuf,
    to_root: PathBuf,
}

impl SymlinkRewriter {
    /// Rewriter for links copied out of `from_root` into `to_root`.
    pub fn new(from_root: &Path, to_root: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            from_root: fs::canonicalize(from_root)?,
            to_root: to_root.into(),
        })
    }

    /// Link text the copy of a link reading `link_text` should carry.
    pub fn rewritten(&self, link_text: &Path) -> PathBuf {
        if link_text.is_absolute() {
            if let Ok(resolved) = fs::canonicalize(link_text) {
                if let Some(mapped) = rebase(&resolved, &self.from_root, &self.to_root) {
                    return mapped;
                }
            }
        }
        link_text.to_path_buf()
    }

    /// Recreate the link at `src_link` as `dst_link`, replacing whatever was
    /// there. Returns the text written.
    pub fn copy(&self, src_link: &Path, dst_link: &Path) -> io::Result<PathBuf> {
        let text = self.rewritten(&fs::read_link(src_link)?);
        remove_entry(dst_link)?;
        symlink(&text, dst_link)?;
        Ok(text)
    }
}
