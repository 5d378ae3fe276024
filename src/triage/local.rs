//! Lookup of archive volumes already staged on disk

use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use super::candidates::volume_index;
use crate::inspect::names;
use crate::types::ArchiveFormat;

/// Names a volume may be staged under: itself, then the set's `.rar` name
/// for `.partNN.rar` and `.rNN` volumes
pub(crate) fn local_aliases(name: &str) -> Vec<String> {
    let mut aliases = vec![name.to_string()];
    let base = names::base_name(name);
    if let Some((ArchiveFormat::Rar, key, _)) = volume_index(base)
        && !key.eq_ignore_ascii_case(base)
        // keep the original casing of the set name
        && let Some(stem) = base.get(..key.len().saturating_sub(".rar".len()))
    {
        aliases.push(format!("{}.rar", stem));
    }
    aliases
}

/// First existing file for `name` in `dirs`, in directory order
pub(crate) async fn find_local(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let aliases = local_aliases(name);
    for dir in dirs {
        for alias in &aliases {
            let path = dir.join(alias);
            if tokio::fs::metadata(&path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false)
            {
                return Some(path);
            }
        }
    }
    None
}

/// Read at most `max_bytes` from the start of `path`
pub(crate) async fn read_prefix(path: &Path, max_bytes: usize) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut buf = Vec::with_capacity(max_bytes.min(1024 * 1024));
    file.take(max_bytes as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}
