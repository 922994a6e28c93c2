//! Tar archives of cached paths

use crate::core::CiError;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Archive `paths` (relative to `workdir`) into a tar blob
///
/// Missing paths are skipped; returns `None` when none of them exist.
pub async fn pack(workdir: &Path, paths: &[String]) -> Result<Option<Vec<u8>>, CiError> {
    let workdir = workdir.to_path_buf();
    let paths: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();

    tokio::task::spawn_blocking(move || -> std::io::Result<Option<Vec<u8>>> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);

        let mut packed = 0;
        for path in &paths {
            let abs_path = workdir.join(path);
            if !abs_path.exists() {
                continue;
            }
            if abs_path.is_dir() {
                builder.append_dir_all(path, &abs_path)?;
            } else {
                builder.append_path_with_name(&abs_path, path)?;
            }
            packed += 1;
        }

        if packed == 0 {
            return Ok(None);
        }
        Ok(Some(builder.into_inner()?))
    })
    .await
    .map_err(std::io::Error::other)?
    .map_err(CiError::from)
}

/// Unpack a tar blob into `workdir`
pub async fn unpack(blob: Vec<u8>, workdir: &Path) -> Result<(), CiError> {
    let workdir = workdir.to_path_buf();

    tokio::task::spawn_blocking(move || tar::Archive::new(Cursor::new(blob)).unpack(&workdir))
        .await
        .map_err(std::io::Error::other)?
        .map_err(CiError::from)
}
