use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;

const INDEX_FILE: &str = "index.html";

/// A file of a site tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub local_path: PathBuf,
    /// Path relative to the tree root, `/` separated.
    pub remote_path: String,
}

fn remote_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|x| x.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub async fn list_files(root: &Path) -> io::Result<Vec<LocalFile>> {
    //! Every regular file below `root`, sorted by remote path.
    //! Symlinks are not followed.
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(LocalFile {
                    remote_path: remote_path(root, &path),
                    local_path: path,
                });
            }
        }
    }
    files.sort_by(|a, b| a.remote_path.cmp(&b.remote_path));
    Ok(files)
}

pub async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|x| x.is_file()).unwrap_or(false)
}

pub async fn clean_dir(path: &Path) -> io::Result<()> {
    //! Empties `path`, creating it when missing.
    match fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(path).await
}

pub async fn copy_dir(src: &Path, dest: &Path) -> io::Result<usize> {
    //! Copies the tree under `src` into `dest`, overwriting files that
    //! already exist there. Returns the number of files copied.
    let files = list_files(src).await?;
    fs::create_dir_all(dest).await?;
    for file in &files {
        let target = dest.join(&file.remote_path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&file.local_path, &target).await?;
    }
    Ok(files.len())
}

pub async fn find_site_root(scraped: &Path) -> io::Result<Option<PathBuf>> {
    //! The scraped folder itself when it holds an `index.html`, else its
    //! first subdirectory (by name) that does. Crawlers usually write the
    //! mirror below a folder named after the host.
    if is_file(&scraped.join(INDEX_FILE)).await {
        return Ok(Some(scraped.to_path_buf()));
    }
    let mut dirs = Vec::new();
    let mut entries = fs::read_dir(scraped).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    for dir in dirs {
        if is_file(&dir.join(INDEX_FILE)).await {
            return Ok(Some(dir));
        }
    }
    Ok(None)
}

pub fn write_if_absent(path: &Path, bytes: &[u8]) -> io::Result<bool> {
    //! Writes `bytes` to `path` through a temporary file in the same
    //! directory. Returns `false` without writing when `path` exists,
    //! including when another writer wins the race.
    if path.exists() {
        return Ok(false);
    }
    let parent = path
        .parent()
        .filter(|x| !x.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    match temp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
