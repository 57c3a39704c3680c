use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use log::{debug, info, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tar::Archive;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use zip::read::ZipArchive;

use crate::engine::models::GameVersion;
use crate::engine::ports::VersionInstaller;
use crate::engine::state::InstallSource;
use crate::env::LauncherPaths;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArchiveKind {
    TarGz,
    Zip,
}

impl ArchiveKind {
    fn extension(self) -> &'static str {
        match self {
            ArchiveKind::TarGz => ".tar.gz",
            ArchiveKind::Zip => ".zip",
        }
    }
}

fn guess_archive_kind(location: &str) -> Option<ArchiveKind> {
    let lower = location.to_ascii_lowercase();
    if lower.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else {
        None
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Installs game versions from local or downloadable archives.
#[derive(Clone, Debug)]
pub struct ArchiveInstaller {
    cache_dir: PathBuf,
    versions_dir: PathBuf,
    client: Client,
}

impl ArchiveInstaller {
    pub fn new(paths: &LauncherPaths) -> Self {
        Self {
            cache_dir: paths.cache_dir.clone(),
            versions_dir: paths.versions_dir.clone(),
            client: Client::new(),
        }
    }

    /// Game files may only be written or removed one level below the versions root.
    fn check_version_dir(&self, dir: &Path) -> Result<(), String> {
        let inside = dir.strip_prefix(&self.versions_dir).is_ok_and(|relative| {
            let mut parts = relative.components();
            matches!(
                (parts.next(), parts.next()),
                (Some(Component::Normal(_)), None)
            )
        });
        if inside {
            Ok(())
        } else {
            Err(format!(
                "refusing to touch {} outside {}",
                dir.display(),
                self.versions_dir.display()
            ))
        }
    }

    pub async fn install_archive(
        &self,
        version: &str,
        source: &InstallSource,
        dest: &Path,
    ) -> Result<(), String> {
        self.check_version_dir(dest)?;
        let kind = guess_archive_kind(&source.location)
            .ok_or_else(|| format!("unsupported archive type: {}", source.location))?;

        let (archive_path, downloaded) = if is_remote(&source.location) {
            let path = self
                .cache_dir
                .join(format!("vs-{version}{}", kind.extension()));
            info!("install: downloading {} to {}", source.location, path.display());
            self.download(&source.location, &path).await?;
            (path, true)
        } else {
            let path = PathBuf::from(&source.location);
            if !path.exists() {
                return Err(format!("archive not found at {}", path.display()));
            }
            (path, false)
        };

        let expected = source
            .sha256
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);
        let dest = dest.to_path_buf();
        let archive = archive_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            if let Some(expected) = expected.as_deref() {
                verify_sha256(&archive, expected)?;
            }
            unpack_into(&archive, kind, &dest)
        })
        .await
        .map_err(|e| format!("install task failed: {e}"))?;

        if downloaded {
            let _ = async_fs::remove_file(&archive_path).await;
        }
        result
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("download request failed: {e}"))?
            .error_for_status()
            .map_err(|e| format!("download status error: {e}"))?;
        if let Some(parent) = dest.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create download dir: {e}"))?;
        }

        let mut file = async_fs::File::create(dest)
            .await
            .map_err(|e| format!("failed to create archive file: {e}"))?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk_res) = stream.next().await {
            let chunk = chunk_res.map_err(|e| format!("download read error: {e}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("failed to write archive: {e}"))?;
        }
        file.flush()
            .await
            .map_err(|e| format!("failed to flush archive: {e}"))?;
        Ok(())
    }

    pub async fn remove_version(&self, version: &GameVersion) -> Result<(), String> {
        self.check_version_dir(&version.path)?;
        if async_fs::metadata(&version.path).await.is_ok() {
            async_fs::remove_dir_all(&version.path)
                .await
                .map_err(|e| format!("failed to remove game files: {e}"))?;
        } else {
            warn!(
                "delete: {} has no files at {}",
                version.version,
                version.path.display()
            );
        }
        Ok(())
    }
}

impl VersionInstaller for ArchiveInstaller {
    fn install<'a>(
        &'a self,
        version: &'a str,
        source: &'a InstallSource,
        dest: &'a Path,
    ) -> BoxFuture<'a, Result<(), String>> {
        self.install_archive(version, source, dest).boxed()
    }

    fn remove<'a>(&'a self, version: &'a GameVersion) -> BoxFuture<'a, Result<(), String>> {
        self.remove_version(version).boxed()
    }
}

fn verify_sha256(path: &Path, expected: &str) -> Result<(), String> {
    let mut file = fs::File::open(path).map_err(|e| format!("checksum open error: {e}"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| format!("checksum read error: {e}"))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let actual = format!("{:x}", hasher.finalize());
    if actual != expected.to_lowercase() {
        return Err(format!(
            "checksum mismatch: expected {expected}, got {actual}"
        ));
    }
    Ok(())
}

fn staging_dir(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}.partial"))
}

/// Extract into a staging dir next to `dest`, flatten a single top-level folder,
/// then move the result into place.
fn unpack_into(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<(), String> {
    let staging = staging_dir(dest);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| format!("stale staging dir error: {e}"))?;
    }
    fs::create_dir_all(&staging).map_err(|e| format!("staging dir error: {e}"))?;

    let extracted = match kind {
        ArchiveKind::TarGz => extract_targz(archive, &staging),
        ArchiveKind::Zip => extract_zip(archive, &staging),
    }
    .and_then(|()| content_root(&staging));
    let root = match extracted {
        Ok(root) => root,
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
    };

    if dest.exists() {
        debug!("install: replacing leftover files at {}", dest.display());
        fs::remove_dir_all(dest).map_err(|e| format!("failed to clear {}: {e}", dest.display()))?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("versions dir error: {e}"))?;
    }
    let moved = fs::rename(&root, dest).map_err(|e| format!("failed to move game files: {e}"));
    let _ = fs::remove_dir_all(&staging);
    moved
}

fn extract_targz(archive_path: &Path, out: &Path) -> Result<(), String> {
    let file = fs::File::open(archive_path).map_err(|e| format!("tar.gz open error: {e}"))?;
    let dec = GzDecoder::new(file);
    let mut archive = Archive::new(dec);
    archive
        .unpack(out)
        .map_err(|e| format!("tar.gz extract error: {e}"))
}

fn extract_zip(archive_path: &Path, out: &Path) -> Result<(), String> {
    let file = fs::File::open(archive_path).map_err(|e| format!("zip open error: {e}"))?;
    let mut archive = ZipArchive::new(file).map_err(|e| format!("zip parse error: {e}"))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("zip entry error: {e}"))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("install: skipping unsafe zip entry {}", entry.name());
            continue;
        };
        let out_path = out.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| format!("zip dir create error: {e}"))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("zip parent dir error: {e}"))?;
        }
        let mut out_file =
            fs::File::create(&out_path).map_err(|e| format!("zip create file error: {e}"))?;
        io::copy(&mut entry, &mut out_file).map_err(|e| format!("zip write error: {e}"))?;
    }
    Ok(())
}

/// Archives usually wrap the game in one folder (e.g. `vintagestory/`).
fn content_root(staging: &Path) -> Result<PathBuf, String> {
    let mut entries = fs::read_dir(staging).map_err(|e| format!("read staging dir error: {e}"))?;
    let first = match entries.next() {
        Some(entry) => entry.map_err(|e| format!("staging entry error: {e}"))?,
        None => return Err("archive is empty".into()),
    };
    if entries.next().is_some() {
        return Ok(staging.to_path_buf());
    }
    let is_dir = first
        .file_type()
        .map_err(|e| format!("staging entry error: {e}"))?
        .is_dir();
    if is_dir {
        Ok(first.path())
    } else {
        Ok(staging.to_path_buf())
    }
}
