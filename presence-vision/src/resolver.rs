use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model {name} not found under {dir}")]
    Missing { name: String, dir: PathBuf },
    #[error("failed to create cache directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Where model files come from: a local directory or a remote base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Dir(PathBuf),
    Url(String),
}

impl ModelSource {
    pub fn parse(base: &str) -> Self {
        if base.starts_with("http://") || base.starts_with("https://") {
            Self::Url(base.trim_end_matches('/').to_string())
        } else {
            Self::Dir(PathBuf::from(base))
        }
    }

    /// Resolve a single named model to a local file.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ModelResolveError> {
        match self {
            Self::Dir(dir) => resolve_local(dir, name),
            Self::Url(base) => {
                let cache = model_cache_dir()?;
                resolve_remote(base, name, &cache)
            }
        }
    }

    /// Resolve every named model; the first failure aborts.
    pub fn resolve_all(&self, names: &[&str]) -> Result<Vec<PathBuf>, ModelResolveError> {
        names.iter().map(|name| self.resolve(name)).collect()
    }
}

impl std::fmt::Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dir(dir) => write!(f, "{}", dir.display()),
            Self::Url(url) => write!(f, "{}", url),
        }
    }
}

fn resolve_local(dir: &Path, name: &str) -> Result<PathBuf, ModelResolveError> {
    let path = dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(ModelResolveError::Missing {
            name: name.to_string(),
            dir: dir.to_path_buf(),
        })
    }
}

/// Fetch `base/name` into `cache_dir`, reusing an existing copy.
pub fn resolve_remote(
    base: &str,
    name: &str,
    cache_dir: &Path,
) -> Result<PathBuf, ModelResolveError> {
    let cached = cache_dir.join(name);
    if cached.is_file() {
        log::debug!("using cached model {}", cached.display());
        return Ok(cached);
    }
    fs::create_dir_all(cache_dir).map_err(|source| ModelResolveError::CacheDir {
        path: cache_dir.to_path_buf(),
        source,
    })?;
    let url = format!("{}/{}", base.trim_end_matches('/'), name);
    log::info!("downloading {}", url);
    download(&url, &cached)?;
    Ok(cached)
}

/// Per-user cache, e.g. `~/.cache/presence/models` on Linux.
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    ProjectDirs::from("", "", "presence")
        .map(|dirs| dirs.cache_dir().join("models"))
        .ok_or(ModelResolveError::NoCacheDir)
}

fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");
    let result = download_inner(url, dest, &temp_path);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> ModelResolveError {
    let path = path.to_path_buf();
    move |source| ModelResolveError::Write { path, source }
}

fn download_inner(url: &str, dest: &Path, temp_path: &Path) -> Result<(), ModelResolveError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ModelResolveError::Download {
            url: url.to_string(),
            source,
        })?;

    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;
    let mut buf = vec![0u8; 256 * 1024];
    let mut total = 0u64;
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
        total += n as u64;
    }
    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))?;
    log::debug!("wrote {} bytes to {}", total, dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_distinguishes_urls_from_paths() {
        assert_eq!(
            ModelSource::parse("https://example.com/models/"),
            ModelSource::Url("https://example.com/models".to_string())
        );
        assert_eq!(
            ModelSource::parse("/opt/models"),
            ModelSource::Dir(PathBuf::from("/opt/models"))
        );
        assert_eq!(
            ModelSource::parse("models"),
            ModelSource::Dir(PathBuf::from("models"))
        );
    }

    #[test]
    fn resolves_existing_local_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.onnx"), b"model").unwrap();

        let source = ModelSource::Dir(tmp.path().to_path_buf());
        assert_eq!(source.resolve("a.onnx").unwrap(), tmp.path().join("a.onnx"));
    }

    #[test]
    fn any_missing_local_file_fails_the_set() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.onnx"), b"model").unwrap();

        let source = ModelSource::Dir(tmp.path().to_path_buf());
        let err = source.resolve_all(&["a.onnx", "b.onnx"]).unwrap_err();
        assert!(matches!(err, ModelResolveError::Missing { ref name, .. } if name == "b.onnx"));
    }

    #[test]
    fn directory_named_like_a_model_is_not_a_model() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a.onnx")).unwrap();
        let source = ModelSource::Dir(tmp.path().to_path_buf());
        assert!(source.resolve("a.onnx").is_err());
    }

    #[test]
    fn remote_prefers_cached_copy() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.onnx"), b"cached").unwrap();

        // never contacted: the cache hit short-circuits the download
        let path = resolve_remote("http://invalid.nonexistent.example.com", "a.onnx", tmp.path())
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"cached");
    }

    #[test]
    fn failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_remote("http://invalid.nonexistent.example.com", "a.onnx", tmp.path())
            .unwrap_err();
        assert!(matches!(err, ModelResolveError::Download { .. }));
        assert!(!tmp.path().join("a.onnx").exists());
        assert!(!tmp.path().join("a.part").exists());
    }

    #[test]
    fn cache_dir_is_namespaced() {
        let dir = model_cache_dir().unwrap();
        assert!(dir.ends_with("models"));
        assert!(dir.to_string_lossy().contains("presence"));
    }
}
