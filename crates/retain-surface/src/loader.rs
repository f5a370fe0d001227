//! # Surface loaders
//!
//! A loader produces RGBA pixels, possibly slowly. Loaders run on background
//! threads when driven by a [`crate::StatefulSurface`], so they must be
//! `Send + Sync` and must report failures as [`LoadError`] values.
//!
//! - `BytesLoader`: decode an in-memory PNG/JPEG.
//! - `FileLoader`: decode a file from disk.
//! - `UrlLoader`: fetch over HTTP(S) with a timeout; `file://` URLs are read
//!   under a configurable root directory and may not leave it.
//! - `UniformLoader`: a single-color image.
//!
//! Any `Fn() -> Result<RgbaImage, LoadError>` closure is a loader too.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use retain_core::Color;

use crate::error::LoadError;

pub const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(10);

pub trait SurfaceLoader: Send + Sync {
    fn fetch(&self) -> Result<RgbaImage, LoadError>;
}

impl<F> SurfaceLoader for F
where
    F: Fn() -> Result<RgbaImage, LoadError> + Send + Sync,
{
    fn fetch(&self) -> Result<RgbaImage, LoadError> {
        self()
    }
}

pub fn decode(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Decodes an encoded image held in memory.
#[derive(Clone, Debug)]
pub struct BytesLoader {
    bytes: Arc<[u8]>,
}

impl BytesLoader {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl SurfaceLoader for BytesLoader {
    fn fetch(&self) -> Result<RgbaImage, LoadError> {
        decode(&self.bytes)
    }
}

#[derive(Clone, Debug)]
pub struct FileLoader {
    path: PathBuf,
}

impl FileLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SurfaceLoader for FileLoader {
    fn fetch(&self) -> Result<RgbaImage, LoadError> {
        read_file(&self.path)
    }
}

fn read_file(path: &Path) -> Result<RgbaImage, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode(&bytes)
}

#[derive(Clone, Debug)]
pub struct UrlLoader {
    url: String,
    timeout: Duration,
    fs_root: PathBuf,
}

impl UrlLoader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_URL_TIMEOUT,
            fs_root: PathBuf::from("."),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory `file://` URLs are resolved against. URL paths may not
    /// leave it.
    pub fn fs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fs_root = root.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn is_local(&self) -> bool {
        self.url.starts_with("file:")
    }

    /// Percent-decoded path of a `file://` URL, joined under `fs_root`.
    fn local_path(&self) -> Result<PathBuf, LoadError> {
        let invalid = || LoadError::InvalidUrl {
            url: self.url.clone(),
        };
        let url = reqwest::Url::parse(&self.url).map_err(|_| invalid())?;
        let path = url.to_file_path().map_err(|_| invalid())?;

        let mut resolved = self.fs_root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(LoadError::OutsideRoot {
                        url: self.url.clone(),
                    });
                }
            }
        }
        Ok(resolved)
    }

    fn fetch_remote(&self) -> Result<RgbaImage, LoadError> {
        let http = |source: reqwest::Error| LoadError::Http {
            url: self.url.clone(),
            source,
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(http)?;

        log::debug!("fetching {}", self.url);
        let response = client.get(&self.url).send().map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().map_err(http)?;
        decode(&bytes)
    }
}

impl SurfaceLoader for UrlLoader {
    fn fetch(&self) -> Result<RgbaImage, LoadError> {
        if self.is_local() {
            read_file(&self.local_path()?)
        } else {
            self.fetch_remote()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformLoader {
    width: u32,
    height: u32,
    color: Color,
}

impl UniformLoader {
    pub fn new(width: u32, height: u32, color: Color) -> Self {
        Self {
            width,
            height,
            color,
        }
    }
}

impl SurfaceLoader for UniformLoader {
    fn fetch(&self) -> Result<RgbaImage, LoadError> {
        if self.width == 0 || self.height == 0 {
            return Err(LoadError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba(self.color.to_rgba8()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(w: u32, h: u32, px: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba(px));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_uniform_loader() {
        let img = UniformLoader::new(3, 2, Color::from_hex("#102030"))
            .fetch()
            .unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert!(img.pixels().all(|p| *p == Rgba([0x10, 0x20, 0x30, 255])));

        assert!(matches!(
            UniformLoader::new(0, 2, Color::WHITE).fetch(),
            Err(LoadError::EmptyImage { .. })
        ));
    }

    #[test]
    fn test_bytes_loader_decodes_png() {
        let img = BytesLoader::new(png_bytes(5, 4, [1, 2, 3, 4]))
            .fetch()
            .unwrap();
        assert_eq!(img.dimensions(), (5, 4));
        assert_eq!(img.get_pixel(4, 3), &Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn test_bytes_loader_rejects_garbage() {
        let err = BytesLoader::new(b"not an image".to_vec()).fetch().unwrap_err();
        assert!(matches!(err, LoadError::Decode(_)));
    }

    #[test]
    fn test_file_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        std::fs::write(&path, png_bytes(2, 2, [255, 0, 0, 255])).unwrap();

        let img = FileLoader::new(&path).fetch().unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));

        let missing = FileLoader::new(dir.path().join("missing.png"))
            .fetch()
            .unwrap_err();
        assert!(matches!(missing, LoadError::Io { .. }));
    }

    #[test]
    fn test_url_loader_file_scheme_uses_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("files")).unwrap();
        std::fs::write(
            dir.path().join("files/blue.png"),
            png_bytes(1, 1, [0, 0, 255, 255]),
        )
        .unwrap();

        let img = UrlLoader::new("file:///files/blue.png")
            .fs_root(dir.path())
            .fetch()
            .unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_url_loader_file_scheme_decodes_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("my img.png"), png_bytes(1, 1, [4, 5, 6, 255])).unwrap();

        let img = UrlLoader::new("file:///my%20img.png")
            .fs_root(dir.path())
            .fetch()
            .unwrap();
        assert_eq!(img.get_pixel(0, 0), &Rgba([4, 5, 6, 255]));
    }

    #[test]
    fn test_url_loader_file_scheme_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(dir.path().join("secret.png"), png_bytes(1, 1, [9, 9, 9, 255])).unwrap();

        for url in [
            "file:///../secret.png",
            "file:///a/../../secret.png",
            "file:///a/..%2F..%2Fsecret.png",
            "file:///%2E%2E/secret.png",
        ] {
            let result = UrlLoader::new(url).fs_root(&root).fetch();
            assert!(
                matches!(
                    result,
                    Err(LoadError::Io { .. }
                        | LoadError::OutsideRoot { .. }
                        | LoadError::InvalidUrl { .. })
                ),
                "{url} resolved outside the root: {result:?}"
            );
        }
    }

    #[test]
    fn test_closure_loader() {
        let loader = || -> Result<RgbaImage, LoadError> { Err(LoadError::Other("offline".into())) };
        let err = SurfaceLoader::fetch(&loader).unwrap_err();
        assert_eq!(err.to_string(), "offline");
    }
}
