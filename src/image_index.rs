//! タイル識別子 → 画像の対応表
//!
//! フォルダ選択で得たファイル名から拡張子を取り除いて識別子とする。
//! 画像の中身は検証しない（有効かどうかは推論サービスが判断する）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PipelineError;

/// 画像の参照（ファイルパスまたはメモリ上のバイト列）
#[derive(Debug, Clone, PartialEq)]
pub enum ImageHandle {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl ImageHandle {
    pub async fn load(&self) -> std::io::Result<Vec<u8>> {
        match self {
            ImageHandle::File(path) => tokio::fs::read(path).await,
            ImageHandle::Memory(bytes) => Ok(bytes.to_vec()),
        }
    }
}

impl From<Vec<u8>> for ImageHandle {
    fn from(bytes: Vec<u8>) -> Self {
        ImageHandle::Memory(bytes.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageAssetIndex {
    entries: HashMap<String, ImageHandle>,
}

impl ImageAssetIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// (ファイル名, 画像) の列から対応表を作る。同じ識別子は後のものが優先
    pub fn build<I, N>(files: I, extension: &str) -> Self
    where
        I: IntoIterator<Item = (N, ImageHandle)>,
        N: AsRef<str>,
    {
        let mut index = Self::new();
        for (name, handle) in files {
            index.insert(name.as_ref(), handle, extension);
        }
        index
    }

    /// フォルダ直下のファイルを名前順に走査して対応表を作る
    pub fn from_directory(dir: &Path, extension: &str) -> Result<Self, PipelineError> {
        let io_error = |source| PipelineError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push((name.to_string(), ImageHandle::File(path.clone())));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let index = Self::build(files, extension);
        tracing::info!(
            "[ImageAssetIndex] {} - {}枚の画像を登録しました",
            dir.display(),
            index.len()
        );
        Ok(index)
    }

    /// 拡張子を取り除いた識別子を返す。拡張子が一致しない・識別子が空なら None
    pub fn derive_id(file_name: &str, extension: &str) -> Option<String> {
        let split = file_name.len().checked_sub(extension.len())?;
        if !file_name.is_char_boundary(split) {
            return None;
        }
        let (stem, suffix) = file_name.split_at(split);
        if stem.is_empty() || !suffix.eq_ignore_ascii_case(extension) {
            return None;
        }
        Some(stem.to_string())
    }

    pub fn insert(
        &mut self,
        file_name: &str,
        handle: ImageHandle,
        extension: &str,
    ) -> Option<String> {
        let id = Self::derive_id(file_name, extension)?;
        if self.entries.insert(id.clone(), handle).is_some() {
            tracing::debug!("画像 {} は同じ識別子 {} の画像を置き換えました", file_name, id);
        }
        Some(id)
    }

    pub fn lookup(&self, id: &str) -> Option<&ImageHandle> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
