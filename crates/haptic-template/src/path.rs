//! Logical-name to dataplane-path resolution

use std::path::{Path, PathBuf};

use haptic_config::DataplaneConfig;

/// Kind of auxiliary file referenced from templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Map,
    GeneralFile,
    Certificate,
    CrtList,
}

impl FileKind {
    /// Parse the spelling used by the `get_path` filter.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "map" => Some(Self::Map),
            "file" => Some(Self::GeneralFile),
            "cert" => Some(Self::Certificate),
            "crt-list" => Some(Self::CrtList),
            _ => None,
        }
    }
}

/// Immutable mapping from logical auxiliary names to absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    maps_dir: PathBuf,
    ssl_dir: PathBuf,
    crt_list_dir: PathBuf,
    general_dir: PathBuf,
}

impl PathResolver {
    pub fn new(
        maps_dir: PathBuf,
        ssl_dir: PathBuf,
        crt_list_dir: PathBuf,
        general_dir: PathBuf,
    ) -> Self {
        Self {
            maps_dir,
            ssl_dir,
            crt_list_dir,
            general_dir,
        }
    }

    /// Capability-aware construction: HAProxy versions without native
    /// CRT-list storage keep CRT-lists in the general directory instead.
    pub fn with_capabilities(
        maps_dir: PathBuf,
        ssl_dir: PathBuf,
        crt_list_dir: PathBuf,
        general_dir: PathBuf,
        supports_crt_list_storage: bool,
    ) -> Self {
        let crt_list_dir = if supports_crt_list_storage {
            crt_list_dir
        } else {
            general_dir.clone()
        };
        Self::new(maps_dir, ssl_dir, crt_list_dir, general_dir)
    }

    pub fn from_dataplane(config: &DataplaneConfig) -> Self {
        Self::with_capabilities(
            config.maps_dir.clone(),
            config.ssl_dir.clone(),
            config.crt_list_dir.clone(),
            config.general_dir.clone(),
            config.supports_crt_list_storage,
        )
    }

    /// All four directories rooted under `root`, as used by per-test temp
    /// layouts.
    pub fn rooted_at(root: &Path) -> Self {
        Self::new(
            root.join("maps"),
            root.join("ssl"),
            root.join("files"),
            root.join("files"),
        )
    }

    pub fn get_path(&self, name: &str, kind: FileKind) -> PathBuf {
        self.dir_for(kind).join(name)
    }

    pub fn dir_for(&self, kind: FileKind) -> &Path {
        match kind {
            FileKind::Map => &self.maps_dir,
            FileKind::GeneralFile => &self.general_dir,
            FileKind::Certificate => &self.ssl_dir,
            FileKind::CrtList => &self.crt_list_dir,
        }
    }

    pub fn maps_dir(&self) -> &Path {
        &self.maps_dir
    }

    pub fn ssl_dir(&self) -> &Path {
        &self.ssl_dir
    }

    pub fn crt_list_dir(&self) -> &Path {
        &self.crt_list_dir
    }

    pub fn general_dir(&self) -> &Path {
        &self.general_dir
    }
}
