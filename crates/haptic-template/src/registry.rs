//! Auxiliary file collection
//!
//! Pre-declared auxiliary templates are rendered by the renderer; templates
//! can additionally register files on the fly through the `file_registry`
//! context object. Dynamic entries override pre-declared ones of the same
//! path within a kind.

use std::sync::{Arc, Mutex};

use minijinja::value::{Object, Value};
use minijinja::{Error as MjError, ErrorKind, State};

use crate::path::{FileKind, PathResolver};

/// One rendered auxiliary file: logical path plus content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: String,
    pub content: String,
}

impl RenderedFile {
    pub fn new<P: Into<String>, C: Into<String>>(path: P, content: C) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// The four ordered auxiliary file lists of one rendered bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxiliaryFiles {
    pub map_files: Vec<RenderedFile>,
    pub general_files: Vec<RenderedFile>,
    pub ssl_certificates: Vec<RenderedFile>,
    pub crt_list_files: Vec<RenderedFile>,
}

impl AuxiliaryFiles {
    pub fn is_empty(&self) -> bool {
        self.map_files.is_empty()
            && self.general_files.is_empty()
            && self.ssl_certificates.is_empty()
            && self.crt_list_files.is_empty()
    }

    /// Merge `dynamic` over `self`; within each kind, a dynamic entry
    /// replaces a static entry of the same path, otherwise appends.
    pub fn merge(&mut self, dynamic: AuxiliaryFiles) {
        merge_kind(&mut self.map_files, dynamic.map_files);
        merge_kind(&mut self.general_files, dynamic.general_files);
        merge_kind(&mut self.ssl_certificates, dynamic.ssl_certificates);
        merge_kind(&mut self.crt_list_files, dynamic.crt_list_files);
    }

    fn list_mut(&mut self, kind: FileKind) -> &mut Vec<RenderedFile> {
        match kind {
            FileKind::Map => &mut self.map_files,
            FileKind::GeneralFile => &mut self.general_files,
            FileKind::Certificate => &mut self.ssl_certificates,
            FileKind::CrtList => &mut self.crt_list_files,
        }
    }

    /// Insert keeping paths unique within the kind; same path replaces.
    pub fn upsert(&mut self, kind: FileKind, file: RenderedFile) {
        let list = self.list_mut(kind);
        match list.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => list.push(file),
        }
    }

    /// Find an entry by kind and logical path.
    pub fn find(&self, kind: FileKind, path: &str) -> Option<&RenderedFile> {
        let list = match kind {
            FileKind::Map => &self.map_files,
            FileKind::GeneralFile => &self.general_files,
            FileKind::Certificate => &self.ssl_certificates,
            FileKind::CrtList => &self.crt_list_files,
        };
        list.iter().find(|f| f.path == path)
    }
}

fn merge_kind(base: &mut Vec<RenderedFile>, dynamic: Vec<RenderedFile>) {
    for file in dynamic {
        match base.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => *existing = file,
            None => base.push(file),
        }
    }
}

/// Mutable collector bound to one rendering pass.
///
/// Exposed to templates as `file_registry`; each `register_*` method stores
/// the content under the logical name and returns the resolved absolute path
/// for use inside the main configuration.
#[derive(Debug)]
pub struct FileRegistry {
    resolver: PathResolver,
    files: Mutex<AuxiliaryFiles>,
}

impl FileRegistry {
    pub fn new(resolver: PathResolver) -> Self {
        Self {
            resolver,
            files: Mutex::new(AuxiliaryFiles::default()),
        }
    }

    pub fn register(&self, kind: FileKind, name: &str, content: &str) -> String {
        let mut files = self.files.lock().expect("file registry lock poisoned");
        files.upsert(kind, RenderedFile::new(name, content));
        self.resolver.get_path(name, kind).display().to_string()
    }

    /// Drain everything registered so far.
    pub fn drain(&self) -> AuxiliaryFiles {
        std::mem::take(&mut *self.files.lock().expect("file registry lock poisoned"))
    }
}

impl Object for FileRegistry {
    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[Value],
    ) -> Result<Value, MjError> {
        let kind = match method {
            "register_map_file" => FileKind::Map,
            "register_general_file" => FileKind::GeneralFile,
            "register_ssl_certificate" => FileKind::Certificate,
            "register_crt_list" => FileKind::CrtList,
            _ => {
                return Err(MjError::new(
                    ErrorKind::UnknownMethod,
                    format!("file_registry has no method '{method}'"),
                ))
            }
        };
        let (name, content): (&str, &str) = minijinja::value::from_args(args)?;
        Ok(Value::from(self.register(kind, name, content)))
    }
}
