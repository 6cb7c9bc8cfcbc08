//! Error types shared across HAPTIC crates

/// Result type alias for HAPTIC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the controller core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// User-supplied configuration failed validation; fatal to the revision only
    #[error("invalid configuration: {message}")]
    ConfigInvalid { message: String },

    /// Template failed to compile at engine construction
    #[error("failed to compile template '{template}': {message}")]
    TemplateCompile {
        template: String,
        message: String,
        /// First 200 characters of the offending source
        snippet: String,
    },

    /// Template failed at render time
    #[error("failed to render template '{template}': {message}")]
    TemplateRender { template: String, message: String },

    /// Referenced template does not exist in the compiled namespace
    #[error("template '{name}' not found (available: {available:?})")]
    TemplateNotFound { name: String, available: Vec<String> },

    /// HAProxy rejected the rendered configuration
    #[error("haproxy rejected configuration: {diagnostic}")]
    HaproxyInvalid { diagnostic: String },

    /// Add collided with a live resource under the same index key
    #[error("resource already exists for index key {key:?}")]
    StoreCollision { key: Vec<String> },

    /// Write attempted against a read-only store view
    #[error("store is read-only")]
    StoreReadOnly,

    /// An event was dropped for a slow subscriber; observability only
    #[error("event dropped for slow subscriber")]
    EventDropped,

    /// Requested template engine is not supported
    #[error("unsupported template engine '{0}'")]
    UnsupportedEngine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a configuration validation error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    /// Create a template compilation error, capping the snippet at 200 chars
    pub fn compile<T: Into<String>, M: Into<String>>(template: T, message: M, source: &str) -> Self {
        Self::TemplateCompile {
            template: template.into(),
            message: message.into(),
            snippet: truncate(source, 200),
        }
    }

    /// Create a render error
    pub fn render<T: Into<String>, M: Into<String>>(template: T, message: M) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Create a haproxy validation error
    pub fn haproxy<S: Into<String>>(diagnostic: S) -> Self {
        Self::HaproxyInvalid {
            diagnostic: diagnostic.into(),
        }
    }

    /// Strip the mechanical wrapping the engine puts around render failures
    /// so users see the root cause, not the plumbing.
    pub fn simplify_render_message(message: &str) -> String {
        let mut out = message;
        for prefix_marker in ["failed to render template", "unable to execute template"] {
            if let Some(idx) = out.find(prefix_marker) {
                if let Some(colon) = out[idx..].find(": ") {
                    out = &out[idx + colon + 2..];
                }
            }
        }
        // minijinja nests causes behind "caused by:" lines; keep the deepest one
        if let Some(idx) = out.rfind("caused by: ") {
            out = &out[idx + "caused by: ".len()..];
        }
        out.trim().to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
