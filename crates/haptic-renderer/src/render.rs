//! The rendering pass: main config, pre-declared and dynamic auxiliary files

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use haptic_config::{Config, TemplateSources};
use haptic_core::Result;
use haptic_template::{
    AuxiliaryFiles, EngineType, FileKind, FileRegistry, FilterSet, FunctionSet, PathResolver,
    RenderedFile, TemplateEngine,
};

use crate::context::{build_context, RenderContext};
use crate::stores::StoreSet;

/// Name of the main configuration template.
pub const MAIN_TEMPLATE: &str = "haproxy.cfg";

/// One fully rendered configuration bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBundle {
    pub haproxy_cfg: String,
    pub files: AuxiliaryFiles,
}

/// Renders a config revision's templates against a set of stores.
pub struct Renderer {
    engine: Arc<TemplateEngine>,
    snippet_names: Vec<String>,
    map_names: Vec<String>,
    file_names: Vec<String>,
    cert_names: Vec<String>,
    extra_context: serde_json::Map<String, serde_json::Value>,
}

impl Renderer {
    /// Wrap an already compiled engine.
    pub fn new(
        engine: Arc<TemplateEngine>,
        templates: &TemplateSources,
        extra_context: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            engine,
            snippet_names: templates.ordered_snippet_names(),
            map_names: templates.maps.keys().cloned().collect(),
            file_names: templates.files.keys().cloned().collect(),
            cert_names: templates.ssl_certs.keys().cloned().collect(),
            extra_context,
        }
    }

    /// Compile the revision's templates and build a renderer for them.
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = TemplateEngine::new(
            EngineType::Jinja2,
            config.templates.flat_namespace()?,
            FilterSet::standard(),
            FunctionSet::standard(),
            config.post_processors.clone(),
            PathResolver::from_dataplane(&config.dataplane),
        )?;
        Ok(Self::new(
            Arc::new(engine),
            &config.templates,
            config.extra_context.clone(),
        ))
    }

    /// Build a renderer around an engine configured elsewhere (worker
    /// engines in the test runner carry their own temp-dir path resolver).
    pub fn with_engine(
        engine: Arc<TemplateEngine>,
        config: &Config,
    ) -> Self {
        Self::new(engine, &config.templates, config.extra_context.clone())
    }

    pub fn engine(&self) -> &Arc<TemplateEngine> {
        &self.engine
    }

    /// Assemble the context this renderer would render with.
    pub fn context(
        &self,
        stores: &StoreSet,
        http_fixtures: Option<&BTreeMap<String, String>>,
    ) -> (RenderContext, Arc<FileRegistry>) {
        let registry = Arc::new(FileRegistry::new(self.engine.path_resolver().clone()));
        let context = build_context(
            stores,
            &registry,
            &self.snippet_names,
            self.engine.path_resolver(),
            &self.extra_context,
            http_fixtures,
        );
        (context, registry)
    }

    /// Render the full bundle: main config, every pre-declared auxiliary
    /// template in deterministic order, then merge dynamically registered
    /// files over the static ones.
    pub fn render_with_stores(&self, stores: &StoreSet) -> Result<RenderedBundle> {
        self.render_with_fixtures(stores, None)
    }

    pub fn render_with_fixtures(
        &self,
        stores: &StoreSet,
        http_fixtures: Option<&BTreeMap<String, String>>,
    ) -> Result<RenderedBundle> {
        let (context, registry) = self.context(stores, http_fixtures);

        let haproxy_cfg = self.engine.render(MAIN_TEMPLATE, context.value.clone())?;

        let mut files = AuxiliaryFiles::default();
        for (names, kind) in [
            (&self.map_names, FileKind::Map),
            (&self.file_names, FileKind::GeneralFile),
            (&self.cert_names, FileKind::Certificate),
        ] {
            for name in names {
                let content = self.engine.render(name, context.value.clone())?;
                files.upsert(kind, RenderedFile::new(name.clone(), content));
            }
        }

        let dynamic = registry.drain();
        if !dynamic.is_empty() {
            debug!(
                maps = dynamic.map_files.len(),
                general = dynamic.general_files.len(),
                certs = dynamic.ssl_certificates.len(),
                crt_lists = dynamic.crt_list_files.len(),
                "merging dynamically registered files"
            );
        }
        files.merge(dynamic);

        Ok(RenderedBundle { haproxy_cfg, files })
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("snippets", &self.snippet_names)
            .field("maps", &self.map_names)
            .finish_non_exhaustive()
    }
}
