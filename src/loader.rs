//! Load-time hook: intercepts module loading by extension and compiles
//! instrumented text in place of the original.
//!
//! The host runtime sits behind the `ModuleHost` trait; the extension table
//! mirrors how script runtimes dispatch loaders by file extension. The
//! default `.js` loader reads the file and hands it to the host untouched.
//! `activate` wraps it so that files matching the filter are instrumented
//! first; everything else falls through to the prior loader. The original
//! path always reaches the host, so module identity and stack traces keep
//! pointing at the real file, and an instrumentation failure fails the load
//! outright rather than quietly loading uninstrumented code.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use lazy_static::lazy_static;
use regex::Regex;

use crate::config::Config;
use crate::instrument;

/// Compiles module text. Implemented by whatever embeds a script engine.
pub trait ModuleHost {
    /// Compile (and typically execute) module text under `filename`.
    fn compile(&mut self, text: &str, filename: &Path) -> Result<()>;
}

/// A loader takes the host and a path and gets the module compiled.
pub type LoaderFn = Arc<dyn Fn(&mut dyn ModuleHost, &Path) -> Result<()> + Send + Sync>;

lazy_static! {
    /// Process-wide loader table keyed by extension (dot included).
    static ref LOADERS: RwLock<HashMap<String, LoaderFn>> = RwLock::new(default_loaders());
}

/// One process never stacks two instrumenting loaders.
static ACTIVATED: AtomicBool = AtomicBool::new(false);

fn default_loaders() -> HashMap<String, LoaderFn> {
    let mut table: HashMap<String, LoaderFn> = HashMap::new();
    table.insert(".js".to_string(), Arc::new(passthrough_loader));
    table
}

/// Read the file and hand it to the host as-is.
fn passthrough_loader(host: &mut dyn ModuleHost, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read module {}", path.display()))?;
    host.compile(&text, path)
}

/// Register (or replace) the loader for an extension.
pub fn register(ext: &str, loader: LoaderFn) {
    let mut table = LOADERS.write().unwrap();
    table.insert(ext.to_string(), loader);
}

/// Current loader for an extension.
pub fn loader_for(ext: &str) -> Option<LoaderFn> {
    let table = LOADERS.read().unwrap();
    table.get(ext).cloned()
}

/// Load a module through the table.
///
/// The loader is cloned out of the table before it runs, so a module that
/// loads further modules while compiling re-enters without holding the
/// table lock.
pub fn load(host: &mut dyn ModuleHost, path: &Path) -> Result<()> {
    let ext = extension_of(path);
    let loader = loader_for(&ext)
        .ok_or_else(|| anyhow!("no loader registered for '{}' ({})", ext, path.display()))?;
    loader(host, path)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Decides which files get instrumented while the hook is active.
///
/// The default scope is "under the root, except the dependency and test
/// directories", compared case-insensitively against forward-slash paths.
pub enum Filter {
    /// Root-scoped patterns with optional extra exclude globs.
    Scope {
        include: Regex,
        exclude: Regex,
        extra: Option<GlobSet>,
    },
    /// Caller-supplied predicate deciding everything itself.
    Predicate(Arc<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl Filter {
    /// Project filter rooted at the current working directory.
    pub fn project() -> Result<Self> {
        let cwd = std::env::current_dir().context("cannot resolve working directory")?;
        Self::rooted(&cwd)
    }

    /// Filter rooted at an explicit directory.
    pub fn rooted(root: &Path) -> Result<Self> {
        let mut root = instrument::normalize_path(root);
        while root.ends_with('/') {
            root.pop();
        }
        let escaped = regex::escape(&root);
        let include = Regex::new(&format!("(?i)^{}/.", escaped))
            .context("building eligibility pattern")?;
        let exclude = Regex::new(&format!("(?i)^{}/(?:node_modules|test)", escaped))
            .context("building exclusion pattern")?;
        Ok(Filter::Scope {
            include,
            exclude,
            extra: None,
        })
    }

    /// Add exclude globs on top of the scope. No-op for predicate filters.
    pub fn with_excludes(self, patterns: &[String]) -> Result<Self> {
        match self {
            Filter::Scope {
                include, exclude, ..
            } => {
                let mut builder = GlobSetBuilder::new();
                for pattern in patterns {
                    let glob = Glob::new(pattern)
                        .with_context(|| format!("invalid exclude glob '{}'", pattern))?;
                    builder.add(glob);
                }
                let extra = builder.build().context("building exclude globs")?;
                Ok(Filter::Scope {
                    include,
                    exclude,
                    extra: Some(extra),
                })
            }
            other => Ok(other),
        }
    }

    /// Filter that delegates every decision to the given predicate.
    pub fn from_predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(predicate))
    }

    /// Whether a file is eligible for instrumentation.
    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Filter::Scope {
                include,
                exclude,
                extra,
            } => {
                let normalized = instrument::normalize_path(path);
                include.is_match(&normalized)
                    && !exclude.is_match(&normalized)
                    && extra
                        .as_ref()
                        .map_or(true, |globs| !globs.is_match(normalized.as_str()))
            }
            Filter::Predicate(predicate) => predicate(path),
        }
    }
}

/// Wrap the `.js` loader so project files load instrumented. Subsequent
/// calls are no-ops.
pub fn activate() -> Result<()> {
    activate_with(Filter::project()?, &[".js"])
}

/// Activate using the project configuration: its exclude globs join the
/// filter and every listed extension gets wrapped.
pub fn activate_project(config: &Config) -> Result<()> {
    let filter = Filter::project()?.with_excludes(&config.exclude)?;
    activate_with(filter, &config.hooked_extensions())
}

/// Activate with an explicit filter and extension list.
pub fn activate_with(filter: Filter, extensions: &[&str]) -> Result<()> {
    if ACTIVATED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let filter = Arc::new(filter);
    for &ext in extensions {
        let prior = loader_for(ext).unwrap_or_else(|| Arc::new(passthrough_loader));
        let filter = Arc::clone(&filter);
        register(
            ext,
            Arc::new(move |host: &mut dyn ModuleHost, path: &Path| {
                if filter.matches(path) {
                    instrumented_load(host, path)
                } else {
                    prior(host, path)
                }
            }),
        );
    }
    Ok(())
}

/// Instrument a file and compile it under its original path.
fn instrumented_load(host: &mut dyn ModuleHost, path: &Path) -> Result<()> {
    let text = instrument::instrument_file(path)
        .with_context(|| format!("instrumenting {}", path.display()))?;
    host.compile(&text, path)
}
