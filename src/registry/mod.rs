// ============================================================================
// Factory Registry
// ============================================================================
//
// Flat store of `path -> name -> Method`. The registry never builds a tree and
// never talks to a session; the namespace module turns a snapshot of it into
// something callable.
//
// ============================================================================

pub mod declarative;
pub mod method;

pub use declarative::Declaration;
pub use method::{CallOptions, FactoryFn, Method, resolve_flag};

use crate::core::{FactoryError, Result};
use crate::model::{Args, Produced};
use lazy_static::lazy_static;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Ordered path segments, e.g. `["name", "space"]`. The root is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacePath(Vec<String>);

impl NamespacePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// Every segment must be reachable by a dotted lookup: non-empty and
    /// free of `.`.
    pub fn validate(&self) -> Result<()> {
        self.0
            .iter()
            .try_for_each(|segment| check_segment(segment, "namespace segment", self))
    }

    /// Path minus its last segment, plus that segment.
    pub fn split_last(&self) -> Option<(NamespacePath, &str)> {
        let (last, rest) = self.0.split_last()?;
        Some((Self(rest.to_vec()), last.as_str()))
    }
}

/// Splits on `.`. The empty string is the root; any other empty segment is
/// kept, so `"a..b"` is rejected at registration instead of read as `"a.b"`.
impl From<&str> for NamespacePath {
    fn from(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self(path.split('.').map(str::to_string).collect())
    }
}

impl From<&[&str]> for NamespacePath {
    fn from(segments: &[&str]) -> Self {
        Self(segments.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for NamespacePath {
    fn from(segments: [&str; N]) -> Self {
        Self::from(&segments[..])
    }
}

impl From<Vec<String>> for NamespacePath {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl fmt::Display for NamespacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0.join("."))
        }
    }
}

fn check_segment(segment: &str, what: &str, path: &NamespacePath) -> Result<()> {
    if segment.is_empty() || segment.contains('.') {
        return Err(FactoryError::Argument(format!(
            "invalid {} '{}' in namespace {}",
            what, segment, path
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    bindings: HashMap<NamespacePath, BTreeMap<String, Method>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `method` under `path` at `name`. Re-registering a name fails.
    pub fn register(
        &mut self,
        path: impl Into<NamespacePath>,
        name: impl Into<String>,
        method: Method,
    ) -> Result<()> {
        let path = path.into();
        let name = name.into();
        path.validate()?;
        check_segment(&name, "factory name", &path)?;
        let entry = self.bindings.entry(path.clone()).or_default();
        if entry.contains_key(&name) {
            return Err(FactoryError::DuplicateRegistration {
                path: path.to_string(),
                name,
            });
        }
        entry.insert(name, method);
        Ok(())
    }

    /// Fluent registration: `registry.register_at("bar").commit(false).factory(f)`.
    pub fn register_at(&mut self, path: impl Into<NamespacePath>) -> Registration<'_> {
        Registration {
            registry: self,
            path: path.into(),
            name: "new".to_string(),
            commit: None,
            merge: None,
        }
    }

    /// Every registered path, sorted.
    pub fn namespaces(&self) -> Vec<NamespacePath> {
        let mut paths: Vec<NamespacePath> = self.bindings.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Methods bound exactly at `path`; empty for an unknown path.
    pub fn methods(&self, path: &NamespacePath) -> BTreeMap<String, Method> {
        self.bindings.get(path).cloned().unwrap_or_default()
    }

    pub fn contains(&self, path: &NamespacePath, name: &str) -> bool {
        self.bindings
            .get(path)
            .is_some_and(|methods| methods.contains_key(name))
    }

    /// Number of registered methods across all paths.
    pub fn len(&self) -> usize {
        self.bindings.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }
}

/// Builder returned by [`Registry::register_at`].
pub struct Registration<'a> {
    registry: &'a mut Registry,
    path: NamespacePath,
    name: String,
    commit: Option<bool>,
    merge: Option<bool>,
}

impl Registration<'_> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = Some(merge);
        self
    }

    pub fn factory<F, P>(self, factory: F) -> Result<()>
    where
        F: Fn(&Args) -> Result<P> + Send + Sync + 'static,
        P: Into<Produced>,
    {
        self.method(Method::new(factory))
    }

    pub fn method(self, method: Method) -> Result<()> {
        let method = method.with_defaults(self.commit, self.merge);
        self.registry.register(self.path, self.name, method)
    }
}

// Process-wide registry for code that registers factories at startup instead
// of threading a `Registry` through. Tests sharing a process must clear it.
lazy_static! {
    static ref DEFAULT_REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());
}

pub fn default_registry() -> Result<MutexGuard<'static, Registry>> {
    Ok(DEFAULT_REGISTRY.lock()?)
}

pub fn snapshot_default() -> Result<Registry> {
    Ok(default_registry()?.clone())
}

pub fn clear_default() -> Result<()> {
    default_registry()?.clear();
    Ok(())
}
