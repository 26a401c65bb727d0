use super::{Method, NamespacePath, Registry};
use crate::core::{FactoryError, Result};
use log::warn;

/// A statically declared tree of factories.
///
/// ```ignore
/// Declaration::new()
///     .method("bar", bar_factory)
///     .namespace("name", |name| {
///         name.namespace("space", |space| space.method("nesting", nesting))
///     })
///     .register(&mut registry)?;
/// ```
///
/// Every entry goes through [`Registry::register`], so duplicates fail the
/// same way. Names starting with `_` are private and skipped.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
enum Entry {
    Method(String, Method),
    Namespace(String, Declaration),
    Callable(Method),
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.entries.push(Entry::Method(name.into(), method));
        self
    }

    pub fn namespace(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(Declaration) -> Declaration,
    ) -> Self {
        self.entries
            .push(Entry::Namespace(name.into(), build(Declaration::new())));
        self
    }

    /// Makes the enclosing namespace itself callable: the method is bound at
    /// the parent path under the namespace's own name.
    pub fn callable(mut self, method: Method) -> Self {
        self.entries.push(Entry::Callable(method));
        self
    }

    pub fn register(&self, registry: &mut Registry) -> Result<()> {
        self.register_under(registry, &NamespacePath::root())
    }

    pub fn into_registry(self) -> Result<Registry> {
        let mut registry = Registry::new();
        self.register(&mut registry)?;
        Ok(registry)
    }

    fn register_under(&self, registry: &mut Registry, path: &NamespacePath) -> Result<()> {
        for entry in &self.entries {
            match entry {
                Entry::Method(name, method) => {
                    if is_private(name) {
                        warn!("skipping private factory '{}' in namespace {}", name, path);
                        continue;
                    }
                    registry.register(path.clone(), name.clone(), method.clone())?;
                }
                Entry::Namespace(name, inner) => {
                    if is_private(name) {
                        warn!("skipping private namespace '{}' in namespace {}", name, path);
                        continue;
                    }
                    inner.register_under(registry, &path.child(name.clone()))?;
                }
                Entry::Callable(method) => {
                    let (parent, name) = path.split_last().ok_or_else(|| {
                        FactoryError::Argument("the root namespace cannot be callable".into())
                    })?;
                    registry.register(parent, name, method.clone())?;
                }
            }
        }
        Ok(())
    }
}

fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn factory(table: &'static str) -> Method {
        Method::new(move |_| Ok(Model::new(table)))
    }

    #[test]
    fn test_nested_declaration_registers_paths() {
        let registry = Declaration::new()
            .method("bar", factory("bar"))
            .namespace("name", |name| {
                name.namespace("space", |space| space.method("nesting", factory("bar")))
            })
            .into_registry()
            .unwrap();

        assert!(registry.contains(&NamespacePath::root(), "bar"));
        assert!(registry.contains(&"name.space".into(), "nesting"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_callable_binds_on_parent() {
        let registry = Declaration::new()
            .namespace("baz", |baz| {
                baz.callable(factory("baz")).method("many", factory("baz"))
            })
            .into_registry()
            .unwrap();

        assert!(registry.contains(&NamespacePath::root(), "baz"));
        assert!(registry.contains(&"baz".into(), "many"));
    }

    #[test]
    fn test_private_names_are_skipped() {
        let registry = Declaration::new()
            .method("_helper", factory("bar"))
            .namespace("_internal", |ns| ns.method("new", factory("bar")))
            .method("bar", factory("bar"))
            .into_registry()
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_root_callable_is_rejected() {
        let err = Declaration::new()
            .callable(factory("bar"))
            .into_registry()
            .unwrap_err();
        assert!(matches!(err, FactoryError::Argument(_)));
    }
}
