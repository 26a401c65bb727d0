use crate::core::Result;
use crate::model::{Args, Produced};
use std::fmt;
use std::sync::Arc;

/// A factory callable as stored in the registry.
pub type FactoryFn = Arc<dyn Fn(&Args) -> Result<Produced> + Send + Sync>;

/// A registered factory plus its per-method `commit`/`merge` defaults.
///
/// Unset flags defer to the manager's defaults; see [`resolve_flag`].
#[derive(Clone)]
pub struct Method {
    factory: FactoryFn,
    commit: Option<bool>,
    merge: Option<bool>,
}

impl Method {
    pub fn new<F, P>(factory: F) -> Self
    where
        F: Fn(&Args) -> Result<P> + Send + Sync + 'static,
        P: Into<Produced>,
    {
        Self {
            factory: Arc::new(move |args| factory(args).map(Into::into)),
            commit: None,
            merge: None,
        }
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = Some(merge);
        self
    }

    pub(crate) fn with_defaults(mut self, commit: Option<bool>, merge: Option<bool>) -> Self {
        self.commit = self.commit.or(commit);
        self.merge = self.merge.or(merge);
        self
    }

    pub fn commit_default(&self) -> Option<bool> {
        self.commit
    }

    pub fn merge_default(&self) -> Option<bool> {
        self.merge
    }

    /// Runs the factory without any session involvement.
    pub fn produce(&self, args: &Args) -> Result<Produced> {
        (self.factory)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("commit", &self.commit)
            .field("merge", &self.merge)
            .finish_non_exhaustive()
    }
}

/// Per-call overrides; they win over the method's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub commit: Option<bool>,
    pub merge: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(mut self, commit: bool) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = Some(merge);
        self
    }
}

/// First explicitly set flag wins, else `default`.
pub fn resolve_flag(sources: impl IntoIterator<Item = Option<bool>>, default: bool) -> bool {
    sources.into_iter().flatten().next().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn test_resolve_flag_precedence() {
        assert!(resolve_flag([None, None], true));
        assert!(!resolve_flag([None, None], false));
        assert!(!resolve_flag([Some(false), Some(true)], true));
        assert!(resolve_flag([None, Some(true)], false));
        assert!(resolve_flag(std::iter::empty(), true));
    }

    #[test]
    fn test_method_defaults_are_tristate() {
        let method = Method::new(|_| Ok(Model::new("bar")));
        assert_eq!(method.commit_default(), None);
        assert_eq!(method.merge_default(), None);

        let method = method.commit(false).with_defaults(Some(true), Some(true));
        assert_eq!(method.commit_default(), Some(false));
        assert_eq!(method.merge_default(), Some(true));
    }

    #[test]
    fn test_produce_accepts_collections() {
        let method = Method::new(|_| Ok(vec![Model::new("bar"), Model::new("bar")]));
        assert_eq!(method.produce(&Args::new()).unwrap().len(), 2);
    }
}
