use super::ScopeOptions;
use crate::core::{FactoryError, Result};
use crate::model::{Args, InstanceId, Model, Produced};
use crate::namespace::{Namespace, Node};
use crate::registry::{CallOptions, Method, NamespacePath, resolve_flag};
use crate::session::Session;
use log::warn;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, Level, event, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    Draining,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Active => "active",
            Phase::Draining => "draining",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

struct ManagerState {
    phase: Phase,
    tracked: BTreeMap<InstanceId, Model>,
}

struct ScopeInner {
    session: Arc<dyn Session>,
    options: ScopeOptions,
    root: Arc<Node>,
    state: Mutex<ManagerState>,
}

impl Drop for ScopeInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase == Phase::Active {
            warn!(
                "model factory scope dropped without exit; {} tracked instance(s) were not cleaned up",
                state.tracked.len()
            );
        }
    }
}

/// One test's worth of factory calls.
///
/// Every row produced through the scope is removed again by [`Scope::exit`],
/// together with anything else the session still holds at that point.
/// Handles are cheap clones of the same scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(session: Arc<dyn Session>, options: ScopeOptions, root: Arc<Node>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                session,
                options,
                root,
                state: Mutex::new(ManagerState {
                    phase: Phase::Idle,
                    tracked: BTreeMap::new(),
                }),
            }),
        }
    }

    pub(crate) async fn activate(&self) {
        self.inner.state.lock().await.phase = Phase::Active;
        event!(
            Level::INFO,
            commit = self.inner.options.commit,
            cleanup = self.inner.options.cleanup,
            "model factory scope entered"
        );
    }

    /// Root of the namespace tree.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.clone(), Arc::clone(&self.inner.root))
    }

    pub fn get(&self, name: &str) -> Result<Namespace> {
        self.namespace().get(name)
    }

    pub fn resolve(&self, dotted: &str) -> Result<Namespace> {
        self.namespace().resolve(dotted)
    }

    /// Calls the factory at a dotted path, e.g. `scope.call("baz.new", args)`.
    pub async fn call(&self, dotted: &str, args: Args) -> Result<Produced> {
        self.call_with(dotted, args, CallOptions::default()).await
    }

    pub async fn call_with(&self, dotted: &str, args: Args, options: CallOptions) -> Result<Produced> {
        let path = NamespacePath::from(dotted);
        let Some((parent, name)) = path.split_last() else {
            return self.namespace().invoke_with(args, options).await;
        };
        let parent = parent
            .segments()
            .iter()
            .try_fold(self.namespace(), |ns, segment| ns.get(segment))?;
        parent.call_with(name, args, options).await
    }

    pub fn session(&self) -> Arc<dyn Session> {
        Arc::clone(&self.inner.session)
    }

    pub fn options(&self) -> ScopeOptions {
        self.inner.options
    }

    pub async fn phase(&self) -> Phase {
        self.inner.state.lock().await.phase
    }

    /// Instances created through this scope, oldest first.
    pub async fn tracked(&self) -> Vec<Model> {
        self.inner.state.lock().await.tracked.values().cloned().collect()
    }

    pub async fn tracked_count(&self) -> usize {
        self.inner.state.lock().await.tracked.len()
    }

    /// Runs one factory under the call protocol.
    pub(crate) async fn run(
        &self,
        path: &NamespacePath,
        method: &Method,
        args: Args,
        options: CallOptions,
    ) -> Result<Produced> {
        let span = info_span!("model_factory.call", path = %path);
        self.run_locked(path, method, args, options)
            .instrument(span)
            .await
    }

    async fn run_locked(
        &self,
        path: &NamespacePath,
        method: &Method,
        args: Args,
        options: CallOptions,
    ) -> Result<Produced> {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Active {
            return Err(FactoryError::ScopeClosed(format!(
                "cannot call '{}' while the scope is {}",
                path, state.phase
            )));
        }

        let session = &self.inner.session;
        // whatever the test body left open is discarded
        session.rollback().await?;
        if session.requires_explicit_begin() {
            session.begin().await?;
        }

        let produced = method.produce(&args).inspect_err(|err| {
            event!(Level::ERROR, error = %err, "factory failed");
        })?;

        let merge = resolve_flag([options.merge, method.merge_default()], false);
        let produced = if merge {
            let mut canonical = Vec::with_capacity(produced.len());
            for model in produced.models() {
                canonical.push(session.merge(&model).await?);
            }
            produced.with_models(canonical)
        } else {
            session.add_all(&produced.models()).await?;
            produced
        };

        let new_models = session.new_models().await?;
        session.flush().await?;
        for model in new_models {
            state.tracked.insert(model.instance_id(), model);
        }

        let commit = resolve_flag([options.commit, method.commit_default()], true);
        if commit {
            if self.inner.options.commit {
                session.commit().await?;
            } else {
                session.flush().await?;
            }
            for model in produced.models() {
                session.refresh(&model).await?;
            }
        }

        event!(
            Level::DEBUG,
            produced = produced.len(),
            merge,
            commit,
            "factory call completed"
        );
        Ok(produced)
    }

    /// Leaves the scope, sweeping the session's identity map unless cleanup
    /// is disabled. A failed sweep leaves the scope `Draining`.
    pub async fn exit(&self) -> Result<()> {
        let span = info_span!("model_factory.exit");
        self.exit_locked().instrument(span).await
    }

    async fn exit_locked(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::Active {
            return Err(FactoryError::ScopeClosed(format!(
                "cannot exit a scope that is {}",
                state.phase
            )));
        }
        state.phase = Phase::Draining;

        if self.inner.options.cleanup {
            let swept = self.sweep().await?;
            event!(Level::INFO, swept, "model factory cleanup finished");
        } else {
            event!(Level::INFO, "model factory cleanup skipped");
        }

        state.tracked.clear();
        state.phase = Phase::Closed;
        Ok(())
    }

    /// Deletes everything in the identity map, newest first, until it is
    /// empty. Returns the number of instances deleted.
    async fn sweep(&self) -> Result<usize> {
        let session = &self.inner.session;
        session.rollback().await?;
        if session.requires_explicit_begin() {
            session.begin().await?;
        }

        let mut swept = 0;
        loop {
            let snapshot = session.identity_map().await?;
            if snapshot.is_empty() {
                break;
            }

            let before = swept;
            for model in snapshot.iter().rev() {
                // cascades may already have taken it
                if !session.contains(model).await? {
                    continue;
                }
                session.delete(model).await?;
                session.flush().await?;
                swept += 1;
            }

            if swept == before {
                return Err(FactoryError::Transaction(format!(
                    "cleanup made no progress; {} instance(s) remain in the identity map",
                    snapshot.len()
                )));
            }
        }

        if self.inner.options.commit {
            session.commit().await?;
        }
        Ok(swept)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}
