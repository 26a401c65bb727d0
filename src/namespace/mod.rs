// ============================================================================
// Namespace Tree
// ============================================================================
//
// Turns the registry's flat `path -> name -> Method` bindings into a tree that
// can be walked one segment at a time. A node can be a namespace, a callable,
// or both: a method named `n` at path `p` lands on child `n` of node `p`, and
// a namespace `p.n` lands on the very same child.
//
// ============================================================================

use crate::core::{FactoryError, Result};
use crate::manager::Scope;
use crate::model::{Args, Produced};
use crate::registry::{CallOptions, Method, NamespacePath, Registry};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Node {
    method: Option<Method>,
    children: BTreeMap<String, Arc<Node>>,
}

impl Node {
    /// Builds a fresh tree from a registry. Later registry changes do not
    /// reach an already built tree.
    pub fn build(registry: &Registry) -> Arc<Node> {
        let mut root = Node::default();
        for path in registry.namespaces() {
            let node = root.descend(path.segments());
            for (name, method) in registry.methods(&path) {
                let child = Arc::make_mut(node.children.entry(name).or_default());
                child.method = Some(method);
            }
        }
        Arc::new(root)
    }

    fn descend(&mut self, segments: &[String]) -> &mut Node {
        match segments.split_first() {
            None => self,
            Some((head, rest)) => {
                Arc::make_mut(self.children.entry(head.clone()).or_default()).descend(rest)
            }
        }
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn child(&self, name: &str) -> Option<&Arc<Node>> {
        self.children.get(name)
    }

    /// Names of callable children.
    pub fn methods(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, child)| child.method.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names of children that have children of their own.
    pub fn namespaces(&self) -> Vec<String> {
        self.children
            .iter()
            .filter(|(_, child)| !child.children.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Indented listing; callables are suffixed with `()`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for (name, child) in &self.children {
            let marker = if child.method.is_some() { "()" } else { "" };
            // writing into a String cannot fail
            let _ = writeln!(out, "{:indent$}{}{}", "", name, marker, indent = depth * 2);
            child.render_into(out, depth + 1);
        }
    }
}

fn listing(names: Vec<String>) -> String {
    if names.is_empty() {
        "N/A".to_string()
    } else {
        names.join(", ")
    }
}

/// A position in the tree bound to the scope that will run its factories.
#[derive(Clone)]
pub struct Namespace {
    scope: Scope,
    node: Arc<Node>,
    path: NamespacePath,
}

impl Namespace {
    pub(crate) fn new(scope: Scope, root: Arc<Node>) -> Self {
        Self {
            scope,
            node: root,
            path: NamespacePath::root(),
        }
    }

    pub fn path(&self) -> &NamespacePath {
        &self.path
    }

    pub fn methods(&self) -> Vec<String> {
        self.node.methods()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.node.namespaces()
    }

    pub fn is_callable(&self) -> bool {
        self.node.method.is_some()
    }

    pub fn render(&self) -> String {
        self.node.render()
    }

    /// Child lookup; an unknown name fails with `UnknownAttribute`.
    pub fn get(&self, name: &str) -> Result<Namespace> {
        match self.node.child(name) {
            Some(child) => Ok(Namespace {
                scope: self.scope.clone(),
                node: Arc::clone(child),
                path: self.path.child(name),
            }),
            None => Err(FactoryError::UnknownAttribute {
                path: self.path.to_string(),
                name: name.to_string(),
                methods: listing(self.methods()),
                namespaces: listing(self.namespaces()),
            }),
        }
    }

    /// Walks a dotted path, e.g. `"name.space.nesting"`.
    pub fn resolve(&self, dotted: &str) -> Result<Namespace> {
        NamespacePath::from(dotted)
            .segments()
            .iter()
            .try_fold(self.clone(), |ns, segment| ns.get(segment))
    }

    pub async fn invoke(&self, args: Args) -> Result<Produced> {
        self.invoke_with(args, CallOptions::default()).await
    }

    pub async fn invoke_with(&self, args: Args, options: CallOptions) -> Result<Produced> {
        let method = self.node.method.as_ref().ok_or_else(|| self.not_callable(&self.path))?;
        self.scope.run(&self.path, method, args, options).await
    }

    /// Looks up `name` here and invokes it.
    pub async fn call(&self, name: &str, args: Args) -> Result<Produced> {
        self.call_with(name, args, CallOptions::default()).await
    }

    pub async fn call_with(&self, name: &str, args: Args, options: CallOptions) -> Result<Produced> {
        let path = self.path.child(name);
        let method = self
            .node
            .child(name)
            .and_then(|child| child.method.as_ref())
            .ok_or_else(|| self.not_callable(&path))?;
        self.scope.run(&path, method, args, options).await
    }

    fn not_callable(&self, path: &NamespacePath) -> FactoryError {
        FactoryError::NotCallable {
            path: path.to_string(),
            methods: listing(self.methods()),
            namespaces: listing(self.namespaces()),
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("methods", &self.methods())
            .field("namespaces", &self.namespaces())
            .finish()
    }
}
