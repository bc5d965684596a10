use std::any::type_name;
use std::borrow::Cow;
use std::sync::Arc;

use crate::core::Dynamic;
use crate::engine::graph::Graph;
use crate::engine::handle::Node;
use crate::engine::task::{ErrorHook, ResultHook, TaskNode};
use crate::engine::Dependencies;
use crate::error::NodeError;

/// The entry point for declaring a derived node. Starts with no dependencies
/// and no name.
pub struct NodeDef<'a> {
    graph: &'a Graph,
    name: Option<Cow<'static, str>>,
}

impl<'a> NodeDef<'a> {
    pub(crate) fn new(graph: &'a Graph) -> Self {
        Self { graph, name: None }
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on<D, R>(self, dependencies: D) -> NodeBinder<'a, D, R>
    where
        D: Dependencies,
        R: Send + Sync + PartialEq + 'static,
    {
        NodeBinder {
            graph: self.graph,
            name: self.name,
            dependencies,
            default: None,
            on_error: None,
            on_result: None,
        }
    }

    /// Declares a node without dependencies.
    pub fn run<F, Fut, R>(self, callback: F) -> Node<R>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Send + Sync + PartialEq + 'static,
    {
        self.depends_on(()).run(move |()| callback())
    }
}

/// A node declaration with its dependencies bound.
pub struct NodeBinder<'a, D, R> {
    graph: &'a Graph,
    name: Option<Cow<'static, str>>,
    dependencies: D,
    default: Option<R>,
    on_error: Option<ErrorHook>,
    on_result: Option<ResultHook<R>>,
}

impl<'a, D, R> NodeBinder<'a, D, R>
where
    D: Dependencies,
    R: Send + Sync + PartialEq + 'static,
{
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the value observed while the node is not resolved.
    pub fn default(mut self, value: R) -> Self {
        self.default = Some(value);
        self
    }

    /// Handles failures of this node. A node with an error hook does not
    /// report its failures to the graph's error sink.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&NodeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Called with every newly resolved value, after it has been committed.
    pub fn on_result<F>(mut self, hook: F) -> Self
    where
        F: Fn(&R) + Send + Sync + 'static,
    {
        self.on_result = Some(Box::new(hook));
        self
    }

    pub fn run<F, Fut>(self, callback: F) -> Node<R>
    where
        F: Fn(D::Output) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());
        let default = self.default.map(|value| Arc::new(value) as Dynamic);

        let index = self.graph.add_task::<R>(
            name,
            Arc::new(TaskNode {
                dependencies: self.dependencies,
                callback,
                on_error: self.on_error,
                on_result: self.on_result,
            }),
            default,
        );

        Node::new(index)
    }
}
