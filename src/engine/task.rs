use std::sync::Arc;

use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;

use crate::core::Dynamic;
use crate::engine::Dependencies;
use crate::error::NodeError;

pub(crate) type ErrorHook = Box<dyn Fn(&NodeError) + Send + Sync>;
pub(crate) type ResultHook<R> = Box<dyn Fn(&R) + Send + Sync>;

pub(crate) trait TypedTask: Send + Sync {
    /// The concrete output type of this task.
    type Output: Send + Sync + 'static;

    fn dependencies(&self) -> Vec<NodeIndex>;

    fn execute(
        &self,
        dependencies: &[Dynamic],
    ) -> BoxFuture<'static, anyhow::Result<Self::Output>>;

    fn on_result(&self, _: &Self::Output) {}

    /// Returns `true` when the failure was handled by the node itself.
    fn on_error(&self, _: &NodeError) -> bool {
        false
    }
}

/// The type-erased foundation that allows the graph to hold nodes with
/// different output types.
pub(crate) trait Task: Send + Sync {
    fn dependencies(&self) -> Vec<NodeIndex>;

    fn execute(&self, dependencies: &[Dynamic]) -> BoxFuture<'static, anyhow::Result<Dynamic>>;

    fn on_result(&self, output: &Dynamic);

    fn on_error(&self, error: &NodeError) -> bool;
}

// A blanket implementation to automatically bridge the two. This is where the
// type erasure actually happens.
impl<T> Task for T
where
    T: TypedTask + 'static,
{
    fn dependencies(&self) -> Vec<NodeIndex> {
        T::dependencies(self)
    }

    fn execute(&self, dependencies: &[Dynamic]) -> BoxFuture<'static, anyhow::Result<Dynamic>> {
        let future = T::execute(self, dependencies);
        Box::pin(async move {
            let output = future.await?;
            Ok(Arc::new(output) as Dynamic)
        })
    }

    fn on_result(&self, output: &Dynamic) {
        if let Some(output) = output.downcast_ref::<T::Output>() {
            T::on_result(self, output);
        }
    }

    fn on_error(&self, error: &NodeError) -> bool {
        T::on_error(self, error)
    }
}

pub(crate) struct TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
{
    pub dependencies: D,
    pub callback: F,
    pub on_error: Option<ErrorHook>,
    pub on_result: Option<ResultHook<R>>,
}

impl<R, D, F, Fut> TypedTask for TaskNode<R, D, F>
where
    R: Send + Sync + 'static,
    D: Dependencies,
    F: Fn(D::Output) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    type Output = R;

    fn dependencies(&self) -> Vec<NodeIndex> {
        self.dependencies.dependencies()
    }

    fn execute(&self, dependencies: &[Dynamic]) -> BoxFuture<'static, anyhow::Result<R>> {
        let inputs = self.dependencies.resolve(dependencies);
        Box::pin((self.callback)(inputs))
    }

    fn on_result(&self, output: &R) {
        if let Some(hook) = &self.on_result {
            hook(output);
        }
    }

    fn on_error(&self, error: &NodeError) -> bool {
        match &self.on_error {
            Some(hook) => {
                hook(error);
                true
            }
            None => false,
        }
    }
}
