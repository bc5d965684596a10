//! The asynchronous dependency graph.
//!
//! Every derived value is a node with an explicit list of upstream
//! dependencies and an async resolution function. Nodes are organized into a
//! Directed Acyclic Graph; edges always point from an existing node to a newly
//! added one, so cycles cannot be expressed.
//!
//! ## Core abstractions
//!
//! * [`Input<T>`]: a root value set from the outside. Changing it invalidates
//!   everything downstream.
//! * [`Node<T>`]: a lightweight token for the *eventual* value of a derived
//!   node, used to wire dependencies and to read results.
//! * [`Dependencies`]: implemented for `()`, single handles, `Vec`s of handles
//!   and tuples of handles. It turns the type-erased dependency outputs back
//!   into `Arc<T>`s before the resolution function runs.
//!
//! ## Phantom handles
//!
//! The graph stores all values as `Arc<dyn Any + Send + Sync>`. A handle
//! carries no data but holds `T` in `PhantomData`, so the compiler enforces
//! that a resolution function receives exactly the types its dependencies
//! produce. The downcast in [`Dependencies::resolve`] can only fail if a
//! handle is used with a graph it does not belong to.

mod builder;
mod graph;
mod handle;
mod sink;
mod task;

use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::core::Dynamic;

pub use crate::engine::builder::{NodeBinder, NodeDef};
pub use crate::engine::graph::{Graph, Reading, Status};
pub use crate::engine::handle::{Input, Node};
pub use crate::engine::sink::{ErrorSink, SinkEntry};

/// Things that can be used as a dependency.
pub trait Handle: Copy + Send + Sync + 'static {
    /// The value produced by the referenced node.
    type Value: Send + Sync + 'static;

    fn index(&self) -> NodeIndex;
}

pub(crate) fn downcast<T: Send + Sync + 'static>(output: &Dynamic) -> Arc<T> {
    Arc::clone(output)
        .downcast::<T>()
        .unwrap_or_else(|_| panic!("Expected {} but got something else", std::any::type_name::<T>()))
}

/// A trait that enables a collection of handles to be used as the
/// dependencies of a node.
pub trait Dependencies: Send + Sync + 'static {
    /// The resulting type when all dependencies are resolved.
    /// For a tuple of handles, this will be a tuple of `Arc<T>`s.
    type Output: Send + 'static;

    /// Returns the [`NodeIndex`] for each dependency, in declaration order.
    fn dependencies(&self) -> Vec<NodeIndex>;

    /// Takes the type-erased dependency outputs and resolves them into the
    /// concrete `Output` type.
    ///
    /// # Panics
    /// Panics if an output cannot be downcast to its expected type, which
    /// indicates a handle was used with a foreign graph.
    fn resolve(&self, outputs: &[Dynamic]) -> Self::Output;
}

impl Dependencies for () {
    type Output = ();

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![]
    }

    fn resolve(&self, _: &[Dynamic]) -> Self::Output {}
}

impl<H> Dependencies for H
where
    H: Handle,
{
    type Output = Arc<H::Value>;

    fn dependencies(&self) -> Vec<NodeIndex> {
        vec![self.index()]
    }

    fn resolve(&self, outputs: &[Dynamic]) -> Self::Output {
        downcast(&outputs[0])
    }
}

impl<H> Dependencies for Vec<H>
where
    H: Handle,
{
    type Output = Vec<Arc<H::Value>>;

    fn dependencies(&self) -> Vec<NodeIndex> {
        self.iter().map(|h| h.index()).collect()
    }

    fn resolve(&self, outputs: &[Dynamic]) -> Self::Output {
        outputs.iter().map(downcast).collect()
    }
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($($D,)*)
        where
            $($D: Handle),* {
            type Output = ($(Arc<$D::Value>,)*);

            fn dependencies(&self) -> Vec<NodeIndex> {
                let ($($D,)*) = self;
                vec![$($D.index(),)*]
            }

            fn resolve(&self, outputs: &[Dynamic]) -> Self::Output {
                let [$($D),*] = outputs else {
                    panic!("Expected {} dependency outputs but got {}", self.dependencies().len(), outputs.len());
                };
                ($(downcast::<$D::Value>($D),)*)
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
impl_deps!(A, B, C, D, E, F, G);
impl_deps!(A, B, C, D, E, F, G, H);
impl_deps!(A, B, C, D, E, F, G, H, I);
impl_deps!(A, B, C, D, E, F, G, H, I, J);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K);
impl_deps!(A, B, C, D, E, F, G, H, I, J, K, L);
