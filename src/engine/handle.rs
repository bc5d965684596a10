use std::marker::PhantomData;

use petgraph::graph::NodeIndex;

use crate::engine::Handle;

/// A type-safe reference to a derived node in the graph.
///
/// A `Node<T>` is a lightweight, copyable token that represents the eventual
/// value of type `T`. It is used to declare dependencies between nodes and to
/// read results through the owning [`Graph`](crate::Graph).
///
/// # Diamond dependencies
///
/// If nodes B and C both depend on node A, and D depends on both B and C, A is
/// resolved only *once* per resolution cycle and its value is shared.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Node<T> {
    pub(crate) index: NodeIndex,
    _phantom: PhantomData<T>,
}

impl<T> Node<T> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the node in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<T> Clone for Node<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Node<T> {}

impl<T> Handle for Node<T>
where
    T: Send + Sync + 'static,
{
    type Value = T;

    fn index(&self) -> NodeIndex {
        self.index
    }
}

/// A type-safe reference to a root input of the graph.
///
/// Inputs are always resolved. Replacing an input's value with
/// [`Graph::set`](crate::Graph::set) invalidates every node downstream of it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Input<T> {
    pub(crate) index: NodeIndex,
    _phantom: PhantomData<T>,
}

impl<T> Input<T> {
    pub(crate) fn new(index: NodeIndex) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the underlying `NodeIndex` of the input in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Input<T> {}

impl<T> Handle for Input<T>
where
    T: Send + Sync + 'static,
{
    type Value = T;

    fn index(&self) -> NodeIndex {
        self.index
    }
}
