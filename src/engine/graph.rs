use std::borrow::Cow;
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use tracing::{Instrument, Level};

use crate::core::{ArcStr, Dynamic};
use crate::engine::builder::NodeDef;
use crate::engine::handle::Input;
use crate::engine::sink::ErrorSink;
use crate::engine::task::Task;
use crate::engine::{Handle, downcast};
use crate::error::NodeError;

/// Completion signal of the resolution currently in flight for a node.
type InFlight = Shared<BoxFuture<'static, ()>>;

/// Type-erased equality used to decide whether a new value differs from the
/// previous one.
type Comparator = fn(&Dynamic, &Dynamic) -> bool;

pub(crate) fn same_as<T: PartialEq + 'static>(a: &Dynamic, b: &Dynamic) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Never read, or invalidated since the last resolution.
    Empty,
    /// A resolution is in flight.
    Pending,
    Resolved,
    Failed,
}

/// The current value of a node as seen by a consumer.
///
/// `Default` means "not yet available" even when the default happens to be
/// equal to what the node will eventually resolve to.
#[derive(Debug)]
pub enum Reading<T> {
    Resolved(Arc<T>),
    Default(Arc<T>),
    Unavailable,
}

impl<T> Reading<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Reading::Resolved(_))
    }

    /// The resolved value or the default, whichever is visible.
    pub fn value(&self) -> Option<&T> {
        match self {
            Reading::Resolved(value) | Reading::Default(value) => Some(value),
            Reading::Unavailable => None,
        }
    }

    pub fn into_value(self) -> Option<Arc<T>> {
        match self {
            Reading::Resolved(value) | Reading::Default(value) => Some(value),
            Reading::Unavailable => None,
        }
    }
}

enum Kind {
    Input,
    Derived(Arc<dyn Task>),
}

struct Slot {
    name: ArcStr,
    type_name: &'static str,
    kind: Kind,
    dependencies: Vec<NodeIndex>,
    status: Status,
    /// Visible value, only present while `Resolved`.
    value: Option<Dynamic>,
    /// Last successfully resolved value, kept across invalidation.
    previous: Option<Dynamic>,
    default: Option<Dynamic>,
    same: Comparator,
    /// Bumped whenever the resolved value changes.
    version: u64,
    /// Bumped whenever a resolution starts or the node is invalidated.
    epoch: u64,
    /// Dependency versions `previous` was computed from.
    seen: Option<Vec<u64>>,
    error: Option<NodeError>,
    in_flight: Option<InFlight>,
    resolutions: u64,
}

impl Slot {
    fn outcome(&self) -> Option<Result<Dynamic, NodeError>> {
        match (self.status, &self.value) {
            (Status::Resolved, Some(value)) => Some(Ok(value.clone())),
            (Status::Failed, _) => Some(Err(self.error.clone().unwrap_or_else(|| {
                NodeError::resolve(self.name.clone(), anyhow::anyhow!("failed without error"))
            }))),
            _ => None,
        }
    }

    fn is_derived(&self) -> bool {
        matches!(self.kind, Kind::Derived(_))
    }

    /// Hides the current value and supersedes any resolution in flight.
    fn reset(&mut self, force: bool) -> bool {
        if !self.is_derived() {
            return false;
        }

        let was_empty = self.status == Status::Empty;
        self.epoch += 1;
        self.status = Status::Empty;
        self.value = None;
        self.error = None;
        self.in_flight = None;

        if force {
            self.seen = None;
        }

        !was_empty
    }
}

/// The dependency graph.
///
/// `Graph` is cheap to clone; clones share the same nodes and error sink.
/// Every state change of a node happens under a single lock, so readers never
/// observe a half-written value.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<Mutex<DiGraph<Slot, ()>>>,
    sink: ErrorSink,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.len())
            .field("errors", &self.sink.len())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::with_sink(ErrorSink::default())
    }

    /// Creates a graph that routes unhandled failures to `sink`.
    pub fn with_sink(sink: ErrorSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DiGraph::new())),
            sink,
        }
    }

    pub fn sink(&self) -> &ErrorSink {
        &self.sink
    }

    pub fn len(&self) -> usize {
        self.lock().node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, DiGraph<Slot, ()>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The entry point for declaring a derived node.
    pub fn node(&self) -> NodeDef<'_> {
        NodeDef::new(self)
    }

    /// Adds a root input holding `value`.
    pub fn input<T>(&self, name: impl Into<Cow<'static, str>>, value: T) -> Input<T>
    where
        T: Send + Sync + PartialEq + 'static,
    {
        let name: Cow<'static, str> = name.into();
        let value: Dynamic = Arc::new(value);
        let index = self.lock().add_node(Slot {
            name: ArcStr::from(&*name),
            type_name: std::any::type_name::<T>(),
            kind: Kind::Input,
            dependencies: vec![],
            status: Status::Resolved,
            value: Some(value.clone()),
            previous: Some(value),
            default: None,
            same: same_as::<T>,
            version: 1,
            epoch: 0,
            seen: None,
            error: None,
            in_flight: None,
            resolutions: 0,
        });

        Input::new(index)
    }

    pub(crate) fn add_task<T>(
        &self,
        name: Cow<'static, str>,
        task: Arc<dyn Task>,
        default: Option<Dynamic>,
    ) -> NodeIndex
    where
        T: PartialEq + 'static,
    {
        let dependencies = task.dependencies();
        let mut graph = self.lock();

        let index = graph.add_node(Slot {
            name: ArcStr::from(&*name),
            type_name: std::any::type_name::<T>(),
            kind: Kind::Derived(task),
            dependencies: dependencies.clone(),
            status: Status::Empty,
            value: None,
            previous: None,
            default,
            same: same_as::<T>,
            version: 0,
            epoch: 0,
            seen: None,
            error: None,
            in_flight: None,
            resolutions: 0,
        });

        for dependency in dependencies {
            graph.add_edge(dependency, index, ());
        }

        index
    }

    /// Replaces the value of a root input.
    ///
    /// If the new value differs from the current one, every node downstream
    /// of the input is invalidated. Returns whether anything changed.
    pub fn set<T>(&self, input: Input<T>, value: T) -> bool
    where
        T: Send + Sync + PartialEq + 'static,
    {
        let mut graph = self.lock();
        let value: Dynamic = Arc::new(value);

        let slot = &mut graph[input.index];
        if let Some(current) = &slot.value
            && (slot.same)(current, &value)
        {
            tracing::debug!(input = %slot.name, "input unchanged");
            return false;
        }

        slot.value = Some(value.clone());
        slot.previous = Some(value);
        slot.version += 1;
        let name = slot.name.clone();

        let count = invalidate_from(&mut graph, input.index, false);
        tracing::info!(input = %name, invalidated = count, "root input changed");

        true
    }

    /// Invalidates a node and everything downstream of it. The node itself
    /// is re-resolved on its next read even if its dependencies are unchanged.
    /// For an input, its direct dependents are re-resolved instead; nodes
    /// further downstream are only re-resolved if those produce new values.
    pub fn invalidate<H: Handle>(&self, handle: H) {
        let mut graph = self.lock();
        let count = invalidate_from(&mut graph, handle.index(), true);
        tracing::info!(node = %graph[handle.index()].name, invalidated = count, "node invalidated");
    }

    /// Reads the current value of a node.
    ///
    /// Reading an [`Status::Empty`] node from within a tokio runtime starts its
    /// resolution in the background, so the node becomes
    /// [`Status::Pending`].
    pub fn read<H: Handle>(&self, handle: H) -> Reading<H::Value> {
        let index = handle.index();
        let mut graph = self.lock();
        let slot = &mut graph[index];

        if slot.status == Status::Empty
            && slot.is_derived()
            && tokio::runtime::Handle::try_current().is_ok()
        {
            let _ = self.begin(slot, index);
        }

        match (slot.status, &slot.value, &slot.default) {
            (Status::Resolved, Some(value), _) => Reading::Resolved(downcast(value)),
            (_, _, Some(default)) => Reading::Default(downcast(default)),
            _ => Reading::Unavailable,
        }
    }

    /// The resolved value, or the default while unavailable.
    pub fn get<H: Handle>(&self, handle: H) -> Option<Arc<H::Value>> {
        self.read(handle).into_value()
    }

    pub fn status<H: Handle>(&self, handle: H) -> Status {
        self.lock()[handle.index()].status
    }

    pub fn is_pending<H: Handle>(&self, handle: H) -> bool {
        self.status(handle) == Status::Pending
    }

    /// The failure of the node's latest resolution, if any.
    pub fn error<H: Handle>(&self, handle: H) -> Option<NodeError> {
        self.lock()[handle.index()].error.clone()
    }

    /// How many times the node's resolution function has been invoked.
    pub fn resolutions<H: Handle>(&self, handle: H) -> u64 {
        self.lock()[handle.index()].resolutions
    }

    /// Name of the node, as given when it was declared.
    pub fn name<H: Handle>(&self, handle: H) -> String {
        self.lock()[handle.index()].name.to_string()
    }

    /// Drives the node to completion and returns its value.
    ///
    /// Concurrent calls for the same node share a single resolution.
    pub async fn resolve<H: Handle>(&self, handle: H) -> Result<Arc<H::Value>, NodeError> {
        let output = self.resolve_index(handle.index()).await?;
        Ok(downcast(&output))
    }

    fn resolve_index(&self, index: NodeIndex) -> BoxFuture<'static, Result<Dynamic, NodeError>> {
        let graph = self.clone();

        Box::pin(async move {
            // A resolution can be superseded by an invalidation while we wait,
            // in which case we join the newer one.
            loop {
                let in_flight = {
                    let mut inner = graph.lock();
                    let slot = &mut inner[index];

                    if let Some(outcome) = slot.outcome() {
                        return outcome;
                    }

                    match &slot.in_flight {
                        Some(in_flight) => in_flight.clone(),
                        None => graph.begin(slot, index),
                    }
                };

                in_flight.await;
            }
        })
    }

    /// Marks the node as pending and creates its resolution cycle.
    fn begin(&self, slot: &mut Slot, index: NodeIndex) -> InFlight {
        slot.epoch += 1;
        slot.status = Status::Pending;
        slot.error = None;

        let cycle = self.clone().cycle(index, slot.epoch).boxed().shared();
        slot.in_flight = Some(cycle.clone());

        // Once started, a resolution runs to completion even if every reader
        // stops waiting for it.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(cycle.clone());
        }

        cycle
    }

    async fn cycle(self, index: NodeIndex, epoch: u64) {
        let (name, task, dependencies) = {
            let graph = self.lock();
            let slot = &graph[index];
            match &slot.kind {
                Kind::Derived(task) => (slot.name.clone(), task.clone(), slot.dependencies.clone()),
                Kind::Input => return,
            }
        };

        let results = join_all(
            dependencies
                .iter()
                .map(|&dependency| self.resolve_index(dependency)),
        )
        .await;

        let mut outputs = Vec::with_capacity(results.len());
        for (&dependency, result) in dependencies.iter().zip(results) {
            match result {
                Ok(output) => outputs.push(output),
                Err(_) => {
                    self.fail_upstream(index, epoch, dependency);
                    return;
                }
            }
        }

        let versions = {
            let mut graph = self.lock();
            let versions: Vec<u64> = dependencies.iter().map(|&d| graph[d].version).collect();

            let slot = &mut graph[index];
            if slot.epoch != epoch {
                return;
            }

            if slot.seen.as_ref() == Some(&versions)
                && let Some(previous) = slot.previous.clone()
            {
                slot.value = Some(previous);
                slot.status = Status::Resolved;
                slot.in_flight = None;
                tracing::debug!(node = %name, "dependencies unchanged, reusing previous value");
                return;
            }

            slot.resolutions += 1;
            versions
        };

        let span = tracing::span!(Level::DEBUG, "node", name = %name);
        let result = task.execute(&outputs).instrument(span).await;

        self.commit(index, epoch, versions, result);
    }

    fn fail_upstream(&self, index: NodeIndex, epoch: u64, dependency: NodeIndex) {
        let mut graph = self.lock();
        let dependency = graph[dependency].name.clone();

        let slot = &mut graph[index];
        if slot.epoch != epoch {
            return;
        }

        let error = NodeError::Upstream {
            node: slot.name.clone(),
            dependency,
        };

        tracing::debug!(%error, "dependency failed");
        slot.status = Status::Failed;
        slot.value = None;
        slot.in_flight = None;
        slot.seen = None;
        slot.error = Some(error);
    }

    fn commit(
        &self,
        index: NodeIndex,
        epoch: u64,
        versions: Vec<u64>,
        result: anyhow::Result<Dynamic>,
    ) {
        let (name, task, outcome) = {
            let mut graph = self.lock();
            let slot = &mut graph[index];

            if slot.epoch != epoch {
                tracing::debug!(node = %slot.name, "discarding superseded resolution");
                return;
            }

            let task = match &slot.kind {
                Kind::Derived(task) => task.clone(),
                Kind::Input => return,
            };

            slot.in_flight = None;

            let outcome = match result {
                Ok(output) => {
                    let output = match &slot.previous {
                        Some(previous) if (slot.same)(previous, &output) => previous.clone(),
                        _ => {
                            slot.version += 1;
                            output
                        }
                    };

                    slot.status = Status::Resolved;
                    slot.value = Some(output.clone());
                    slot.previous = Some(output.clone());
                    slot.seen = Some(versions);
                    slot.error = None;
                    Ok(output)
                }
                Err(cause) => {
                    let error = NodeError::resolve(slot.name.clone(), cause);
                    slot.status = Status::Failed;
                    slot.value = None;
                    slot.seen = None;
                    slot.error = Some(error.clone());
                    Err(error)
                }
            };

            (slot.name.clone(), task, outcome)
        };

        // Hooks run outside the lock, they are free to read the graph.
        match outcome {
            Ok(output) => {
                tracing::debug!(node = %name, "resolved");
                task.on_result(&output);
            }
            Err(error) => {
                if task.on_error(&error) {
                    tracing::warn!(%error, "failure handled by node");
                } else {
                    tracing::error!(%error, "node failed");
                    self.sink.push(name, error);
                }
            }
        }
    }

    /// Renders the graph as a Mermaid diagram annotated with node status.
    pub fn render_mermaid(&self) -> String {
        let graph = self.lock();
        let mut f = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(f, "graph LR");

        for index in graph.node_indices() {
            let slot = &graph[index];
            let name = slot.name.replace('"', "\\\"");
            let _ = writeln!(f, "    {}[\"{}\\n{:?}\"]", index.index(), name, slot.status);
        }

        for edge in graph.edge_indices() {
            if let Some((source, target)) = graph.edge_endpoints(edge) {
                let type_name = graph[source]
                    .type_name
                    .replace('<', "&lt;")
                    .replace('>', "&gt;");
                let _ = writeln!(
                    f,
                    "    {} -- \"{}\" --> {}",
                    source.index(),
                    type_name,
                    target.index()
                );
            }
        }

        f
    }
}

/// Resets every node reachable from `start`. Returns how many nodes lost a
/// visible value or an in-flight resolution.
fn invalidate_from(graph: &mut DiGraph<Slot, ()>, start: NodeIndex, include_start: bool) -> usize {
    // An invalidated input keeps its version, so its direct dependents are
    // the ones forced to re-run.
    let forced: Vec<NodeIndex> = match (include_start, graph[start].is_derived()) {
        (false, _) => vec![],
        (true, true) => vec![start],
        (true, false) => graph.neighbors(start).collect(),
    };

    let mut dfs = Dfs::new(&*graph, start);
    let mut count = 0;

    while let Some(index) = dfs.next(&*graph) {
        if index == start && !include_start {
            continue;
        }

        if graph[index].reset(forced.contains(&index)) {
            count += 1;
        }
    }

    count
}
