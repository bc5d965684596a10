#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod core;
pub mod engine;
mod error;
mod gene_store;
pub mod model;
pub mod oql;
pub mod pipeline;
pub mod resolve;
pub mod service;
mod session;
#[cfg(feature = "logging")]
mod utils;

pub use crate::cache::{Cached, DiscreteCnaCache, MutationDataCache, RecordCache};
pub use crate::core::Settings;
pub use crate::engine::{Dependencies, ErrorSink, Graph, Handle, Input, Node, Reading, SinkEntry, Status};
pub use crate::error::{NodeError, ServiceError, SettingsError};
pub use crate::gene_store::{GeneStore, GeneStoreRegistry};
pub use crate::model::{AlterationRecord, AlterationType, SampleIdentifier, SampleSpec};
pub use crate::oql::{AlterationFilter, TokenFilter, default_oql_query};
pub use crate::pipeline::MergePolicy;
pub use crate::service::{DataService, MockDataService, Operation};
pub use crate::session::{QuerySession, SessionNodes};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
