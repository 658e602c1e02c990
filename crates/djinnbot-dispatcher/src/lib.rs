//! Run Dispatcher (C3): creates runs, validates pipeline references,
//! publishes dispatch events, and reconciles run/step status from
//! `events:global`. Task-run bridging and planning post-processing live
//! here too since both are reconciler side-effects, not separate duties.

mod dispatcher;
mod error;
mod pipelines;
mod reconcile;

pub use dispatcher::RunDispatcher;
pub use error::DispatchError;
pub use pipelines::{FsPipelineRegistry, PipelineRegistry};
pub use reconcile::Reconciler;
