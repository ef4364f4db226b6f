//! # Signalflow
//!
//! A lazy, composable pipeline execution engine built around explicit
//! signals.
//!
//! Pipelines are cold descriptions: assembling operators performs no
//! work, and every `subscribe` call re-executes the chain from scratch.
//! Values, completion, and failure all travel as [`signal::Signal`]s
//! through a chain of subscribers, with support for:
//!
//! - **Single and multi-value pipelines**: [`single::Single`] resolves to
//!   at most one value, [`many::Many`] to an ordered stream
//! - **Composition**: `map`, `flat_map`, `then`, `defer`, `delay`, and
//!   multi-input [`zip`](zip::zip)
//! - **Error recovery**: resume, fallback-value, per-item continue,
//!   error mapping, and side-effect hooks
//! - **Retry**: bounded delayed resubscription driven by a
//!   [`retry::RetryPolicy`]
//! - **Execution contexts**: `subscribe_on`, `publish_on`, and
//!   rail-partitioned [`parallel`](many::Many::parallel) execution on
//!   [`scheduler::Scheduler`]s
//!
//! ## Quick Start
//!
//! ```rust
//! use signalflow::prelude::*;
//!
//! let pipeline = zip3(Single::just(1), Single::just(2), Single::just(3))
//!     .map(|(a, b, c)| a + b + c);
//!
//! // Nothing has run yet; subscribing triggers execution.
//! pipeline.subscribe_next(|sum| println!("total: {sum}"));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod errors;
pub mod many;
pub mod observability;
mod ops;
pub mod parallel;
pub mod retry;
pub mod scheduler;
pub mod signal;
pub mod single;
pub mod subscriber;
pub mod subscription;
pub mod testing;
pub mod zip;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::FlowError;
    pub use crate::many::Many;
    pub use crate::parallel::ParallelMany;
    pub use crate::retry::RetryPolicy;
    pub use crate::scheduler::Scheduler;
    pub use crate::signal::Signal;
    pub use crate::single::Single;
    pub use crate::subscriber::{LambdaSubscriber, Subscriber};
    pub use crate::subscription::Subscription;
    pub use crate::zip::{zip, zip3};
}
