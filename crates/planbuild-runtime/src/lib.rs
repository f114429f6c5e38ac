//! planbuild runtime
//!
//! Runs a plan's file builds: parallel across paths, strictly serial and
//! in submission order within a path.
//!
//! - [`PlanRegistry`]: one [`PlanRuntime`] actor per (plan, branch)
//! - [`Dispatcher`]: enqueue-then-claim, at most one pipeline per path
//! - [`EditPipeline`]: baseline, edit service call, persist, drain queue
//! - [`PlanBuilder`]: the build entrypoint
//!
//! # Example
//!
//! ```rust,ignore
//! use planbuild_runtime::{PlanBuilder, PlanRegistry};
//!
//! let builder = PlanBuilder::new(Arc::new(PlanRegistry::default()), store, service);
//! let started = builder.build(&plan, &auth).await?;
//! builder.wait_all(&plan).await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod build;
pub mod dispatch;
pub mod memory;
pub mod pipeline;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod stream;

// Re-exports
pub use build::PlanBuilder;
pub use dispatch::Dispatcher;
pub use memory::{MemoryPlanStore, StaticEditService, StatusChange};
pub use pipeline::{BuildContext, ComputedEdit, EditPipeline, FileBuildState, Stage};
pub use registry::PlanRegistry;
pub use runtime::{DispatchSignal, PlanCommand, PlanRuntime, UpdateFn};
pub use state::{ActivePlanState, EnqueueAck};
pub use stream::{consume_edit_stream, parse_replacements, ConsumedEdit};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
