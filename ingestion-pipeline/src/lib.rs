#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod handler;
pub mod handlers;
pub mod orchestrator;
pub mod registry;

pub use handler::{Handler, HandlerContext};
pub use orchestrator::{DistributedOrchestrator, InProcessOrchestrator};
pub use registry::HandlerRegistry;
