#![allow(clippy::missing_docs_in_private_items)]

pub mod content;
pub mod engine;
pub mod index;
pub mod operation;

pub use content::ContentRecord;
pub use engine::WriteEngine;
pub use index::SecondaryIndex;
pub use operation::{Operation, OperationPayload};
