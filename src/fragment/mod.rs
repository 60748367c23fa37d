//! Frame primitives for transparent message splitting.
//!
//! This module collects the types used by the splitting and re-assembly
//! layer. Each sub-module focuses on a single concept to keep the code small
//! and easy to audit while still providing a cohesive API at the crate root.

pub mod config;
pub mod error;
pub mod frame;
pub mod id;
pub mod index;
pub mod reassembler;
pub mod splitter;
mod state;

pub use config::{FragmentationConfig, frame_overhead};
pub use error::{ReassemblyError, SplitError};
pub use frame::{Frame, FrameKind};
pub use id::MessageId;
pub use index::Sequence;
pub use reassembler::{ReassembledMessage, Reassembler};
pub use splitter::{FrameBatch, Splitter};
