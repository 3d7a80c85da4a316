//! GPU frame-generation engine.
//!
//! Given two real frames of a host application, the engine runs a fixed
//! graph of roughly sixty compute dispatches — a mipmap pyramid, four
//! motion-analysis shaderchains and a final generate pass — to produce
//! M−1 interpolated frames between them. The compute shaders themselves
//! are proprietary and are pulled out of a Windows PE resource file at
//! startup, with one byte-level SPIR-V rewrite to pin the storage-image
//! format.
//!
//! The host hands over its source and destination images and a timeline
//! semaphore as opaque file descriptors; every generated frame shows up
//! as the next integer on that timeline. See [`Instance`] for the entry
//! point and [`FrameContext`] for the per-resolution session.

pub mod chains;
pub mod context;
pub mod error;
pub mod instance;
pub mod limits;
pub mod managed;
pub mod registry;
pub mod resources;

pub use context::{ContextParams, FrameContext};
pub use error::{Error, ErrorKind};
pub use framegen_common::DeviceInfo;
pub use instance::Instance;

#[cfg(feature = "leak-workaround")]
pub use instance::make_leaking;
