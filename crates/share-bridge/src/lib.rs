//! Sharing host textures with other processes, and receiving theirs.
//!
//! Three roles sit on the same machinery:
//!
//! - [`SenderBridge`] publishes the host's output frames under a name.
//! - [`ReceiverBridge`] opens a named (or the first) published texture and
//!   draws it as a host source.
//! - [`FilterBridge`] renders a filter's parent into an intermediate
//!   texture and publishes that.
//!
//! The GPU device is shared between all bridges through a lazily opened,
//! reference-counted [`DeviceContext`]. Published names live in a
//! [`SharedRegistry`]. Frames are staged through a double-buffered
//! [`FrameStager`] so the copy into the shared texture never waits on the
//! frame currently being written.

pub mod adapters;
pub mod clock;
pub mod context;
pub mod error;
pub mod filter;
pub mod lifecycle;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod stager;

pub use adapters::{sender_choices, FilterAdapter, OutputAdapter, SenderChoice, SourceAdapter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{DeviceContext, DeviceLease};
pub use error::{BridgeError, RegistryError};
pub use filter::FilterBridge;
pub use lifecycle::{Bridge, BridgeLifecycle, HostGraphics};
pub use receiver::{DrawState, ReceiverBridge, ReceiverState, SenderSelection, Unresolved};
pub use registry::{SenderNames, SharedRegistry, SharedTextureHandle};
pub use sender::{FrameOutcome, SendFailurePolicy, SenderBridge, SenderPhase};
pub use stager::{stage_for_receive, FrameStager};

// Re-exported so hosts only need this crate.
pub use share_host;
pub use share_interop;
