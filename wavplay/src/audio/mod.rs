//! Audio output: buffer sizing, the output sink state machine, the platform
//! backends it drives and rate conversion for devices that need it.

pub mod backend;
pub mod buffer_policy;
pub mod resample;
pub mod sink;

pub use backend::{AudioBackend, BackendFactory};
pub use buffer_policy::{compute_buffer_bytes, BufferSizePolicy};
pub use sink::{
    ChannelLayout, OutputSink, PlaybackListener, SinkParams, SinkState, StreamMode, UsageClass,
};
