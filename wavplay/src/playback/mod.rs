//! Playback: chunked PCM transfer, the post-playback grace wait and the
//! session that ties decode, buffer sizing and the output sink together.

pub mod grace;
pub mod pump;
pub mod session;

pub use grace::{GraceOutcome, GraceSignal};
pub use pump::{pump, pump_path, PumpEnd, PumpOutcome, DEFAULT_CHUNK_SIZE};
pub use session::PlaybackSession;
