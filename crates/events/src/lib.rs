//! Progress events streamed to a grid run's subscriber.
//!
//! - [`GridEvent`]: the JSON messages a client receives while a run is
//!   in progress, ending with exactly one terminal event.
//! - [`RunStatus`]: status snapshot included in `status` events.
//! - [`ProgressSink`]: where a run sends its events; [`ChannelSink`]
//!   forwards them over a `tokio::sync::mpsc` channel.

pub mod event;
pub mod sink;

pub use event::{GridEvent, RunPhase, RunStatus};
pub use sink::{ChannelSink, ProgressSink, SinkError};
