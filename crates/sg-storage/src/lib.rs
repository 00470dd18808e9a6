//! sg-storage: Segmented sample storage
//!
//! Provides the sample store of an open file:
//! - Segments: individually locked runs of samples
//! - Channels: ordered segment lists with cheap insert/delete
//! - LockSet: deadlock-free locking of several segments
//! - Stream writers (append, insert, overwrite) and readers
//! - SignalStore: fixed-order multi-channel container

mod channel;
mod lock_set;
mod reader;
mod segment;
mod signal;
mod writer;

pub use channel::Channel;
pub use lock_set::LockSet;
pub use reader::ChannelReader;
pub use segment::{LockedSegment, Segment, SegmentBuffer, SegmentId};
pub use signal::{MultiChannelReader, MultiChannelWriter, SignalStore};
pub use writer::ChannelWriter;

pub use sg_core::{InsertMode, SAMPLE_MAX, SAMPLE_MIN, Sample, SgError, SgResult, StorageConfig};
