//! Notification hooks injected per stream
//!
//! `DataCallback` and `DrainCallback` run on the render thread and must
//! return promptly without blocking. `FreeCallback` runs from
//! `Engine::collect_garbage` on a normal thread.
//!
//! Closures with a matching signature implement each trait.

use super::stream::StreamId;

/// A stream's buffered audio fell below its low-water mark
pub trait DataCallback: Send + Sync {
    fn on_data_needed(&self, stream: StreamId, buffered_frames: usize);
}

/// A draining stream has played its last frame
pub trait DrainCallback: Send + Sync {
    fn on_drained(&self, stream: StreamId);
}

/// A freed stream has been removed from the engine
pub trait FreeCallback: Send + Sync {
    fn on_freed(&self, stream: StreamId);
}

/// Receives a stereo copy of stream audio as it is queued
///
/// Runs on the producer thread inside `Stream::add_data`.
pub trait VisualizationSink: Send + Sync {
    fn on_samples(&self, stream: StreamId, sample_rate: u32, stereo: &[f32]);
}

impl<F> DataCallback for F
where
    F: Fn(StreamId, usize) + Send + Sync,
{
    fn on_data_needed(&self, stream: StreamId, buffered_frames: usize) {
        self(stream, buffered_frames)
    }
}

impl<F> DrainCallback for F
where
    F: Fn(StreamId) + Send + Sync,
{
    fn on_drained(&self, stream: StreamId) {
        self(stream)
    }
}

impl<F> FreeCallback for F
where
    F: Fn(StreamId) + Send + Sync,
{
    fn on_freed(&self, stream: StreamId) {
        self(stream)
    }
}

impl<F> VisualizationSink for F
where
    F: Fn(StreamId, u32, &[f32]) + Send + Sync,
{
    fn on_samples(&self, stream: StreamId, sample_rate: u32, stereo: &[f32]) {
        self(stream, sample_rate, stereo)
    }
}
