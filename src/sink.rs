use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::Result;

pub type SaveFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Persists a completed tracking session. Supplied by the host; may fail.
pub trait TimeSink: Send + Sync {
    fn save_time<'a>(&'a self, task_id: &'a str, elapsed_secs: u64, notes: &'a str)
        -> SaveFuture<'a>;
}

pub struct SaveFn<F>(F);

/// Wraps an async closure `(task_id, elapsed_secs, notes)` as a [`TimeSink`].
pub fn save_fn<F, Fut>(f: F) -> Arc<dyn TimeSink>
where
    F: Fn(String, u64, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(SaveFn(f))
}

impl<F, Fut> TimeSink for SaveFn<F>
where
    F: Fn(String, u64, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn save_time<'a>(
        &'a self,
        task_id: &'a str,
        elapsed_secs: u64,
        notes: &'a str,
    ) -> SaveFuture<'a> {
        Box::pin((self.0)(task_id.to_string(), elapsed_secs, notes.to_string()))
    }
}
