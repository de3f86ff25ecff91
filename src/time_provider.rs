use chrono::{Local, NaiveDateTime};

/// Source of local wall-clock time for the tick loop.
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> NaiveDateTime;
    fn label(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTimeProvider;

impl TimeProvider for LocalTimeProvider {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn label(&self) -> &'static str {
        "LOCAL_WALL_CLOCK"
    }
}
