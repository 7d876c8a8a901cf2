mod service;

pub use service::{DailyWindow, ReadingStore};
