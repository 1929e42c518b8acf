pub mod time_entry;

pub use time_entry::{TaskTotal, TimeEntry};
