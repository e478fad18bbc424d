pub mod status;
pub mod watcher;
