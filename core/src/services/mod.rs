pub mod fs;
pub mod settings;

pub use fs::LocalFileSystem;
pub use settings::JsonSettingsStore;
