//! Storage layout and settings

pub mod layout;
pub mod settings;

pub use layout::StorageLayout;
pub use settings::Settings;
