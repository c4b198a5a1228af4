pub mod project_fs;

pub use project_fs::ProjectFs;
