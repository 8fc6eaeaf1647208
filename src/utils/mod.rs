pub mod compression;
pub mod fs;
pub mod pattern;
pub mod progress;
