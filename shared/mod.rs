pub mod files;
pub mod tables;
