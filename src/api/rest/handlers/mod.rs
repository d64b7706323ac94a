pub mod apply;
pub mod packages;
pub mod sandboxes;
