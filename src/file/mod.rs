pub mod metadata;
pub mod naming;
pub mod save;
