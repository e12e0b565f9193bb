pub mod application;
pub mod interaction;
