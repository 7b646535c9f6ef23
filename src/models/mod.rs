pub mod carousel;
pub mod job;
pub mod post;
