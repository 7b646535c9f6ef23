pub mod ai;
pub mod extract;
pub mod generators;
pub mod image_codec;
pub mod mock;
pub mod prompts;
pub mod queue;
pub mod storage;
pub mod submission;
