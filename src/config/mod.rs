pub mod job;

pub use job::JobConfig;
