//! repomirror - mirror a CodeCommit repository's publish directory into S3

pub mod codecommit;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod git;
pub mod http;
pub mod mirror;
pub mod s3;
pub mod sign;

pub use config::Config;
pub use error::{MirrorError, Result};
pub use event::CodeCommitEvent;
pub use mirror::{InvocationState, Mirror, MirrorReport};
