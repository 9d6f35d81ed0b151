pub mod email_import;
pub mod email_threads;
pub mod normalize;
pub mod participants;
pub mod thread_match;
pub mod timeline;

pub use email_import::ImportService;
