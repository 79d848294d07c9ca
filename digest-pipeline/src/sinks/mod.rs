pub mod local_file;
pub mod webhook;

pub use local_file::LocalFileSink;
pub use webhook::WebhookSink;
