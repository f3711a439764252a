// Logs module - Sinks for supervised process output

mod ring;
mod sink;
mod writer;

pub use ring::{LogEntry, RingSink};
pub use sink::{LogSink, Severity, TracingSink};
pub use writer::FileSink;
