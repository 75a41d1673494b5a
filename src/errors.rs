// Error types for trackside

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum TracksideError {
    // Errors for the race-control transport
    #[snafu(display("Invalid race control URL: {url}"))]
    InvalidServerUrl { url: String },

    // Errors for the frame recorder and replay
    #[snafu(display("Error writing frame recording"))]
    WriterError { source: io::Error },
    #[snafu(display("Invalid recording file: {path}"))]
    InvalidRecordingFile { path: String },
    #[snafu(display("Error loading recording file"))]
    RecordingLoaderError { source: io::Error },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error reading or writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // Runtime errors
    #[snafu(display("Could not start async runtime"))]
    RuntimeError { source: io::Error },
}
