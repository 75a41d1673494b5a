use std::{fs::File, io::BufWriter, path::Path};

use log::error;
use serde_jsonlines::JsonLinesWriter;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{TracksideError, transport::Frame};

/// Appends every frame received on `frame_receiver` to `file`, one JSON document per line,
/// until the sending side goes away. Blocking; run it on its own thread.
pub fn write_frames(
    file: &Path,
    mut frame_receiver: UnboundedReceiver<Frame>,
) -> Result<(), TracksideError> {
    let frame_file = File::create(file).map_err(|e| TracksideError::WriterError { source: e })?;
    let mut frame_writer = JsonLinesWriter::new(BufWriter::new(frame_file));
    while let Some(frame) = frame_receiver.blocking_recv() {
        // flushed per frame so a recording survives Ctrl-C
        let _ = frame_writer
            .write(&frame)
            .and_then(|_| frame_writer.flush())
            .map_err(|e| {
                error!("Error while writing frame to recording: {}", e);
            });
    }
    frame_writer
        .flush()
        .map_err(|e| TracksideError::WriterError { source: e })?;
    Ok(())
}
