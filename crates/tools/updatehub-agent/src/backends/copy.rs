use std::io::{self, Read, SeekFrom};
use std::time::Instant;

use flume::Receiver;
use tracing::debug;
use xz2::read::XzDecoder;

use super::{CopyBackend, CopyOptions, CopyTarget};
use crate::error::CopyError;

/// Copies in chunks, checking for cancellation and the timeout between chunks.
///
/// A blocking read is not interrupted. Sources are expected to fail reads with
/// [`io::ErrorKind::TimedOut`] on their own, which is reported as a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedCopy;

impl CopyBackend for ChunkedCopy {
    fn copy(
        &self,
        dst: &mut dyn CopyTarget,
        src: &mut dyn Read,
        options: &CopyOptions,
        cancel: &Receiver<()>,
    ) -> Result<bool, CopyError> {
        let started = Instant::now();
        let chunk_size = options.chunk_size.max(1);
        let mut src: Box<dyn Read + '_> = if options.compressed {
            Box::new(XzDecoder::new(src))
        } else {
            Box::new(src)
        };
        if options.skip > 0 {
            let offset = options.skip.saturating_mul(chunk_size as u64);
            dst.seek(SeekFrom::Current(offset as i64))?;
        }
        let mut buffer = vec![0; chunk_size];
        let mut chunks = 0;
        loop {
            if cancel.try_recv().is_ok() {
                debug!("copy cancelled after {chunks} chunks");
                return Ok(true);
            }
            if started.elapsed() >= options.timeout {
                return Err(CopyError::Timeout(options.timeout));
            }
            if options.count.is_some_and(|count| chunks >= count) {
                break;
            }
            let read = read_chunk(&mut src, &mut buffer).map_err(|error| {
                if error.kind() == io::ErrorKind::TimedOut {
                    CopyError::Timeout(options.timeout)
                } else {
                    CopyError::Io(error)
                }
            })?;
            if read == 0 {
                break;
            }
            dst.write_all(&buffer[..read])?;
            chunks += 1;
        }
        dst.flush()?;
        Ok(false)
    }
}

/// Fill the buffer unless the end of the source is reached first.
fn read_chunk(src: &mut dyn Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match src.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}
