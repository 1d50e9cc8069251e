//! Bounded byte channel between the owner and its consumer thread

use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{self, Read, Write};
use tracing::debug;

/// Create a channel of `capacity` slots carrying at most `chunk_size` bytes each
pub(crate) fn byte_channel(capacity: usize, chunk_size: usize) -> (ChannelWriter, ChannelReader) {
    let (sender, receiver) = bounded(capacity.max(1));
    (
        ChannelWriter {
            sender: Some(sender),
            buffer: Vec::with_capacity(chunk_size),
            chunk_size: chunk_size.max(1),
            discarding: false,
        },
        ChannelReader {
            receiver,
            current: Vec::new(),
            position: 0,
        },
    )
}

/// Writing side. Blocks once every slot is taken. After the reader is gone
/// writes are discarded; the consumer's failure is reported on join.
pub(crate) struct ChannelWriter {
    sender: Option<Sender<Vec<u8>>>,
    buffer: Vec<u8>,
    chunk_size: usize,
    discarding: bool,
}

impl ChannelWriter {
    fn send_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.chunk_size));
        if self.discarding {
            return;
        }
        if let Some(sender) = &self.sender {
            if sender.send(chunk).is_err() {
                debug!("bridge consumer gone, discarding further output");
                self.discarding = true;
            }
        }
    }

    /// Flush pending bytes and signal end of stream
    pub(crate) fn finish(&mut self) {
        self.send_buffer();
        self.sender = None;
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.sender.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "bridge channel finished"));
        }
        let mut rest = buf;
        while !rest.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            self.buffer.extend_from_slice(now);
            rest = later;
            if self.buffer.len() == self.chunk_size {
                self.send_buffer();
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer();
        Ok(())
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Reading side; end of stream once the writer is finished and drained
pub(crate) struct ChannelReader {
    receiver: Receiver<Vec<u8>>,
    current: Vec<u8>,
    position: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.position == self.current.len() {
            match self.receiver.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.position = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = out.len().min(self.current.len() - self.position);
        out[..n].copy_from_slice(&self.current[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bytes_arrive_in_order_across_chunks() {
        let (mut writer, mut reader) = byte_channel(2, 3);
        let consumer = thread::spawn(move || {
            let mut received = Vec::new();
            reader.read_to_end(&mut received).unwrap();
            received
        });

        writer.write_all(b"abcdefgh").unwrap();
        writer.write_all(b"ij").unwrap();
        writer.finish();

        assert_eq!(consumer.join().unwrap(), b"abcdefghij");
    }

    #[test]
    fn test_writes_after_reader_dropped_are_discarded() {
        let (mut writer, reader) = byte_channel(1, 2);
        drop(reader);

        writer.write_all(b"lost bytes").unwrap();
        writer.flush().unwrap();
        writer.finish();
        assert!(writer.write_all(b"x").is_err());
    }
}
