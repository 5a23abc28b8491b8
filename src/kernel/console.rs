use std::{collections::VecDeque, sync::Arc};

use spin::Mutex;

/// The byte streams behind descriptors 0 and 1.
pub trait Console: Send {
    /// Reads available input into `buf`, returning the number of bytes read.
    /// Returns 0 when no input is pending.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Writes `buf` to the output, returning the number of bytes written.
    fn write(&mut self, buf: &[u8]) -> usize;
}

#[derive(Debug, Default)]
struct Buffers {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// An in-memory console.
/// Clones share the same buffers, so a clone kept outside the kernel can feed input and inspect
/// output.
#[derive(Debug, Clone, Default)]
pub struct BufferConsole {
    buffers: Arc<Mutex<Buffers>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes to be read from stdin.
    pub fn push_input(&self, bytes: &[u8]) {
        self.buffers.lock().input.extend(bytes);
    }

    /// Takes everything written to stdout so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.buffers.lock().output)
    }
}

impl Console for BufferConsole {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut buffers = self.buffers.lock();
        let count = buf.len().min(buffers.input.len());
        for (dst, src) in buf.iter_mut().zip(buffers.input.drain(..count)) {
            *dst = src;
        }
        count
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.buffers.lock().output.extend_from_slice(buf);
        buf.len()
    }
}
