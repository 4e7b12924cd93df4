//! Capturing the process standard streams through anonymous pipes.
//!
//! Redirection replaces the process-wide standard output and error handles with the write ends
//! of two pipes. A reader thread per pipe drains it into a buffer so a chatty guest never blocks
//! on a full pipe. The managed `Console` binds to the standard handles the first time it is
//! used, which is why redirection has to happen right after the runtime starts and before any
//! assembly runs. The redirection stays in place for the rest of the process.
//!
//! A redirection either installs both pipes or leaves the process as it found it: when any step
//! fails, the standard handles already replaced are put back and every pipe end created so far
//! is closed.
//!
//! After an invocation returns, a marker is written behind the guest's output on each pipe.
//! Pipes are ordered, so once the reader has appended the marker everything the guest wrote is
//! in the buffer as well.
//!
//! The operating system primitives sit behind [`StdPipes`], implemented over Win32 by the
//! Windows backend.

use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crate::{backend::CapturedOutput, Error, Result};

const READ_CHUNK: usize = 0x1000;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One of the two redirected standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

/// Operating system primitives the capture is built on.
pub(crate) trait StdPipes: Send + Sync + 'static {
    /// Handle to a standard stream target or a pipe end
    type Handle: Copy + Send + Sync + 'static;

    /// Returns the handle currently installed for `stream`.
    fn current(&self, stream: Stream) -> Result<Self::Handle>;

    /// Installs `handle` as the process-wide target of `stream`.
    fn install(&self, stream: Stream, handle: Self::Handle) -> Result<()>;

    /// Creates an anonymous pipe and returns its read and write ends.
    fn create_pipe(&self) -> Result<(Self::Handle, Self::Handle)>;

    /// Blocks until data is available. Returns 0 once every write end is closed.
    fn read(&self, handle: Self::Handle, buffer: &mut [u8]) -> usize;

    /// Writes all of `data` to `handle`.
    fn write(&self, handle: Self::Handle, data: &[u8]) -> Result<()>;

    /// Closes a handle returned by [`StdPipes::create_pipe`].
    fn close(&self, handle: Self::Handle);

    /// Starts the thread draining one pipe.
    fn spawn_reader(&self, reader: Box<dyn FnOnce() + Send>) -> Result<()> {
        spawn_thread(reader)
    }
}

pub(crate) fn spawn_thread(reader: Box<dyn FnOnce() + Send>) -> Result<()> {
    thread::Builder::new()
        .name("clr-output".into())
        .spawn(reader)
        .map(|_| ())
        .map_err(|error| Error::Redirect(format!("could not start reader thread - {error}")))
}

#[derive(Default)]
struct Sink {
    data: Mutex<Vec<u8>>,
    appended: Condvar,
}

struct Pipe<P: StdPipes> {
    stream: Stream,
    original: P::Handle,
    write: P::Handle,
    sink: Arc<Sink>,
}

impl<P: StdPipes> Pipe<P> {
    /// Routes `stream` into a new pipe; on failure nothing stays installed or open.
    fn install(pipes: &Arc<P>, stream: Stream) -> Result<Self> {
        let original = pipes.current(stream)?;
        let (read, write) = pipes.create_pipe()?;
        let sink = Arc::new(Sink::default());

        let reader = {
            let pipes = Arc::clone(pipes);
            let sink = Arc::clone(&sink);
            Box::new(move || drain(&*pipes, read, &sink))
        };
        if let Err(error) = pipes.spawn_reader(reader) {
            pipes.close(read);
            pipes.close(write);
            return Err(error);
        }

        if let Err(error) = pipes.install(stream, write) {
            // The reader sees end of file and closes the read end
            pipes.close(write);
            return Err(error);
        }

        Ok(Pipe {
            stream,
            original,
            write,
            sink,
        })
    }

    /// Puts the original stream target back and closes the write end.
    fn restore(self, pipes: &P) {
        if let Err(error) = pipes.install(self.stream, self.original) {
            tracing::warn!(stream = ?self.stream, %error, "could not restore standard stream");
        }
        pipes.close(self.write);
    }

    fn clear(&self) {
        lock!(self.sink.data).clear();
    }

    /// Returns everything written before `marker`, waiting for the reader to catch up.
    fn collect(&self, pipes: &P, marker: &[u8]) -> String {
        if let Err(error) = pipes.write(self.write, marker) {
            tracing::warn!(stream = ?self.stream, %error, "could not flush captured stream");
            return String::from_utf8_lossy(&std::mem::take(&mut *lock!(self.sink.data)))
                .into_owned();
        }

        let deadline = Instant::now() + FLUSH_TIMEOUT;
        let mut data = lock!(self.sink.data);
        let mut scanned = 0;
        loop {
            if let Some(offset) = data[scanned..]
                .windows(marker.len())
                .position(|window| window == marker)
            {
                let end = scanned + offset;
                let text = String::from_utf8_lossy(&data[..end]).into_owned();
                data.drain(..end + marker.len());
                return text;
            }
            scanned = data.len().saturating_sub(marker.len() - 1);

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(stream = ?self.stream, "captured stream was not flushed in time");
                return String::from_utf8_lossy(&std::mem::take(&mut *data)).into_owned();
            }
            data = self
                .sink
                .appended
                .wait_timeout(data, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

fn drain<P: StdPipes>(pipes: &P, read: P::Handle, sink: &Sink) {
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let count = pipes.read(read, &mut chunk);
        if count == 0 {
            break;
        }
        lock!(sink.data).extend_from_slice(&chunk[..count]);
        sink.appended.notify_all();
    }
    pipes.close(read);
}

struct Redirection<P: StdPipes> {
    stdout: Pipe<P>,
    stderr: Pipe<P>,
    flushes: u64,
}

/// Process-wide standard stream capture.
pub(crate) struct OutputCapture<P: StdPipes> {
    pipes: Arc<P>,
    redirection: Mutex<Option<Redirection<P>>>,
}

impl<P: StdPipes> OutputCapture<P> {
    pub(crate) fn new(pipes: P) -> Self {
        OutputCapture {
            pipes: Arc::new(pipes),
            redirection: Mutex::new(None),
        }
    }

    pub(crate) fn pipes(&self) -> &P {
        &self.pipes
    }

    pub(crate) fn is_redirected(&self) -> bool {
        lock!(self.redirection).is_some()
    }

    /// Redirects standard output and error; redirecting again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Redirect`] if either stream could not be redirected. Both streams then
    /// keep the targets they had before the call.
    pub(crate) fn redirect(&self) -> Result<()> {
        let mut redirection = lock!(self.redirection);
        if redirection.is_some() {
            return Ok(());
        }

        let stdout = Pipe::install(&self.pipes, Stream::Stdout)?;
        let stderr = match Pipe::install(&self.pipes, Stream::Stderr) {
            Ok(stderr) => stderr,
            Err(error) => {
                stdout.restore(&self.pipes);
                return Err(error);
            }
        };

        *redirection = Some(Redirection {
            stdout,
            stderr,
            flushes: 0,
        });
        Ok(())
    }

    /// Runs `invocation` and returns what it wrote to the redirected streams.
    ///
    /// Invocations are serialized, since the streams are shared by the whole process. Without
    /// an established redirection the capture is empty.
    pub(crate) fn capture<R>(&self, invocation: impl FnOnce() -> R) -> (R, CapturedOutput) {
        let mut redirection = lock!(self.redirection);
        let Some(redirection) = redirection.as_mut() else {
            return (invocation(), CapturedOutput::default());
        };

        redirection.stdout.clear();
        redirection.stderr.clear();

        let result = invocation();

        redirection.flushes += 1;
        let marker = format!("\0clr-output-{}\0", redirection.flushes);
        let stdout = redirection.stdout.collect(&self.pipes, marker.as_bytes());
        let stderr = redirection.stderr.collect(&self.pipes, marker.as_bytes());
        (result, CapturedOutput::new(stdout, stderr))
    }
}
