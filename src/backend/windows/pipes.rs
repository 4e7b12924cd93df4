//! Win32 standard handles and anonymous pipes.

use std::{ffi::c_void, ptr};

use super::ffi::{
    CloseHandle, CreatePipe, GetLastError, GetStdHandle, ReadFile, SetStdHandle, WriteFile,
    HANDLE, INVALID_HANDLE_VALUE, STD_ERROR_HANDLE, STD_OUTPUT_HANDLE,
};
use crate::{
    backend::capture::{StdPipes, Stream},
    Error, Result,
};

const PIPE_SIZE: u32 = 0x10000;

#[derive(Clone, Copy)]
pub struct RawHandle(HANDLE);

// SAFETY: standard handles and pipe ends are kernel object handles, usable from any thread.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

fn std_handle(stream: Stream) -> u32 {
    match stream {
        Stream::Stdout => STD_OUTPUT_HANDLE,
        Stream::Stderr => STD_ERROR_HANDLE,
    }
}

fn last_error(call: &str) -> Error {
    // SAFETY: GetLastError has no preconditions
    Error::Redirect(format!("{call} failed - error code {}", unsafe { GetLastError() }))
}

/// The process standard handles and kernel pipes.
pub struct Win32Pipes;

impl StdPipes for Win32Pipes {
    type Handle = RawHandle;

    fn current(&self, stream: Stream) -> Result<RawHandle> {
        // SAFETY: GetStdHandle only reads the process parameter block
        let handle = unsafe { GetStdHandle(std_handle(stream)) };
        if handle == INVALID_HANDLE_VALUE {
            return Err(last_error("GetStdHandle"));
        }
        // A process without a console has null standard handles; restoring null is valid.
        Ok(RawHandle(handle))
    }

    fn install(&self, stream: Stream, handle: RawHandle) -> Result<()> {
        // SAFETY: handle is either a saved standard handle or an open pipe end
        if unsafe { SetStdHandle(std_handle(stream), handle.0) } == 0 {
            return Err(last_error("SetStdHandle"));
        }
        Ok(())
    }

    fn create_pipe(&self) -> Result<(RawHandle, RawHandle)> {
        let mut read = ptr::null_mut();
        let mut write = ptr::null_mut();
        // SAFETY: both out pointers are valid for writes
        if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), PIPE_SIZE) } == 0 {
            return Err(last_error("CreatePipe"));
        }
        Ok((RawHandle(read), RawHandle(write)))
    }

    fn read(&self, handle: RawHandle, buffer: &mut [u8]) -> usize {
        let mut read = 0;
        // SAFETY: buffer is valid for its length and read for one u32
        let ok = unsafe {
            ReadFile(
                handle.0,
                buffer.as_mut_ptr() as *mut c_void,
                buffer.len() as u32,
                &mut read,
                ptr::null_mut(),
            )
        };
        // A broken pipe means every write end is closed
        if ok == 0 {
            0
        } else {
            read as usize
        }
    }

    fn write(&self, handle: RawHandle, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let mut written = 0;
            // SAFETY: rest is valid for its length and written for one u32
            let ok = unsafe {
                WriteFile(
                    handle.0,
                    rest.as_ptr() as *const c_void,
                    rest.len() as u32,
                    &mut written,
                    ptr::null_mut(),
                )
            };
            if ok == 0 || written == 0 {
                return Err(last_error("WriteFile"));
            }
            rest = &rest[written as usize..];
        }
        Ok(())
    }

    fn close(&self, handle: RawHandle) {
        // SAFETY: every pipe end is closed exactly once, by its single owner
        unsafe {
            CloseHandle(handle.0);
        }
    }
}
