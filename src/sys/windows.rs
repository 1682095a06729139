//! Win32 pseudo console, pipes and process creation
//!
//! Thin safe wrappers around `CreatePseudoConsole`, `ResizePseudoConsole`,
//! `ClosePseudoConsole` and `CreateProcessW`. Every raw handle is moved into
//! an `OwnedHandle` as soon as the OS hands it over, so error paths release
//! whatever was created before the failure.

use std::ffi::c_void;
use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use std::time::Duration;

use windows_sys::Win32::Foundation::{
    FALSE, HANDLE, INVALID_HANDLE_VALUE, S_OK, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, HPCON,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, TerminateProcess, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, INFINITE,
    LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION, PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE,
    STARTF_USESTDHANDLES, STARTUPINFOEXW,
};

use crate::command::CommandBuilder;
use crate::error::{Error, Result};
use crate::size::ConsoleSize;

/// An open HPCON. Closed on drop.
#[derive(Debug)]
pub(crate) struct PseudoConsole {
    handle: HPCON,
}

impl PseudoConsole {
    /// Create a console and return it with the caller's pipe ends:
    /// the input write end and the output read end.
    pub(crate) fn create(size: ConsoleSize) -> Result<(Self, File, File)> {
        let (input_read, input_write) = anonymous_pipe().map_err(Error::CreatePipe)?;
        let (output_read, output_write) = anonymous_pipe().map_err(Error::CreatePipe)?;

        let mut handle: HPCON = 0;
        let hr = unsafe {
            CreatePseudoConsole(
                size.to_coord(),
                raw(&input_read),
                raw(&output_write),
                0,
                &mut handle,
            )
        };
        if hr != S_OK {
            return Err(Error::CreatePseudoConsole(hr));
        }

        // The console holds its own duplicates of these ends
        drop(input_read);
        drop(output_write);

        Ok((
            Self { handle },
            File::from(input_write),
            File::from(output_read),
        ))
    }

    pub(crate) fn resize(&self, size: ConsoleSize) -> Result<()> {
        let hr = unsafe { ResizePseudoConsole(self.handle, size.to_coord()) };
        if hr != S_OK {
            return Err(Error::ResizePseudoConsole(hr));
        }
        Ok(())
    }
}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        unsafe { ClosePseudoConsole(self.handle) };
    }
}

/// A process started on a pseudo console
#[derive(Debug)]
pub(crate) struct Process {
    handle: OwnedHandle,
    pid: u32,
}

impl Process {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for exit. `None` blocks indefinitely. Returns the exit code,
    /// or `None` if the timeout elapsed first.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<Option<u32>> {
        let millis = match timeout {
            None => INFINITE,
            Some(t) => u32::try_from(t.as_millis()).map_or(INFINITE - 1, |ms| ms.min(INFINITE - 1)),
        };

        match unsafe { WaitForSingleObject(raw(&self.handle), millis) } {
            WAIT_OBJECT_0 => self.exit_code().map(Some),
            WAIT_TIMEOUT => Ok(None),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(crate) fn terminate(&self, exit_code: u32) -> io::Result<()> {
        if unsafe { TerminateProcess(raw(&self.handle), exit_code) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn exit_code(&self) -> io::Result<u32> {
        let mut code = 0u32;
        if unsafe { GetExitCodeProcess(raw(&self.handle), &mut code) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(code)
    }
}

/// Start `cmd` attached to `console`
pub(crate) fn spawn(console: &PseudoConsole, cmd: &CommandBuilder) -> Result<Process> {
    let mut command_line = cmd.command_line()?;
    let environment = cmd.environment_block()?;
    let cwd = cmd.current_dir_wide()?;

    let attributes = AttributeList::with_pseudo_console(console.handle).map_err(Error::Spawn)?;

    let mut startup: STARTUPINFOEXW = unsafe { mem::zeroed() };
    startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
    // Null std handles so the child cannot pick up ours instead of the console
    startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
    startup.lpAttributeList = attributes.as_ptr();

    let mut flags = EXTENDED_STARTUPINFO_PRESENT;
    if environment.is_some() {
        flags |= CREATE_UNICODE_ENVIRONMENT;
    }

    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };
    let ok = unsafe {
        CreateProcessW(
            ptr::null(),
            command_line.as_mut_ptr(),
            ptr::null(),
            ptr::null(),
            FALSE,
            flags,
            environment
                .as_ref()
                .map_or(ptr::null(), |block| block.as_ptr() as *const c_void),
            cwd.as_ref().map_or(ptr::null(), |dir| dir.as_ptr()),
            &startup.StartupInfo,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(Error::Spawn(io::Error::last_os_error()));
    }

    // Only the process handle is kept
    drop(unsafe { OwnedHandle::from_raw_handle(info.hThread as RawHandle) });
    let handle = unsafe { OwnedHandle::from_raw_handle(info.hProcess as RawHandle) };

    Ok(Process {
        handle,
        pid: info.dwProcessId,
    })
}

/// A one-entry PROC_THREAD_ATTRIBUTE_LIST carrying the console handle
struct AttributeList {
    // usize storage keeps the list pointer-aligned
    buffer: Vec<usize>,
}

impl AttributeList {
    fn with_pseudo_console(console: HPCON) -> io::Result<Self> {
        let mut size = 0usize;
        // The sizing call always fails with ERROR_INSUFFICIENT_BUFFER
        unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), 1, 0, &mut size) };

        let mut buffer = vec![0usize; size.div_ceil(mem::size_of::<usize>())];
        let list = buffer.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST;
        if unsafe { InitializeProcThreadAttributeList(list, 1, 0, &mut size) } == 0 {
            return Err(io::Error::last_os_error());
        }
        let attributes = Self { buffer };

        // The attribute value is the HPCON itself, not a pointer to it
        let ok = unsafe {
            UpdateProcThreadAttribute(
                attributes.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                console as *const c_void,
                mem::size_of::<HPCON>(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(attributes)
    }

    fn as_ptr(&self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.buffer.as_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
    }
}

fn anonymous_pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let mut read: HANDLE = INVALID_HANDLE_VALUE;
    let mut write: HANDLE = INVALID_HANDLE_VALUE;
    if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    unsafe {
        Ok((
            OwnedHandle::from_raw_handle(read as RawHandle),
            OwnedHandle::from_raw_handle(write as RawHandle),
        ))
    }
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}
