//! ConPTY Relay
//!
//! A small CLI that runs a command inside a pseudo console and relays the
//! host terminal's stdin/stdout to it. Used for exercising ConPTY without a
//! terminal UI.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use conpty::{Child, Config, ConsoleSize, PipeReader, PipeWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the host terminal size is checked while the child runs
const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// CLI arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "conpty-relay")]
#[command(version)]
#[command(about = "Run a command in a Windows pseudo console and relay stdin/stdout", long_about = None)]
struct CliArgs {
    /// Path to custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Program to run (default: %COMSPEC% or cmd.exe)
    #[arg(short, long, value_name = "SHELL")]
    shell: Option<String>,

    /// Initial console columns
    #[arg(long, value_name = "COLS")]
    cols: Option<u16>,

    /// Initial console rows
    #[arg(long, value_name = "ROWS")]
    rows: Option<u16>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Arguments passed to the program
    #[arg(last = true, value_name = "ARGS")]
    args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        },
    };

    if args.print_config {
        return match config.to_toml() {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            },
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::FAILURE
            },
        };
    }

    match run(&config) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        },
    }
}

/// Load configuration with precedence CLI > env > file > defaults
fn load_config(args: &CliArgs) -> conpty::Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;

    if let Some(shell) = &args.shell {
        config.shell = Some(shell.clone());
    }
    if !args.args.is_empty() {
        config.args = args.args.clone();
    }
    if let Some(cols) = args.cols {
        config.cols = cols;
    }
    if let Some(rows) = args.rows {
        config.rows = rows;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: &Config) -> conpty::Result<u32> {
    let cmd = config.command();
    let size = config.size();
    tracing::info!(
        "Starting {:?} in a {}x{} pseudo console",
        cmd.program(),
        size.cols,
        size.rows
    );

    let mut child = Child::spawn(&cmd, size)?;
    tracing::info!("Child PID: {}", child.pid());

    let output = child.pty().try_clone_output()?;
    let input = child.pty().try_clone_input()?;

    let _raw_guard = RawModeGuard::new();

    let output_thread = thread::spawn(move || pump_output(output));
    // Left detached: a blocking read on stdin cannot be interrupted
    thread::spawn(move || pump_input(input));

    let mut host_size = host_terminal_size();
    let status = loop {
        if let Some(status) = child.wait_timeout(RESIZE_POLL_INTERVAL)? {
            break status;
        }

        let current = host_terminal_size();
        if current != host_size {
            if let Some(new_size) = current {
                if let Err(e) = child.resize(new_size) {
                    tracing::warn!("Failed to resize console: {}", e);
                }
            }
            host_size = current;
        }
    };

    tracing::info!("Child exited with {}", status);

    // The output pipe reaches EOF only once the console is gone
    child.close_pty();
    let _ = output_thread.join();

    Ok(status.code())
}

fn pump_output(mut output: PipeReader) {
    let mut stdout = io::stdout();
    let mut buf = [0u8; 4096];

    loop {
        match output.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if stdout.write_all(&buf[..n]).is_err() {
                    break;
                }
                let _ = stdout.flush();
            },
            Err(e) => {
                tracing::debug!("Output pipe error: {}", e);
                break;
            },
        }
    }
}

fn pump_input(mut input: PipeWriter) {
    let mut stdin = io::stdin();
    let mut buf = [0u8; 1024];

    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break, // EOF
            Ok(n) => {
                if input.write_all(&buf[..n]).and_then(|_| input.flush()).is_err() {
                    break;
                }
            },
            Err(_) => break,
        }
    }
}

/// Current host terminal size, if stdout is a terminal
fn host_terminal_size() -> Option<ConsoleSize> {
    crossterm::terminal::size()
        .ok()
        .filter(|&(cols, rows)| cols > 0 && rows > 0)
        .map(ConsoleSize::from)
}

/// RAII guard for raw terminal mode
///
/// On Windows consoles the host also switches to VT input and output, so
/// navigation keys reach the child as escape sequences and the child's VT
/// output is rendered instead of printed.
struct RawModeGuard {
    #[cfg(windows)]
    _vt_modes: [Option<console_mode::SavedMode>; 2],
}

impl RawModeGuard {
    fn new() -> Option<Self> {
        // Saved before raw mode so the restore in Drop also undoes it
        #[cfg(windows)]
        let vt_modes = [
            console_mode::SavedMode::enable(console_mode::Stream::Input),
            console_mode::SavedMode::enable(console_mode::Stream::Output),
        ];

        match crossterm::terminal::enable_raw_mode() {
            Ok(()) => Some(Self {
                #[cfg(windows)]
                _vt_modes: vt_modes,
            }),
            Err(e) => {
                tracing::debug!("Not switching to raw mode: {}", e);
                None
            },
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

#[cfg(windows)]
mod console_mode {
    use std::io;

    use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, DISABLE_NEWLINE_AUTO_RETURN,
        ENABLE_VIRTUAL_TERMINAL_INPUT, ENABLE_VIRTUAL_TERMINAL_PROCESSING, STD_INPUT_HANDLE,
        STD_OUTPUT_HANDLE,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Stream {
        Input,
        Output,
    }

    impl Stream {
        /// Mode bits the relay needs on this stream
        pub fn vt_flags(self) -> CONSOLE_MODE {
            match self {
                Stream::Input => ENABLE_VIRTUAL_TERMINAL_INPUT,
                Stream::Output => ENABLE_VIRTUAL_TERMINAL_PROCESSING | DISABLE_NEWLINE_AUTO_RETURN,
            }
        }

        /// `mode` with the VT flags added and every other bit kept
        pub fn with_vt(self, mode: CONSOLE_MODE) -> CONSOLE_MODE {
            mode | self.vt_flags()
        }
    }

    /// A console handle and the mode it had before the relay changed it
    #[derive(Debug)]
    pub struct SavedMode {
        handle: HANDLE,
        mode: CONSOLE_MODE,
    }

    impl SavedMode {
        /// Switch `stream` to VT mode. `None` when it is not a console or the
        /// console refuses the mode.
        pub fn enable(stream: Stream) -> Option<Self> {
            let std_handle = match stream {
                Stream::Input => STD_INPUT_HANDLE,
                Stream::Output => STD_OUTPUT_HANDLE,
            };
            // SAFETY: GetStdHandle has no preconditions
            let handle = unsafe { GetStdHandle(std_handle) };
            if handle == 0 || handle == INVALID_HANDLE_VALUE {
                return None;
            }

            let mut mode: CONSOLE_MODE = 0;
            // SAFETY: handle is a std handle and mode is a valid out pointer
            if unsafe { GetConsoleMode(handle, &mut mode) } == 0 {
                return None;
            }
            // SAFETY: handle was accepted by GetConsoleMode above
            if unsafe { SetConsoleMode(handle, stream.with_vt(mode)) } == 0 {
                tracing::debug!(
                    "Console refused VT mode on {:?}: {}",
                    stream,
                    io::Error::last_os_error()
                );
                return None;
            }

            Some(Self { handle, mode })
        }
    }

    impl Drop for SavedMode {
        fn drop(&mut self) {
            // SAFETY: std handles stay open for the life of the process
            unsafe {
                SetConsoleMode(self.handle, self.mode);
            }
        }
    }
}
