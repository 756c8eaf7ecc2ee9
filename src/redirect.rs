//! Redirection manager: binds files onto the standard streams of the
//! current process. Only ever called inside a freshly forked child, so
//! nothing here allocates. Paths arrive already converted (a `&CStr`).

use std::os::unix::io::RawFd;

use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use nix::NixPath;

use crate::error::ShellError;

/// A descriptor that has been duplicated onto a standard stream.
///
/// The original descriptor is still open until [`release`] is called.
#[derive(Debug)]
pub struct Redirection {
    fd: RawFd,
    stream: RawFd,
}

/// Open `path` read-only and make it standard input.
pub fn open_for_input<P: ?Sized + NixPath>(path: &P) -> Result<Redirection, ShellError> {
    let fd = open(path, OFlag::O_RDONLY, Mode::empty()).map_err(ShellError::Io)?;
    bind(fd, STDIN_FILENO)
}

/// Open (creating if needed) `path` for writing and make it standard output.
///
/// Append mode writes at end of file. Without append the file is opened
/// without `O_TRUNC`: writes start at offset 0 and any older content past
/// the new length is kept.
pub fn open_for_output<P: ?Sized + NixPath>(
    path: &P,
    append: bool,
) -> Result<Redirection, ShellError> {
    let mut flags = OFlag::O_WRONLY | OFlag::O_CREAT;
    if append {
        flags |= OFlag::O_APPEND;
    }
    let mode = Mode::from_bits_truncate(0o644);
    let fd = open(path, flags, mode).map_err(ShellError::Io)?;
    bind(fd, STDOUT_FILENO)
}

/// Close the original descriptor of a redirection, if there is one.
///
/// `None` is a no-op. A descriptor that already is the stream it was bound
/// to is left open.
pub fn release(redirection: Option<Redirection>) {
    if let Some(r) = redirection {
        if r.fd != r.stream {
            let _ = close(r.fd);
        }
    }
}

fn bind(fd: RawFd, stream: RawFd) -> Result<Redirection, ShellError> {
    if fd != stream {
        if let Err(e) = dup2(fd, stream) {
            let _ = close(fd);
            return Err(ShellError::Io(e));
        }
    }
    Ok(Redirection { fd, stream })
}
