use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::ShellError;

/// Where a command's standard output goes when it is redirected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub append: bool,
}

/// A fully resolved request to run one program.
///
/// Built once by the line parser and consumed once by the executor.
/// `args[0]` is the program name as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
    pub redir_in: Option<PathBuf>,
    pub redir_out: Option<OutputTarget>,
    pub background: bool,
}

impl CommandRequest {
    /// A foreground request with no redirections. `args[0]` is `program`.
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![program.to_string()];
        argv.extend(args.into_iter().map(Into::into));
        Self {
            program: program.to_string(),
            args: argv,
            redir_in: None,
            redir_out: None,
            background: false,
        }
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.redir_in = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.redir_out = Some(OutputTarget {
            path: path.into(),
            append,
        });
        self
    }

    pub fn in_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// The program and argument vector as C strings, ready for `execvp`.
    ///
    /// Built in the parent. A forked child only hands these to `execvp`.
    pub fn argv(&self) -> Result<(CString, Vec<CString>), ShellError> {
        let program = to_cstring(&self.program)?;
        let args = self
            .args
            .iter()
            .map(|a| to_cstring(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((program, args))
    }
}

fn to_cstring(s: &str) -> Result<CString, ShellError> {
    CString::new(s).map_err(|_| ShellError::InvalidArgument(s.to_string()))
}

/// A redirection target as a C string, converted in the parent like
/// [`CommandRequest::argv`].
pub fn path_cstring(path: &Path) -> Result<CString, ShellError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ShellError::InvalidArgument(path.display().to_string()))
}

/// What the line parser hands to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Single(CommandRequest),
    /// Two stages joined by an anonymous pipe. The second stage's
    /// `background` flag decides the disposition of the whole pipeline.
    Pipeline(CommandRequest, CommandRequest),
}

impl CommandLine {
    pub fn is_background(&self) -> bool {
        match self {
            CommandLine::Single(request) => request.background,
            CommandLine::Pipeline(_, second) => second.background,
        }
    }
}
