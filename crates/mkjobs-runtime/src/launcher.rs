//! Executable resolution and process launch
//!
//! The first argument is resolved to an image on disk: names with a path
//! component directly, bare names through the search path and then the
//! current directory, trying the executable suffix before the bare name
//! each time. Only regular files with an execute bit count as resolved.
//! Images starting with a native header or an interpreter line (`#!`) are
//! executed directly; any other resolved file is run as a script through
//! the shell. A name that cannot be resolved at
//! all is handed to the shell as well, which reports "not found" and exits
//! with 127 the same way it would for an interactive command.

use crate::affinity::{configure_child, CpuMask};
use crate::handle::ProcessHandle;
use mkjobs_core::{kdebug, kerror, quote_args, CommandLine, EnvBlock, LaunchError, QuoteDialect};
use std::ffi::OsString;
use std::fs::File;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

/// Script wrapper used when the command cannot be resolved
const EXEC_WRAPPER: &str = "exec \"$0\" \"$@\"";

/// Leading bytes of images the kernel loader runs itself
const NATIVE_MAGIC: &[&[u8]] = &[
    b"#!",
    b"\x7fELF",
    b"MZ",
    &[0xfe, 0xed, 0xfa, 0xce],
    &[0xfe, 0xed, 0xfa, 0xcf],
    &[0xce, 0xfa, 0xed, 0xfe],
    &[0xcf, 0xfa, 0xed, 0xfe],
    &[0xca, 0xfe, 0xba, 0xbe],
];

static SHELL_REPORTED: AtomicBool = AtomicBool::new(false);

/// Launch options shared by all workers
#[derive(Debug, Clone, Default)]
pub struct LaunchSettings {
    pub exe_suffix: String,
    pub child_nice: Option<i32>,
}

/// Outcome of resolving a command name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Native(PathBuf),
    Script(PathBuf),
    NotFound,
}

/// What will actually be executed for a job
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub image: PathBuf,
    pub argv: Vec<String>,
    pub via_shell: bool,
    pub command_line: CommandLine,
}

pub fn has_path_component(name: &str) -> bool {
    name.contains('/')
}

pub fn is_native_header(head: &[u8]) -> bool {
    NATIVE_MAGIC.iter().any(|magic| head.starts_with(magic))
}

fn probe(path: &Path) -> Option<Resolution> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
        return None;
    }
    let mut head = [0u8; 4];
    let mut read = 0;
    if let Ok(mut file) = File::open(path) {
        while read < head.len() {
            match file.read(&mut head[read..]) {
                Ok(0) | Err(_) => break,
                Ok(n) => read += n,
            }
        }
    }
    if is_native_header(&head[..read]) {
        Some(Resolution::Native(path.to_path_buf()))
    } else {
        Some(Resolution::Script(path.to_path_buf()))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn probe_candidates(base: &Path, suffix: &str) -> Option<Resolution> {
    if !suffix.is_empty() {
        if let Some(found) = probe(&with_suffix(base, suffix)) {
            return Some(found);
        }
    }
    probe(base)
}

/// Resolve `name` against `search_path` (a PATH value) relative to `cwd`
pub fn resolve_image(name: &str, search_path: Option<&str>, cwd: &Path, suffix: &str) -> Resolution {
    if name.is_empty() {
        return Resolution::NotFound;
    }
    if has_path_component(name) {
        return probe_candidates(&cwd.join(name), suffix).unwrap_or(Resolution::NotFound);
    }
    if let Some(search_path) = search_path {
        for dir in std::env::split_paths(search_path) {
            // An empty entry means the current directory
            let dir = if dir.as_os_str().is_empty() { cwd.to_path_buf() } else { cwd.join(dir) };
            if let Some(found) = probe_candidates(&dir.join(name), suffix) {
                return found;
            }
        }
    }
    probe_candidates(&cwd.join(name), suffix).unwrap_or(Resolution::NotFound)
}

fn locate_shell(
    shell: &str,
    search_path: Option<&str>,
    cwd: &Path,
    suffix: &str,
) -> Result<PathBuf, LaunchError> {
    match resolve_image(shell, search_path, cwd, suffix) {
        Resolution::Native(path) | Resolution::Script(path) => Ok(path),
        Resolution::NotFound => Err(LaunchError::ShellNotFound(shell.to_string())),
    }
}

/// Decide image and argv for `args`
///
/// `env` is the child's environment if it has its own; its PATH drives
/// the search, otherwise this process's PATH does.
pub fn plan_launch(
    args: &[String],
    env: Option<&EnvBlock>,
    shell: &str,
    cwd: &Path,
    settings: &LaunchSettings,
) -> Result<LaunchPlan, LaunchError> {
    let first = args.first().ok_or(LaunchError::InvalidArgument("empty argument vector"))?;
    if args.iter().any(|a| a.contains('\0')) {
        return Err(LaunchError::InvalidArgument("argument contains NUL"));
    }

    let process_path;
    let search_path = match env {
        Some(env) => env.path(),
        None => {
            process_path = std::env::var("PATH").ok();
            process_path.as_deref()
        }
    };
    let suffix = settings.exe_suffix.as_str();

    let (image, argv, via_shell) = match resolve_image(first, search_path, cwd, suffix) {
        Resolution::Native(image) => (image, args.to_vec(), false),
        Resolution::Script(script) => {
            let image = locate_shell(shell, search_path, cwd, suffix)?;
            let mut argv = Vec::with_capacity(args.len() + 1);
            argv.push(shell.to_string());
            argv.push(script.to_string_lossy().into_owned());
            argv.extend_from_slice(&args[1..]);
            (image, argv, true)
        }
        Resolution::NotFound => {
            let image = locate_shell(shell, search_path, cwd, suffix)?;
            let mut argv = Vec::with_capacity(args.len() + 3);
            argv.push(shell.to_string());
            argv.push("-c".to_string());
            argv.push(EXEC_WRAPPER.to_string());
            argv.extend_from_slice(args);
            (image, argv, true)
        }
    };

    let dialect = if via_shell { QuoteDialect::Shell } else { QuoteDialect::Simple };
    let command_line = quote_args(&argv, dialect);
    Ok(LaunchPlan { image, argv, via_shell, command_line })
}

/// Start the planned process
///
/// The child inherits stdio. It gets `env` as its whole environment when
/// given, and is restricted to `affinity` and niced before exec.
pub fn launch(
    plan: &LaunchPlan,
    env: Option<&EnvBlock>,
    affinity: Option<&CpuMask>,
    settings: &LaunchSettings,
) -> Result<ProcessHandle, LaunchError> {
    let mut cmd = Command::new(&plan.image);
    cmd.arg0(&plan.argv[0]).args(&plan.argv[1..]);
    if let Some(env) = env {
        cmd.env_clear();
        cmd.envs(env.pairs());
    }

    let mask = affinity.copied();
    let nice = settings.child_nice;
    unsafe {
        cmd.pre_exec(move || {
            configure_child(mask.as_ref(), nice);
            Ok(())
        });
    }

    match cmd.spawn() {
        Ok(child) => {
            kdebug!("launched pid {}: {}", child.id(), plan.command_line);
            Ok(ProcessHandle::from_child(child))
        }
        Err(e) => Err(LaunchError::Spawn {
            errno: e.raw_os_error().unwrap_or(0),
            command: plan.command_line.to_string(),
        }),
    }
}

/// Log a launch failure; a missing shell is reported only once
pub fn report_launch_error(err: &LaunchError) {
    match err {
        LaunchError::ShellNotFound(_) => {
            if !SHELL_REPORTED.swap(true, Ordering::Relaxed) {
                kerror!("{}", err);
            }
        }
        _ => kerror!("{}", err),
    }
}
