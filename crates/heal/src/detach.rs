use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use outreach_core::Result;

/// Spawn a successor process that outlives its parent: stdio nulled and, on
/// unix, its own process group so it survives the parent's terminal/session.
pub fn spawn_detached<I, S>(program: &Path, args: I) -> Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn()?;
    let pid = child.id();
    info!(program = %program.display(), pid, "Spawned detached successor");
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_spawn_detached_returns_pid() {
        let pid = spawn_detached(Path::new("/bin/sh"), ["-c", "exit 0"]).unwrap();
        assert!(pid > 0);
    }

    #[test]
    fn test_spawn_missing_program_errors() {
        let result = spawn_detached(Path::new("/nonexistent/outreachd"), ["resume"]);
        assert!(result.is_err());
    }
}
