use std::io::{Error, ErrorKind, Result};
use std::process::{Command, Stdio};

/// Fails with `PermissionDenied` unless every capability in `required` is effective.
pub fn setup(required: &[caps::Capability]) -> Result<()> {
    for cap in required {
        let present = caps::has_cap(None, caps::CapSet::Effective, *cap).map_err(Error::other)?;
        if !present {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("capability {cap} is required"),
            ));
        }
    }
    Ok(())
}

/// Runs `command` through `sh -c`; a non-zero exit status is an error carrying stderr.
pub fn execute_command(command: &str) -> Result<()> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        return Err(Error::other(format!(
            "Command `{command}` failed with status {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    log::info!("Command succeeded: {command}");
    log::debug!("Output: {}", String::from_utf8_lossy(&output.stdout));
    Ok(())
}
