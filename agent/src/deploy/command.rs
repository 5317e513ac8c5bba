//! External command execution

use tokio::process::Command;
use tracing::debug;

use crate::errors::AgentError;

/// Run `program` with `args` and return its trimmed stdout
///
/// A spawn failure or a non-zero exit is turned into an error with `wrap`.
pub async fn run(
    program: &str,
    args: &[&str],
    wrap: fn(String) -> AgentError,
) -> Result<String, AgentError> {
    debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| wrap(format!("failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(wrap(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
