use std::path::Path;
use std::process::Output;

use lively_shared::{LivelyError, LivelyResult};
use log::debug;
use tokio::process::Command;

/// Runs `cmd` through the platform shell in `cwd` and returns its output.
///
/// A non-zero exit becomes [`LivelyError::Command`] carrying stderr.
pub async fn run_shell(cmd: &str, cwd: &Path) -> LivelyResult<Output> {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C");
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c");
        c
    };
    command.arg(cmd).current_dir(cwd).kill_on_drop(true);

    debug!("running `{}`", cmd);
    let output = command.output().await?;

    if !output.status.success() {
        return Err(LivelyError::Command {
            cmd: cmd.to_string(),
            code: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Replaces `{name}` placeholders in `template` with shell-quoted values.
pub fn expand(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), &quote(value))
    })
}

fn quote(value: &str) -> String {
    if cfg!(windows) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
