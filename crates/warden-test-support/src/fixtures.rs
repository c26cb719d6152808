//! Header builders and helper-script fixtures.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Shell used to run helper scripts.
pub const SHELL: &str = "/bin/sh";

/// `Proxy-Authorization` value for `user:pass`.
#[must_use]
pub fn basic_header(user: &str, pass: &str) -> String {
    encoded_header(format!("{user}:{pass}").as_bytes())
}

/// `Proxy-Authorization` value wrapping arbitrary payload bytes.
#[must_use]
pub fn encoded_header(payload: &[u8]) -> String {
    format!("Basic {}", STANDARD.encode(payload))
}

/// Returns `true` when helper scripts can be executed.
#[must_use]
pub fn sh_available() -> bool {
    Path::new(SHELL).exists()
}

/// Write a shell helper named `name` into `dir`.
///
/// # Errors
///
/// Returns any I/O error from writing the script.
pub fn write_helper_script(dir: &Path, name: &str, body: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, format!("#!{SHELL}\n{body}\n"))?;
    Ok(path)
}

/// Command line running `script` through the shell.
#[must_use]
pub fn helper_program(script: &Path) -> Vec<String> {
    vec![SHELL.to_string(), script.display().to_string()]
}

/// Helper that accepts every request and echoes it back.
pub const ECHO_HELPER: &str = r#"while read -r line; do echo "OK $line"; done"#;

/// Helper speaking the channel-id dialect, echoing each request.
pub const CHANNEL_ECHO_HELPER: &str = r#"while read -r id rest; do echo "$id OK $rest"; done"#;
