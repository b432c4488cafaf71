//! Helpers for driving the built `cedar` binary from integration tests.
//! Tests pass the binary path via `env!("CARGO_BIN_EXE_cedar")` so cargo
//! guarantees the binary exists before the tests run.

use std::{
    error::Error,
    io,
    path::Path,
    process::{Command, Output},
    str,
};

pub struct Expected<'a> {
    pub stdout: &'a str,
    pub stderr: &'a str,
}

impl<'a> Expected<'a> {
    fn assert_matches(self, output: &Output) -> Result<(), Box<dyn Error>> {
        assert_eq!(str::from_utf8(&output.stdout)?, self.stdout);
        assert_eq!(str::from_utf8(&output.stderr)?, self.stderr);
        Ok(())
    }
}

fn run_eval(bin: &Path, expr: &str) -> Result<Output, io::Error> {
    Command::new(bin).arg("-e").arg(expr).output()
}

fn run_file(bin: &Path, src_path: &Path) -> Result<Output, io::Error> {
    Command::new(bin).arg(src_path).output()
}

/// Evaluate an expression through the binary and assert on its output.
/// `-e` prints the resulting value followed by a newline.
pub fn check_eval(bin: &Path, expr: &str, expected: Expected) -> Result<(), Box<dyn Error>> {
    let output = run_eval(bin, expr)?;
    expected.assert_matches(&output)?;
    assert!(
        output.status.success(),
        "cedar exited with status {:?}",
        output.status.code()
    );
    Ok(())
}

/// Run a source file through the binary and assert on its output.
pub fn check_file(bin: &Path, src_path: &Path, expected: Expected) -> Result<(), Box<dyn Error>> {
    let output = run_file(bin, src_path)?;
    expected.assert_matches(&output)?;
    assert!(
        output.status.success(),
        "cedar exited with status {:?}",
        output.status.code()
    );
    Ok(())
}

/// Assert that evaluating an expression fails with a non-zero exit status.
pub fn check_failing_eval(bin: &Path, expr: &str) -> Result<(), Box<dyn Error>> {
    let output = run_eval(bin, expr)?;
    assert!(
        !output.status.success(),
        "cedar should exit with a failure status"
    );
    Ok(())
}
