use assert_cmd::prelude::*;
use color_eyre::Result;
use std::process::Command;

#[test]
fn test_help_lists_options() -> Result<()> {
    let output = Command::cargo_bin("waitron")?.arg("--help").output()?;

    assert!(
        output.status.success(),
        "waitron --help failed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout_str = String::from_utf8_lossy(&output.stdout);
    assert!(stdout_str.contains("--config"), "Missing --config option");
    assert!(stdout_str.contains("--port"), "Missing --port option");
    assert!(stdout_str.contains("CONFIG_FILE"), "Missing CONFIG_FILE env hint");
    Ok(())
}

#[test]
fn test_missing_config_file_fails() -> Result<()> {
    let output = Command::cargo_bin("waitron")?
        .env_remove("CONFIG_FILE")
        .args(["--config", "/nonexistent/waitron.yaml"])
        .output()?;

    assert!(!output.status.success());
    let stderr_str = String::from_utf8_lossy(&output.stderr);
    assert!(stderr_str.contains("Failed to read config file"), "Unexpected stderr: {}", stderr_str);
    Ok(())
}

#[test]
fn test_config_is_required() -> Result<()> {
    let output = Command::cargo_bin("waitron")?.env_remove("CONFIG_FILE").output()?;
    assert!(!output.status.success());
    Ok(())
}
