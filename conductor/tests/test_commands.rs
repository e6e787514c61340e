// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for the conductor executable.  Most functionality is tested
//! elsewhere, so this really just sanity checks argument parsing, bad args,
//! and the --openapi mode.

use camino_tempfile::Utf8TempDir;
use std::process::Command;
use std::process::Output;

/// name of the "conductor" executable
const CMD_CONDUCTOR: &str = env!("CARGO_BIN_EXE_conductor");

const EXIT_SUCCESS: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn run_conductor(args: &[&str]) -> Output {
    Command::new(CMD_CONDUCTOR)
        .args(args)
        .output()
        .expect("failed to run conductor")
}

#[test]
fn test_conductor_no_args() {
    let output = run_conductor(&[]);
    assert_eq!(output.status.code(), Some(EXIT_USAGE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CONFIG_FILE_PATH"), "stderr: {}", stderr);
}

#[test]
fn test_conductor_bad_config() {
    let output = run_conductor(&["nonexistent.toml"]);
    assert_eq!(output.status.code(), Some(EXIT_FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.starts_with("conductor: error reading \"nonexistent.toml\""),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_conductor_invalid_config() {
    let dir = Utf8TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[dropshot]\n").unwrap();

    let output = run_conductor(&[path.as_str()]);
    assert_eq!(output.status.code(), Some(EXIT_FAILURE));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error parsing"), "stderr: {}", stderr);
}

#[test]
fn test_conductor_openapi() {
    let output = run_conductor(&["--openapi"]);
    assert_eq!(output.status.code(), Some(EXIT_SUCCESS));
    let spec: serde_json::Value =
        serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(spec["info"]["title"], "Conductor API");

    let paths = spec["paths"].as_object().unwrap();
    for path in [
        "/clusters",
        "/clusters/{cluster_id}",
        "/clusters/{cluster_id}/actions/install",
        "/clusters/{cluster_id}/free-addresses",
        "/clusters/{cluster_id}/hosts/{host_id}/instructions",
        "/clusters/{cluster_id}/hosts/{host_id}/instructions/reply",
        "/bgtasks",
    ] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
}
