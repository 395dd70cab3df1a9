use std::path::Path;
use std::process::Output;

use assert_cmd::Command;

include!(concat!(env!("OUT_DIR"), "/test_files.rs"));

fn do_test(filename: &Path) {
    let expected = find_expects(filename).join("\n");

    let output = run_file(filename);

    let stdout = String::from_utf8(output.stdout).unwrap();
    let stdout = stdout.trim_end();

    let stderr = String::from_utf8(output.stderr).unwrap();
    let stderr = stderr.trim_end();

    assert_eq!(expected, stdout, "stdout={}, stderr={}", stdout, stderr);

    if let Some(code) = find_exit_code(filename) {
        assert_eq!(output.status.code(), Some(code), "stderr={}", stderr);
    }
}

fn run_file(filename: &Path) -> Output {
    let mut cmd = Command::cargo_bin("simi").unwrap();
    cmd.arg(filename).output().unwrap()
}

fn find_expects(filename: &Path) -> Vec<String> {
    marked_lines(filename, "# expect: ")
}

fn find_exit_code(filename: &Path) -> Option<i32> {
    marked_lines(filename, "# exit: ").pop().and_then(|code| code.trim().parse().ok())
}

fn marked_lines(filename: &Path, marker: &str) -> Vec<String> {
    let content = std::fs::read_to_string(filename)
        .unwrap_or_else(|_| panic!("failed to read {}", filename.display()));

    let mut result = vec![];
    for line in content.lines() {
        if let Some(idx) = line.rfind(marker) {
            result.push(line[idx + marker.len()..].to_owned());
        }
    }

    result
}

#[test]
fn usage_without_a_script() {
    Command::cargo_bin("simi").unwrap().assert().code(64);
}

#[test]
fn missing_script_fails() {
    Command::cargo_bin("simi").unwrap().arg("tests/data/no_such_file.simi").assert().failure();
}

#[test]
fn scripts_share_globals() {
    let dir = std::env::temp_dir().join(format!("simi-runner-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("first.simi"), "$greeting = \"hello\"\n").unwrap();
    std::fs::write(dir.join("second.simi"), "print greeting\n").unwrap();

    Command::cargo_bin("simi")
        .unwrap()
        .arg(dir.join("first.simi"))
        .arg(dir.join("second.simi"))
        .assert()
        .success()
        .stdout("hello\n");
}
