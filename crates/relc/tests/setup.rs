use assert_cmd::cmd::Command;

#[allow(dead_code)]
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

pub fn make_cli() -> Command {
    Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("Failed to find binary")
}

#[allow(dead_code)]
pub const MARK_JOIN: &str = r#"{
    "tables": {
        "l": {"columns": [{"name": "a", "type": "int64"}], "rows": [[1], [2], [3]]},
        "r": {"columns": [{"name": "b", "type": "int64"}], "rows": [[2], [3], [4]]}
    },
    "plan": {
        "op": "mark_join",
        "left": {"op": "scan", "table": "l"},
        "right": {"op": "scan", "table": "r"},
        "predicate": {"eq": [{"column": "a"}, {"column": "b"}]},
        "mark": "matched",
        "join_impl": "hash"
    }
}"#;

/// Run the cli with a plan on stdin, returning exit status and stdout.
#[allow(dead_code)]
pub fn run_stdin(args: &[&str], plan: &str) -> (i32, String) {
    let mut cmd = make_cli();
    cmd.timeout(DEFAULT_TIMEOUT).args(args).arg("-").write_stdin(plan);
    let output = cmd.output().expect("Failed to run command");
    let stdout = String::from_utf8(output.stdout).expect("Failed to read stdout");
    (output.status.code().unwrap_or(-1), stdout)
}
