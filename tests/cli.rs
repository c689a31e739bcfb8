use std::process::{Command, Output};

fn docpipe(args: &[&str]) -> Output {
    let log_file = std::env::temp_dir().join(format!("docpipe-cli-{}.log", std::process::id()));
    Command::new(env!("CARGO_BIN_EXE_docpipe"))
        .args(args)
        .env("CHUNK_SIZE", "abc")
        .env("DOCPIPE_LOG_FILE", log_file)
        .output()
        .expect("docpipe should start")
}

#[test]
fn help_works_with_invalid_configuration() {
    let output = docpipe(&["--help"]);
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ingest"));
}

#[test]
fn commands_still_report_invalid_configuration() {
    let output = docpipe(&["embed", "hello"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to load configuration"), "{stderr}");
}
