use assert_cmd::Command;
use ferritin_test_data::PtmDataDir;

#[test]
fn test_cli_recurrent_binary() {
    let data = PtmDataDir::create().unwrap();
    let mut cmd = Command::cargo_bin("ferritin-ptm").unwrap();

    cmd.arg("--config")
        .arg(data.config())
        .args(["--model", "rnn"])
        .args(["--seq_len", "48"])
        .args(["--batch_size", "8"])
        .args(["--num_epochs", "1"])
        .arg("--binary")
        .args(["--tflog", "3"])
        .arg("--cpu");

    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("N6-acetyllysine"));
    assert!(stdout.contains("Phosphoserine"));
    assert!(stdout.contains("AUC"));
}

#[test]
fn test_cli_relative_config_paths() {
    let data = PtmDataDir::create().unwrap();
    let config = data.relative_config().unwrap();
    let mut cmd = Command::cargo_bin("ferritin-ptm").unwrap();

    cmd.current_dir(data.path())
        .args(["--config", config])
        .args(["--model", "rnn"])
        .args(["--seq_len", "32"])
        .args(["--num_epochs", "1"])
        .arg("--cpu");

    let output = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8(output).unwrap();
    assert!(stdout.contains("Phosphoserine"));
}

#[test]
fn test_cli_rejects_conflicting_modes() {
    let data = PtmDataDir::create().unwrap();
    let mut cmd = Command::cargo_bin("ferritin-ptm").unwrap();
    cmd.arg("--config")
        .arg(data.config())
        .args(["--model", "rnn", "--binary", "--multilabel", "--cpu"]);
    cmd.assert().failure();
}

#[test]
fn test_cli_missing_config() {
    let mut cmd = Command::cargo_bin("ferritin-ptm").unwrap();
    cmd.args(["--config", "/nonexistent/config.yaml", "--cpu"]);
    cmd.assert().failure();
}

#[test]
fn test_cli_bad_policy_name() {
    let mut cmd = Command::cargo_bin("ferritin-ptm").unwrap();
    cmd.args(["--warm_start", "sometimes"]);
    cmd.assert().failure();
}
