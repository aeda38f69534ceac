use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("regmon");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("notify"))
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--help"));
}

#[test]
fn test_watch_help_includes_required_options() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("regmon");
    cmd.args(["watch", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--socket"))
        .stdout(predicate::str::contains("--interval"))
        .stdout(predicate::str::contains("--buffer-size"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_notify_help_describes_value_types() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("regmon");
    cmd.args(["notify", "--help"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--key"))
        .stdout(predicate::str::contains("--value"))
        .stdout(predicate::str::contains("dword"))
        .stdout(predicate::str::contains("multi-sz"));
}

#[test]
fn test_no_arguments_shows_usage() {
    let mut cmd = assert_cmd::cargo_bin_cmd!("regmon");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}
