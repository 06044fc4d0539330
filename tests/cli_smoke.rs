use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

fn bin() -> Command {
    cargo_bin_cmd!("pyrelay")
}

#[test]
fn help_lists_core_settings() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("pyrelay"))
        .stdout(contains("--index-url"))
        .stdout(contains("--extra-index-urls"))
        .stdout(contains("--cache-size"))
        .stdout(contains("--cache-dir"))
        .stdout(contains("--download-timeout"))
        .stdout(contains("--binary-file-mime-type"));
}

#[test]
fn version_is_reported() {
    bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn mismatched_extra_index_ttls_fail_startup() {
    bin()
        .args([
            "--extra-index-urls",
            "https://a.example.com/simple/,https://b.example.com/simple/",
            "--extra-index-ttls",
            "60",
        ])
        .assert()
        .failure()
        .stderr(contains("number of extra index URLs"));
}
