use std::time::Duration;

use protos::pb::build::bazel::remote::execution::v2 as remexec;
use testutil::TestData;

use crate::{parse_log_level, read_action, write_action_result, RunnerOptions};
use clap::Parser;

#[test]
fn action_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("action");

    let command = TestData::new("compile a thing");
    let input_root = TestData::new("the input tree");
    let action = remexec::Action {
        command_digest: Some(command.digest().into()),
        input_root_digest: Some(input_root.digest().into()),
        ..remexec::Action::default()
    };

    use grpc_util::prost::MessageExt;
    std::fs::write(&path, action.to_bytes()).unwrap();

    let read_back = read_action(&path).unwrap();
    assert_eq!(read_back, action);
}

#[test]
fn unparseable_action_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("action");
    std::fs::write(&path, b"\xff\xff\xff not a proto").unwrap();

    let err = read_action(&path).unwrap_err();
    assert!(err.contains("Failed to parse Action"), "Bad error: {err}");
}

#[test]
fn missing_action_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    read_action(&dir.path().join("nope")).expect_err("Want err");
}

#[test]
fn action_result_is_written() {
    use prost::Message;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result");

    let result = remexec::ActionResult {
        exit_code: 42,
        stdout_digest: Some(TestData::new("out").digest().into()),
        ..remexec::ActionResult::default()
    };
    write_action_result(&result, &path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let read_back = remexec::ActionResult::decode(bytes.as_slice()).unwrap();
    assert_eq!(read_back, result);
}

#[test]
fn log_levels() {
    assert_eq!(parse_log_level("info").unwrap(), log::LevelFilter::Info);
    assert_eq!(parse_log_level("WARNING").unwrap(), log::LevelFilter::Warn);
    assert_eq!(parse_log_level("warn").unwrap(), log::LevelFilter::Warn);
    assert_eq!(parse_log_level("trace").unwrap(), log::LevelFilter::Trace);
    parse_log_level("noisy").expect_err("Want err");
}

#[test]
fn cli_surface_parses() {
    let options = RunnerOptions::try_parse_from([
        "remexec-runner",
        "--action=/tmp/action",
        "--action-result=/tmp/result",
        "--workspace-path=/tmp/workspace",
        "--use-localcas",
        "--log-level=debug",
        "--remote=grpcs://cas.example.com:443",
        "--instance=prod",
        "--server-cert=/certs/ca.pem",
        "--client-key=/certs/key.pem",
        "--client-cert=/certs/cert.pem",
        "--access-token=/secrets/token",
        "--token-reload-interval=300",
        "--retry-limit=6",
        "--retry-delay=250",
    ])
    .unwrap();

    assert!(options.use_localcas);
    assert_eq!(options.instance, "prod");

    let connection = options.connection_options().unwrap();
    assert_eq!(connection.url, "grpcs://cas.example.com:443");
    assert_eq!(connection.instance_name, "prod");
    assert_eq!(connection.retry_limit, 6);
    assert_eq!(connection.retry_delay, Duration::from_millis(250));
    assert_eq!(
        connection.token_refresh_interval,
        Some(Duration::from_secs(300))
    );
    connection.validate().unwrap();
}

#[test]
fn missing_remote_is_reported() {
    let options = RunnerOptions::try_parse_from(["remexec-runner", "--action=/tmp/a"]).unwrap();
    let err = options.connection_options().unwrap_err();
    assert_eq!(err, "CAS server URL is missing.");
}

#[test]
fn unknown_flag_fails_to_parse() {
    RunnerOptions::try_parse_from(["remexec-runner", "--definitely-not-a-flag"])
        .expect_err("Want err");
}
