//! `login` subcommand of the controller CLI and the tokens it issues
//!
//! Needs a live controller and the CLI binary (`TOWERQA_CLI_BINARY`).

#[macro_use]
mod live;

use serde_json::Value;
use tracing::info;

use towerqa_e2e::cli::{CliEnv, CliRunner, ENV_HOST, ENV_TOKEN};
use towerqa_e2e::factories::gen_alphanumeric;

/// The unreachable-host check depends on nothing listening on
/// 127.0.0.1:443 of the machine running the suite, so it is opt-in.
const UNREACHABLE_HOST_CHECK: &str = "TOWERQA_UNREACHABLE_HOST_CHECK";

/// Environment for a CLI call that authenticates with `token` only
fn token_env(runner: &CliRunner, token: &str) -> CliEnv {
    CliEnv::anonymous()
        .var(ENV_HOST, runner.host())
        .var(ENV_TOKEN, token)
}

async fn personal_token(runner: &CliRunner, extra: &[&str]) -> String {
    let mut args = vec!["login", "-k"];
    args.extend_from_slice(extra);
    let out = runner.run(&args, CliEnv::authenticated()).await.unwrap();
    assert!(out.success(), "login failed: {}", out.stdout);
    let mut tokens = out.exported_tokens();
    assert_eq!(tokens.len(), 1, "login must export exactly one token: {}", out.stdout);
    tokens.remove(0)
}

#[tokio::test]
async fn test_network_error() {
    let live = live_or_skip!();
    if std::env::var(UNREACHABLE_HOST_CHECK).as_deref() != Ok("1") {
        info!("{} is not set; skipping unreachable host check", UNREACHABLE_HOST_CHECK);
        return;
    }

    let out = CliRunner::from_config(&live.config)
        .run(&["login"], CliEnv::anonymous())
        .await
        .unwrap();
    assert!(
        out.contains("There was a network error of some kind trying to reach https://127.0.0.1:443."),
        "{}",
        out.stdout
    );
}

#[tokio::test]
async fn test_invalid_credentials() {
    let live = live_or_skip!();
    let runner = CliRunner::from_config(&live.config);

    // host only, no username or password
    let out = runner
        .run(&["login", "-k", "--conf.host", runner.host()], CliEnv::anonymous())
        .await
        .unwrap();
    assert!(out.contains("Error retrieving an OAuth2.0 token"), "{}", out.stdout);
    assert!(out.contains("Unauthorized"), "{}", out.stdout);
}

#[tokio::test]
async fn test_personal_token() {
    let live = live_or_skip!();
    let runner = CliRunner::from_config(&live.config);

    let token = personal_token(&runner, &[]).await;
    let out = runner.run(&["me", "-k"], token_env(&runner, &token)).await.unwrap();
    assert!(out.success(), "{}", out.stdout);

    let me: Value = out.json().unwrap();
    assert_eq!(me["count"], 1);
    assert_eq!(
        me["results"][0]["username"].as_str(),
        Some(runner.credentials().username.as_str())
    );
}

#[tokio::test]
async fn test_read_scoped_token() {
    let live = live_or_skip!();
    let runner = CliRunner::from_config(&live.config);

    let token = personal_token(&runner, &["--conf.scope", "read"]).await;
    let username = gen_alphanumeric(10);
    let out = runner
        .run(
            &["-k", "users", "create", "--username", &username],
            token_env(&runner, &token),
        )
        .await
        .unwrap();
    assert_eq!(out.exit_code, Some(2), "{}", out.stdout);
    assert!(out.contains("invalid choice: 'create'"), "{}", out.stdout);
}
