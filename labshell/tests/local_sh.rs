//! End-to-end tests of the ash flavour against a minimal POSIX shell.
//!
//! Uses `dash` or `busybox sh`, whichever is installed. Skipped when
//! neither is.

use std::path::Path;
use std::time::Duration;

use labshell::{Arg, CommandSession, PromptSpec, PtyConfig, Shell, ShellBuilder, ShellKind};
use tokio_test::assert_ok;

/// Command line that starts a plain POSIX shell on this machine.
fn posix_shell() -> Option<Vec<&'static str>> {
    for dash in ["/bin/dash", "/usr/bin/dash"] {
        if Path::new(dash).exists() {
            return Some(vec![dash]);
        }
    }
    for busybox in ["/bin/busybox", "/usr/bin/busybox"] {
        if Path::new(busybox).exists() {
            return Some(vec![busybox, "sh"]);
        }
    }
    None
}

async fn local_sh() -> Option<(Shell, Vec<&'static str>)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let Some(command) = posix_shell() else {
        eprintln!("neither dash nor busybox found, skipping");
        return None;
    };
    let config = PtyConfig::new(command[0]).args(command[1..].iter().copied());
    let sh = ShellBuilder::new(ShellKind::Ash)
        .name("sh")
        .timeout(Duration::from_secs(10))
        .spawn_local(config)
        .await;
    Some((assert_ok!(sh), command))
}

#[tokio::test]
async fn test_exit_codes() {
    let Some((mut sh, _)) = local_sh().await else {
        return;
    };

    assert_eq!(assert_ok!(sh.exec(["false"]).await), (1, String::new()));
    assert_eq!(
        assert_ok!(sh.exec(["sh", "-c", "exit 123"]).await),
        (123, String::new())
    );
    assert_eq!(
        assert_ok!(sh.exec0(["echo", "it's \"quoted\" $HOME"]).await),
        "it's \"quoted\" $HOME\n"
    );
    assert_ok!(sh.close().await);
}

#[tokio::test]
async fn test_env_reads_values_verbatim() {
    let Some((mut sh, _)) = local_sh().await else {
        return;
    };

    // dash's echo would interpret the backslash and the -n
    let value = "-n back\\slash \\c";
    assert_eq!(assert_ok!(sh.set_env("LABSHELL_VALUE", value).await), value);
    assert_eq!(assert_ok!(sh.env("LABSHELL_VALUE").await), value);
    assert_ok!(sh.close().await);
}

#[tokio::test]
async fn test_subshell_environment() {
    let Some((mut sh, command)) = local_sh().await else {
        return;
    };

    assert_ok!(sh.set_env("FOOBAR", "outer").await);
    let mut sub = assert_ok!(sh.subshell_with(command.iter().copied()).await);
    assert_ok!(sub.set_env("FOOBAR", "inner").await);
    assert_eq!(assert_ok!(sub.env("FOOBAR").await), "inner");
    assert_ok!(sub.exit().await);
    assert_eq!(assert_ok!(sh.env("FOOBAR").await), "outer");
    assert_ok!(sh.close().await);
}

#[tokio::test]
async fn test_background_jobs_are_refused() {
    let Some((mut sh, _)) = local_sh().await else {
        return;
    };

    let err = sh
        .exec([Arg::from("sleep"), Arg::from("1"), Arg::Background])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("job_control"));
    assert_ok!(sh.exec0(["true"]).await);
    assert_ok!(sh.close().await);
}

#[tokio::test]
async fn test_abort_before_prompt() {
    let Some((mut sh, _)) = local_sh().await else {
        return;
    };

    let err = sh
        .run_scoped(["echo", "Hello World"], async |s: &mut CommandSession<'_>| {
            s.read_until(&PromptSpec::literal("Lorem Ipsum"), Duration::from_secs(5))
                .await
                .map(drop)
        })
        .await
        .unwrap_err();
    assert!(err.is_unexpected_abort());
    assert_eq!(assert_ok!(sh.exec0(["echo", "still here"]).await), "still here\n");
    assert_ok!(sh.close().await);
}
