//! Local bash example
//!
//! Spawns `bash` on a pseudo-terminal, runs a few commands, enters a
//! subshell and drives an interactive `cat` through a command session.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example local_bash
//! RUST_LOG=debug cargo run --example local_bash -- --timeout 5
//! ```

use std::env;
use std::time::Duration;

use labshell::{Arg, PtyConfig, ShellBuilder, ShellKind};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let timeout = parse_timeout();

    println!("Spawning bash...");
    let mut sh = ShellBuilder::new(ShellKind::Bash)
        .name("local")
        .timeout(Duration::from_secs(timeout))
        .spawn_local(PtyConfig::bash())
        .await?;
    println!("Ready ({} flavour)\n", sh.flavor_name());

    let kernel = sh.exec0(["uname", "-sr"]).await?;
    println!("Kernel: {}", kernel.trim());

    let (code, _) = sh.exec(["test", "-d", "/nonexistent"]).await?;
    println!("test -d /nonexistent exited with {}", code);

    // Quoting is handled for us
    let greeting = sh.exec0(["echo", "it's a \"quoted\" $HOME"]).await?;
    println!("Echoed verbatim: {}", greeting.trim());

    let home = sh.exec0([Arg::from("echo"), Arg::env("HOME")]).await?;
    println!("HOME expands to: {}", home.trim());

    // Environment changes inside a subshell stay there
    let mut sub = sh.subshell().await?;
    let value = sub.set_env("LABSHELL_DEMO", "inside").await?;
    println!("\nIn subshell: LABSHELL_DEMO={}", value);
    sub.exit().await?;
    println!(
        "After exit:  LABSHELL_DEMO={:?}",
        sh.env("LABSHELL_DEMO").await?
    );

    // Long-running interactive command
    println!("\nDriving cat interactively...");
    let mut session = sh.run(["cat"]).await?;
    session.send_line_read_back("hello from labshell").await?;
    let line = session.receive(Duration::from_secs(1)).await?;
    println!("cat said: {}", String::from_utf8_lossy(&line).trim());
    session.send_control('D').await?;
    let (code, _) = session.terminate().await?;
    println!("cat exited with {}", code);
    drop(session);

    let workdir = sh.workdir().await?;
    let user = sh.username().await?;
    println!("\nWorking directory for {}: {}", user, workdir.display());

    sh.close().await?;
    println!("\nDone!");
    Ok(())
}

fn parse_timeout() -> u64 {
    let args: Vec<String> = env::args().collect();
    let mut timeout = 10;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    timeout = args[i].parse().unwrap_or(10);
                }
            }
            other => eprintln!("Unknown argument: {}", other),
        }
        i += 1;
    }
    timeout
}
