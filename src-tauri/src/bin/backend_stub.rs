//! Minimal stand-in for the Python backend, used by the integration tests.
//!
//! Invoked the same way the interpreter is: `backend-stub <script>`. The
//! first line of the script file picks the behaviour:
//!
//! - `serve` listens on `FLASK_PORT` and answers every request with 200
//! - `serve-after <ms>` waits before binding
//! - `crash <code> <message>` writes the message to stderr and exits
//! - `crash-after <ms> <code> <message>` serves, then crashes after a delay

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";

#[derive(Debug, PartialEq)]
enum Directive {
    Serve { delay_ms: u64 },
    Crash { code: i32, message: String },
    CrashAfter { delay_ms: u64, code: i32, message: String },
}

fn parse(script: &str) -> Result<Directive, String> {
    let line = script.lines().next().unwrap_or("").trim();
    let mut words = line.splitn(2, ' ');
    let verb = words.next().unwrap_or("");
    let rest = words.next().unwrap_or("").trim();

    let number = |raw: Option<&str>| -> Result<u64, String> {
        raw.and_then(|value| value.parse().ok())
            .ok_or_else(|| format!("bad number in directive: {}", line))
    };

    match verb {
        "serve" => Ok(Directive::Serve { delay_ms: 0 }),
        "serve-after" => Ok(Directive::Serve {
            delay_ms: number(Some(rest))?,
        }),
        "crash" => {
            let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
            Ok(Directive::Crash {
                code: number(Some(code))? as i32,
                message: message.to_string(),
            })
        }
        "crash-after" => {
            let mut parts = rest.splitn(3, ' ');
            let delay_ms = number(parts.next())?;
            let code = number(parts.next())? as i32;
            Ok(Directive::CrashAfter {
                delay_ms,
                code,
                message: parts.next().unwrap_or("").to_string(),
            })
        }
        other => Err(format!("unknown directive: {:?}", other)),
    }
}

async fn serve(port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    eprintln!(" * Running on http://127.0.0.1:{}", port);
    loop {
        let (mut stream, _) = listener.accept().await?;
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(RESPONSE).await;
            let _ = stream.shutdown().await;
        });
    }
}

#[tokio::main]
async fn main() {
    let Some(script_path) = std::env::args().nth(1) else {
        eprintln!("usage: backend-stub <script>");
        std::process::exit(2);
    };
    let directive = match std::fs::read_to_string(&script_path)
        .map_err(|e| format!("cannot read {}: {}", script_path, e))
        .and_then(|script| parse(&script))
    {
        Ok(directive) => directive,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    let port: u16 = std::env::var("FLASK_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(5000);
    println!(
        "stub backend port={} encoding={}",
        port,
        std::env::var("PYTHONIOENCODING").unwrap_or_default()
    );

    match directive {
        Directive::Serve { delay_ms } => {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(e) = serve(port).await {
                eprintln!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Directive::Crash { code, message } => {
            eprintln!("{}", message);
            std::process::exit(code);
        }
        Directive::CrashAfter {
            delay_ms,
            code,
            message,
        } => {
            tokio::select! {
                result = serve(port) => {
                    if let Err(e) = result {
                        eprintln!("serve failed: {}", e);
                    }
                }
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
            eprintln!("{}", message);
            std::process::exit(code);
        }
    }
}
