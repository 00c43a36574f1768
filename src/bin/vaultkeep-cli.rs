use std::io::{self, BufRead, Write};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> io::Result<()> {
    let mut host = "127.0.0.1".to_string();
    let mut port = 10000u16;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-h" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    if let Ok(p) = args[i + 1].parse() {
                        port = p;
                    }
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    let addr = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&addr).await?;
    eprintln!("Connected to {addr}");

    let stdin = io::stdin();
    let mut reader = stdin.lock();

    loop {
        print!("vaultkeep> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let n = reader.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        // A reply is whatever the server flushes for this request: one
        // textual line, or a multi-line block with embedded newlines, all
        // terminated by a single trailing "\n". There is no length prefix,
        // so a reply is read as a single chunk rather than line-by-line —
        // an embedded newline would otherwise be mistaken for the end of
        // the reply.
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            eprintln!("connection closed by server");
            break;
        }
        print!("{}", String::from_utf8_lossy(&buf[..n]));
    }
    Ok(())
}
