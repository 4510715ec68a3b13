// Standalone column-isolation wrapper: runs a single-column command against
// one field of the tab-delimited stream on stdin, writing the reassembled
// stream to stdout. Usable from shell pipelines independently of the filter
// executor.

use std::process::Stdio;

use clap::Parser;
use tokio::process::Command;

use TabCleaner::col::ColumnAdapter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Route one column of a tab-delimited stream through a command", long_about = None)]
struct Args {
    /// Zero-based index of the column to hand to the wrapped command
    column: usize,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut child = match Command::new(&args.command[0])
        .args(&args.command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            eprintln!("Error: could not start `{}`: {}", args.command[0], e);
            std::process::exit(1);
        }
    };

    let adapter = ColumnAdapter::new(args.column);
    let result = adapter
        .run(tokio::io::stdin(), &mut child, tokio::io::stdout())
        .await;

    let mut code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("Error: could not wait for `{}`: {}", args.command[0], e);
            1
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        // Keep the wrapped command's own exit code if it already failed.
        if code == 0 {
            code = 1;
        }
    }

    std::process::exit(code);
}
