//! Send one command to a daemon's control socket and print the reply.
//!
//! The reply body goes to stdout for 2xx codes; anything else goes to
//! stderr and the tool exits non-zero.

use clap::Parser;
use ctlsock::Client;
use std::error::Error;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ctlsock")]
#[command(version = "0.1.0")]
#[command(about = "Send a command to a daemon's control socket", long_about = None)]
struct Args {
    /// Control socket path (absolute) or name (resolved in the runtime dir)
    #[arg(short = 't', long)]
    target: String,

    /// Command to invoke
    command: String,

    /// Arguments passed through to the command
    args: Vec<String>,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ctlsock: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode, Box<dyn Error>> {
    let mut request = args.command.clone();
    for arg in &args.args {
        request.push(' ');
        request.push_str(arg);
    }

    let mut client = Client::create(&args.target)?;
    let (code, body) = client.transact(&request)?;

    if (200..300).contains(&code) {
        print!("{body}");
        Ok(ExitCode::SUCCESS)
    } else {
        eprint!("{body}");
        eprintln!("ctlsock: command failed with status {code}");
        Ok(ExitCode::from(2))
    }
}
