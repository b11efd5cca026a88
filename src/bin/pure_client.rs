use std::{process, sync::Arc};

use clap::Parser;
use log::{debug, warn};
use pure::{
    PeerClient,
    cli::{Cli, EXIT_OK, error_kind, exit_code, render},
};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let client = Arc::new(PeerClient::new(cli.config()));

    {
        let client = Arc::clone(&client);
        if let Err(e) = ctrlc::set_handler(move || {
            warn!("interrupted, closing connections");
            client.shutdown();
        }) {
            warn!("failed to install interrupt handler: {e}");
        }
    }

    let outcome = if cli.ping {
        client.ping(&cli.address).map(|rtt| format!("pong from {} in {rtt:?}", cli.address))
    } else {
        let text = cli.query.as_deref().unwrap_or_default();
        client.query(&cli.address, text).map(|result| render(&result))
    };
    client.shutdown();

    let code = match outcome {
        Ok(out) => {
            println!("{out}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("error: {}: {e}", error_kind(&e));
            exit_code(&e)
        }
    };

    debug!("exiting with code {code}");
    process::exit(code);
}
