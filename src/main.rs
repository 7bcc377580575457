use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use log::{debug, error, info};

use tftpd::tftp::error::OutcomeKind;
use tftpd::{cli, client, server, tftp};

#[tokio::main]
async fn main() -> ExitCode {
	let options = cli::Options::parse();

	/* Initialize logging facility; can unwrap here because it has a default value */
	cli::init_logger(options.debug);

	let cancel_token = CancellationToken::new();
	let sigint_token = cancel_token.clone();

	/* Let's handle SIGINT on our own to gracefully shutdown all tasks */
	ctrlc::set_handler(move || {
		info!("Received SIGINT");
		sigint_token.cancel();
	})
	.unwrap();

	match &options.run_mode {
		cli::RunMode::Server { .. } => run_server(&options.run_mode, cancel_token).await,
		cli::RunMode::Client { .. } => {
			let cli::RunMode::Client { action } = options.run_mode else { unreachable!() };
			run_client(action, cancel_token).await
		}
	}
}

async fn run_server(mode: &cli::RunMode, cancel_token: CancellationToken) -> ExitCode {
	let root = shellexpand::tilde(mode.root()).into_owned();
	let root = PathBuf::from(root);
	match root.try_exists() {
		Ok(true) => {}
		Ok(false) => {
			error!("root directory '{}' does not exist", root.display());
			return ExitCode::from(1);
		}
		Err(e) => {
			error!("cannot access root directory '{}': {e}", root.display());
			return ExitCode::from(5);
		}
	}

	let listen_addr: SocketAddr = mode.listen_addr();
	let config = mode.server_config();
	debug!("starting server on {listen_addr}, root '{}'", root.display());

	let server = match server::TftpServer::new(listen_addr, root, config).await {
		Ok(s) => s,
		Err(e) => {
			error!("failed to bind listen socket on {listen_addr}: {e}");
			return ExitCode::from(5);
		}
	};

	server.run(cancel_token).await;
	ExitCode::SUCCESS
}

async fn run_client(action: cli::ClientAction, cancel_token: CancellationToken) -> ExitCode {
	let opts = action.opts();
	let path = shellexpand::tilde(&opts.path).into_owned();
	let file = PathBuf::from(path);

	let mut requested_options = opts.requested_options();
	if matches!(action, cli::ClientAction::Write { .. }) && opts.tsize {
		match file.metadata() {
			Ok(meta) => requested_options.insert(tftp::options::OPT_TSIZE, meta.len().to_string()),
			Err(e) => {
				error!("could not stat '{}': {e}", file.display());
				return ExitCode::from(5);
			}
		}
	}

	let params = client::TftpRequestParameters {
		req_kind: action.as_req_kind(),
		server: SocketAddr::from((opts.host, opts.port)),
		file,
		mode: opts.mode.into(),
		options: requested_options,
	};

	match client::run_client(params, cancel_token).await {
		Ok(outcome) => exit_code_for(&outcome),
		Err(e) => {
			error!("{e}");
			ExitCode::from(1)
		}
	}
}

fn exit_code_for(outcome: &tftp::error::Outcome) -> ExitCode {
	let code = match outcome.kind {
		OutcomeKind::Ok => 0,
		OutcomeKind::Options => 2,
		OutcomeKind::PeerError | OutcomeKind::Protocol => 3,
		OutcomeKind::Timeout => 4,
		OutcomeKind::HandlerReject | OutcomeKind::Cancelled => 5,
	};
	if code != 0 {
		if let Some(message) = &outcome.message {
			error!("{message}");
		}
	} else {
		info!("transfer completed, {} bytes", outcome.bytes_transferred);
	}
	ExitCode::from(code)
}
