// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the conductor

use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::Parser;
use foundry_common::cmd::fatal;
use foundry_common::cmd::CmdError;
use foundry_conductor::run_openapi;
use foundry_conductor::run_server;
use foundry_conductor::Config;

#[derive(Debug, Parser)]
#[clap(name = "conductor", about = "Registers hosts and installs clusters")]
struct Args {
    #[clap(
        short = 'O',
        long = "openapi",
        help = "Print the OpenAPI Spec document and exit",
        action
    )]
    openapi: bool,

    #[clap(
        name = "CONFIG_FILE_PATH",
        action,
        required_unless_present = "openapi"
    )]
    config_file_path: Option<Utf8PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(cmd_error) = do_run().await {
        fatal(cmd_error);
    }
}

async fn do_run() -> Result<(), CmdError> {
    let args = Args::parse();

    if args.openapi {
        return run_openapi().map_err(|e| CmdError::Failure(anyhow!(e)));
    }

    let Some(config_file_path) = args.config_file_path else {
        return Err(CmdError::Usage(String::from(
            "CONFIG_FILE_PATH is required unless --openapi is given",
        )));
    };
    let config = Config::from_file(&config_file_path)
        .map_err(|e| CmdError::Failure(anyhow!(e)))?;
    run_server(&config).await.map_err(|e| CmdError::Failure(anyhow!(e)))
}
