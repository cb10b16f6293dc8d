// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use mpsocks::{
    cfg::{cli::config_path_from_args, config::Config},
    server::Server,
};

fn main() -> Result<()> {
    let cfg = config_path_from_args()
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    Server::new(cfg).run()
}
