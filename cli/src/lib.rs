// Copyright 2025 The p4stack Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `p4stack` command-line interface.

use std::process::ExitCode;

use clap::Parser as _;
use tracing_subscriber::EnvFilter;

pub mod cli_util;
pub mod command_error;
pub mod commands;
pub mod ui;

use crate::cli_util::CommandHelper;
use crate::command_error::handle_command_result;
use crate::ui::Ui;

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses the command line and runs the selected command.
pub fn run() -> ExitCode {
    let args = match commands::Args::try_parse() {
        Ok(args) => args,
        // Also reached by --help/--version; clap picks the right exit code.
        Err(err) => err.exit(),
    };
    init_tracing(args.global.debug);
    let mut ui = Ui::new();
    let command_helper = CommandHelper::new(args.global.clone());
    let result = commands::run_command(&mut ui, &command_helper, &args.command);
    handle_command_result(&ui, result)
}
