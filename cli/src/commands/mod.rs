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

mod create;
mod list;
mod review;
mod submit;
mod update;
mod upload;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use tracing::instrument;

use crate::cli_util::CommandHelper;
use crate::cli_util::GlobalArgs;
use crate::command_error::CommandError;
use crate::ui::Ui;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().bold())
    .usage(AnsiColor::Yellow.on_default().bold())
    .literal(AnsiColor::Green.on_default().bold())
    .placeholder(AnsiColor::Green.on_default());

/// The parsed command line.
#[derive(clap::Parser, Clone, Debug)]
#[command(name = "p4stack")]
#[command(about = "Stacked pending changelists for Perforce-style servers")]
#[command(version)]
#[command(styles = STYLES)]
#[command(disable_help_subcommand = true)]
pub struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Clone, Debug)]
pub enum Command {
    Create(create::CreateArgs),
    List(list::ListArgs),
    Review(review::ReviewArgs),
    Submit(submit::SubmitArgs),
    Update(update::UpdateArgs),
    Upload(upload::UploadArgs),
}

#[instrument(skip_all)]
pub fn run_command(
    ui: &mut Ui,
    command_helper: &CommandHelper,
    command: &Command,
) -> Result<(), CommandError> {
    match command {
        Command::Create(args) => create::cmd_create(ui, command_helper, args),
        Command::List(args) => list::cmd_list(ui, command_helper, args),
        Command::Review(args) => review::cmd_review(ui, command_helper, args),
        Command::Submit(args) => submit::cmd_submit(ui, command_helper, args),
        Command::Update(args) => update::cmd_update(ui, command_helper, args),
        Command::Upload(args) => upload::cmd_upload(ui, command_helper, args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn verify_app() {
        Args::command().debug_assert();
    }
}
