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

//! Shared plumbing for the commands: environment resolution, server
//! connection, the operation-log store and review-service credentials.

use std::io::Write as _;

use p4stack_lib::editor::TextEditor;
use p4stack_lib::op_log::OpLogStore;
use p4stack_lib::p4_subprocess::P4Client;
use p4stack_lib::rebase::RebaseEngine;
use p4stack_lib::swarm::SwarmClient;
use p4stack_lib::swarm::TicketCache;
use p4stack_lib::swarm::resolve_swarm_url;
use p4stack_lib::vcs::VcsClient as _;
use tracing::debug;

use crate::command_error::CommandError;
use crate::command_error::internal_error;
use crate::ui::Ui;

/// Options shared by every subcommand.
#[derive(clap::Args, Clone, Debug)]
pub struct GlobalArgs {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Per-invocation context handed to each command.
pub struct CommandHelper {
    global_args: GlobalArgs,
}

impl CommandHelper {
    pub fn new(global_args: GlobalArgs) -> Self {
        Self { global_args }
    }

    pub fn global_args(&self) -> &GlobalArgs {
        &self.global_args
    }

    /// Connects to the Perforce server with the ambient `P4*` environment.
    pub fn connect(&self) -> Result<P4Client, CommandError> {
        let client = P4Client::connect()?;
        debug!(user = client.user(), "connected");
        Ok(client)
    }

    /// The operation-log store of the current working directory.
    pub fn op_log_store(&self) -> Result<OpLogStore, CommandError> {
        let cwd = std::env::current_dir().map_err(internal_error)?;
        Ok(OpLogStore::new_in(cwd))
    }

    /// The user's editor, from `$EDITOR` or `vi`.
    pub fn text_editor(&self) -> TextEditor {
        TextEditor::from_env()
    }

    /// A rebase engine bound to `vcs`, the CWD's log store and the user's
    /// editor.
    pub fn rebase_engine<'a>(&self, vcs: &'a P4Client) -> Result<RebaseEngine<'a>, CommandError> {
        Ok(RebaseEngine::new(
            vcs,
            self.op_log_store()?,
            self.text_editor(),
        ))
    }

    /// Connects to the review service, reusing a cached ticket or prompting
    /// for the Perforce password to mint a fresh one.
    pub fn swarm_client(&self, ui: &Ui, p4: &P4Client) -> Result<SwarmClient, CommandError> {
        let url = resolve_swarm_url(p4.property("P4.Swarm.URL")?)?;
        let cache = TicketCache::new()?;
        let user = p4.user().to_owned();
        let ticket = match cache.read(&user, p4.port()) {
            Some(ticket) => ticket,
            None => {
                let password = rpassword::prompt_password("Enter Perforce password: ")
                    .map_err(internal_error)?;
                let ticket = p4.login_with_password(&password)?;
                if let Err(err) = cache.write(&user, p4.port(), &ticket) {
                    writeln!(ui.warning(), "Could not cache the ticket: {err}").ok();
                }
                ticket
            }
        };
        Ok(SwarmClient::new(url, user, ticket)?)
    }
}
