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

//! [`VcsClient`] implementation that shells out to the `p4` binary.
//!
//! Every operation is one blocking subprocess. Commands are run with
//! `-ztag -Mj` so the server answers in line-delimited JSON records; the
//! few commands that take a spec form on stdin (`p4 change -i`) run in
//! plain-text mode and are parsed with the server's confirmation regexes.
//! Connection parameters come from the standard `P4PORT`/`P4USER`/
//! `P4CLIENT`/`P4CONFIG` environment the binary itself honors.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::LazyLock;

use bstr::BString;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::vcs::ChangeNumber;
use crate::vcs::ChangeStatus;
use crate::vcs::DescribedChange;
use crate::vcs::OpenedFile;
use crate::vcs::PendingChange;
use crate::vcs::PrintEntry;
use crate::vcs::ShelveMode;
use crate::vcs::VcsClient;
use crate::vcs::VcsError;

type JsonRecord = serde_json::Map<String, JsonValue>;

static CHANGE_CREATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Change (\d+) created").expect("regex should be valid"));
static CHANGE_SUBMITTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Change (\d+) submitted").expect("regex should be valid"));
static TICKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9A-Fa-f]{32}").expect("regex should be valid"));

fn is_login_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("session has expired") || lower.contains("please login")
}

fn get_str<'a>(record: &'a JsonRecord, key: &str) -> Option<&'a str> {
    record.get(key)?.as_str()
}

fn parse_change_number(text: &str) -> Result<ChangeNumber, VcsError> {
    text.trim()
        .parse()
        .map_err(|_| VcsError::failed(format!("Invalid changelist number '{text}'")))
}

/// Perforce client talking to the server through the `p4` executable.
pub struct P4Client {
    executable: PathBuf,
    user: String,
    client: String,
    port: String,
}

impl P4Client {
    /// Probes the server with `p4 info` and captures the connection
    /// identity. Fails with [`VcsError::LoginRequired`] when the session
    /// ticket has expired.
    pub fn connect() -> Result<Self, VcsError> {
        let mut client = Self {
            executable: PathBuf::from("p4"),
            user: String::new(),
            client: String::new(),
            port: String::new(),
        };
        let records = client.run_records(&["info"], &[])?;
        let info = records
            .first()
            .ok_or_else(|| VcsError::failed("p4 info returned no output"))?;
        let user = get_str(info, "userName")
            .map(str::to_owned)
            .or_else(|| std::env::var("P4USER").ok())
            .ok_or_else(|| {
                VcsError::failed(
                    "Could not determine the Perforce user. Ensure $P4USER is set or P4CONFIG \
                     is configured",
                )
            })?;
        client.user = user;
        client.client = get_str(info, "clientName").unwrap_or_default().to_owned();
        client.port = get_str(info, "serverAddress")
            .map(str::to_owned)
            .or_else(|| std::env::var("P4PORT").ok())
            .unwrap_or_default();
        Ok(client)
    }

    /// The server address the session is bound to.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Reads a server property (e.g. the advertised review-service URL).
    pub fn property(&self, name: &str) -> Result<Option<String>, VcsError> {
        let records = self.run_records(&["property", "-l", "-n", name], &["no such property"])?;
        Ok(records
            .iter()
            .find_map(|record| get_str(record, "value"))
            .map(str::to_owned))
    }

    /// Acquires a host-unlocked ticket with `p4 login -a -p`, feeding the
    /// password on stdin. Returns the ticket.
    pub fn login_with_password(&self, password: &str) -> Result<String, VcsError> {
        let mut command = Command::new(&self.executable);
        command
            .args(["login", "-a", "-p"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(?command, "spawning p4 login");
        let mut child = command
            .spawn()
            .map_err(|err| VcsError::failed_with("Could not execute the p4 process", err))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(format!("{password}\n").as_bytes())
                .map_err(|err| VcsError::failed_with("Could not send password to p4", err))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| VcsError::failed_with("Failed to wait for the p4 process", err))?;
        if !output.status.success() {
            return Err(VcsError::failed("Password invalid"));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let ticket = TICKET_RE
            .find(&stdout)
            .ok_or_else(|| VcsError::failed("Could not parse ticket from p4 login output"))?;
        Ok(ticket.as_str().to_owned())
    }

    fn create_command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        command.arg("-ztag").arg("-Mj").stdin(Stdio::null());
        command
    }

    /// Runs one tagged command and returns its JSON records. Error records
    /// whose message contains one of the `benign` needles (compared
    /// lowercase) are dropped; login expiry and everything else is raised.
    fn run_records(&self, args: &[&str], benign: &[&str]) -> Result<Vec<JsonRecord>, VcsError> {
        let mut command = self.create_command();
        command.args(args);
        debug!(?command, "spawning p4");
        let output = command
            .output()
            .map_err(|err| VcsError::failed_with("Could not execute the p4 process", err))?;

        let mut records = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let JsonValue::Object(record) = serde_json::from_str(line)
                .map_err(|err| VcsError::failed_with("Unparsable p4 output", err))?
            else {
                return Err(VcsError::failed(format!("Unexpected p4 output: {line}")));
            };
            records.push(record);
        }

        let had_records = !records.is_empty();
        let mut filtered = Vec::with_capacity(records.len());
        for record in records {
            if get_str(&record, "code") != Some("error") {
                filtered.push(record);
                continue;
            }
            let message = get_str(&record, "data").unwrap_or_default().trim().to_owned();
            if is_login_error(&message) {
                return Err(VcsError::LoginRequired);
            }
            let lower = message.to_lowercase();
            if benign.iter().any(|needle| lower.contains(needle)) {
                continue;
            }
            if lower.contains("must resolve") || lower.contains("needs resolve") {
                return Err(VcsError::Conflict { message });
            }
            if lower.contains("no such changelist") || lower.contains("unknown changelist") {
                return Err(VcsError::NotFound { message });
            }
            return Err(VcsError::failed(message));
        }

        if !had_records && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_login_error(&stderr) {
                return Err(VcsError::LoginRequired);
            }
            return Err(VcsError::failed(format!(
                "p4 {args} failed: {stderr}",
                args = args.join(" "),
                stderr = stderr.trim()
            )));
        }
        Ok(filtered)
    }

    /// Feeds a spec form to a plain-text command (`p4 change -i`) and
    /// returns its stdout.
    fn run_with_input(&self, args: &[&str], input: &str) -> Result<String, VcsError> {
        let mut command = Command::new(&self.executable);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(?command, "spawning p4");
        let mut child = command
            .spawn()
            .map_err(|err| VcsError::failed_with("Could not execute the p4 process", err))?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|err| VcsError::failed_with("Could not send spec to p4", err))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|err| VcsError::failed_with("Failed to wait for the p4 process", err))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_login_error(&stderr) {
            return Err(VcsError::LoginRequired);
        }
        if !output.status.success() {
            return Err(VcsError::failed(format!(
                "p4 {args} failed: {stderr}",
                args = args.join(" "),
                stderr = stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Renders a changelist spec form the way `p4 change -i` expects it.
    fn render_change_spec(
        &self,
        change: &str,
        status: &str,
        description: &str,
        files: &[String],
    ) -> String {
        let mut spec = String::new();
        spec.push_str(&format!("Change:\t{change}\n\n"));
        spec.push_str(&format!("Client:\t{client}\n\n", client = self.client));
        spec.push_str(&format!("User:\t{user}\n\n", user = self.user));
        spec.push_str(&format!("Status:\t{status}\n\n"));
        spec.push_str("Description:\n");
        for line in description.lines() {
            spec.push_str(&format!("\t{line}\n"));
        }
        if description.is_empty() {
            spec.push_str("\t\n");
        }
        if !files.is_empty() {
            spec.push_str("\nFiles:\n");
            for file in files {
                spec.push_str(&format!("\t{file}\n"));
            }
        }
        spec
    }
}

impl VcsClient for P4Client {
    fn user(&self) -> &str {
        &self.user
    }

    fn list_pending_changes(&self) -> Result<Vec<PendingChange>, VcsError> {
        let records = self.run_records(
            &["changes", "-s", "pending", "-u", &self.user, "-l"],
            &[],
        )?;
        let mut changes = Vec::new();
        for record in &records {
            let Some(number) = get_str(record, "change") else {
                continue;
            };
            changes.push(PendingChange {
                number: parse_change_number(number)?,
                description: get_str(record, "desc").unwrap_or_default().to_owned(),
            });
        }
        Ok(changes)
    }

    fn describe(&self, change: ChangeNumber) -> Result<DescribedChange, VcsError> {
        let change_arg = change.to_string();
        let records = self.run_records(&["describe", "-s", &change_arg], &[])?;
        let record = records.first().ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        let status = match get_str(record, "status") {
            Some("pending") | Some("new") => ChangeStatus::Pending,
            Some("submitted") => ChangeStatus::Submitted,
            other => {
                return Err(VcsError::failed(format!(
                    "Unexpected status {other:?} for changelist {change}"
                )));
            }
        };
        Ok(DescribedChange {
            number: change,
            description: get_str(record, "desc").unwrap_or_default().to_owned(),
            status,
        })
    }

    fn create_change(&self, description: &str) -> Result<ChangeNumber, VcsError> {
        let spec = self.render_change_spec("new", "new", description, &[]);
        let stdout = self.run_with_input(&["change", "-i"], &spec)?;
        let captures = CHANGE_CREATED_RE.captures(&stdout).ok_or_else(|| {
            VcsError::failed(format!("Could not parse new changelist number from: {stdout}"))
        })?;
        parse_change_number(&captures[1])
    }

    fn delete_change(&self, change: ChangeNumber) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        self.run_records(&["change", "-d", &change_arg], &[])?;
        Ok(())
    }

    fn update_description(
        &self,
        change: ChangeNumber,
        description: &str,
    ) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        let records = self.run_records(&["change", "-o", &change_arg], &[])?;
        let record = records.first().ok_or_else(|| VcsError::NotFound {
            message: format!("Changelist {change} not found"),
        })?;
        // Keep the file list; `change -i` replaces the whole spec.
        let mut files: Vec<String> = record
            .iter()
            .filter(|(key, _)| key.starts_with("Files"))
            .filter_map(|(_, value)| value.as_str().map(str::to_owned))
            .collect();
        files.sort();
        let status = get_str(record, "Status").unwrap_or("pending").to_owned();
        let spec = self.render_change_spec(&change_arg, &status, description, &files);
        self.run_with_input(&["change", "-i"], &spec)?;
        Ok(())
    }

    fn submit_change(&self, change: ChangeNumber) -> Result<ChangeNumber, VcsError> {
        let change_arg = change.to_string();
        let records = self.run_records(&["submit", "-c", &change_arg], &[])?;
        for record in &records {
            if let Some(submitted) = get_str(record, "submittedChange") {
                return parse_change_number(submitted);
            }
        }
        // Older servers only report the renumbering in a message record.
        for record in &records {
            if let Some(data) = get_str(record, "data")
                && let Some(captures) = CHANGE_SUBMITTED_RE.captures(data)
            {
                return parse_change_number(&captures[1]);
            }
        }
        Err(VcsError::failed(format!(
            "Could not parse submitted changelist number for {change}"
        )))
    }

    fn is_shelved(&self, change: ChangeNumber) -> Result<bool, VcsError> {
        let change_arg = change.to_string();
        let records = self.run_records(&["describe", "-S", "-s", &change_arg], &[])?;
        Ok(records
            .iter()
            .any(|record| record.keys().any(|key| key.starts_with("depotFile"))))
    }

    fn shelve(&self, change: ChangeNumber, mode: ShelveMode) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        match mode {
            ShelveMode::Replace => {
                self.run_records(&["shelve", "-f", "-c", &change_arg], &[])?;
            }
            ShelveMode::Delete => {
                self.run_records(
                    &["shelve", "-d", "-c", &change_arg],
                    &["no shelved files"],
                )?;
            }
        }
        Ok(())
    }

    fn unshelve(
        &self,
        source: ChangeNumber,
        target: ChangeNumber,
        force: bool,
    ) -> Result<(), VcsError> {
        let source_arg = source.to_string();
        let target_arg = target.to_string();
        let mut args = vec!["unshelve"];
        if force {
            args.push("-f");
        }
        args.extend(["-s", source_arg.as_str(), "-c", target_arg.as_str()]);
        self.run_records(&args, &["no such file(s)"])?;
        Ok(())
    }

    fn revert_change(&self, change: ChangeNumber) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        self.run_records(
            &["revert", "-c", &change_arg, "//..."],
            &["file(s) not open", "not opened"],
        )?;
        Ok(())
    }

    fn revert_all(&self) -> Result<(), VcsError> {
        self.run_records(&["revert", "//..."], &["file(s) not open", "not opened"])?;
        Ok(())
    }

    fn open_for_edit(
        &self,
        change: ChangeNumber,
        depot_paths: &[String],
    ) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        let mut args = vec!["edit", "-c", change_arg.as_str()];
        args.extend(depot_paths.iter().map(String::as_str));
        self.run_records(&args, &[])?;
        Ok(())
    }

    fn open_for_delete(
        &self,
        change: ChangeNumber,
        depot_paths: &[String],
    ) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        let mut args = vec!["delete", "-c", change_arg.as_str()];
        args.extend(depot_paths.iter().map(String::as_str));
        self.run_records(&args, &[])?;
        Ok(())
    }

    fn where_is(&self, depot_path: &str) -> Result<PathBuf, VcsError> {
        let records = self.run_records(&["where", depot_path], &[])?;
        records
            .iter()
            .find_map(|record| get_str(record, "path"))
            .map(PathBuf::from)
            .ok_or_else(|| VcsError::NotFound {
                message: format!("File not in client view: {depot_path}"),
            })
    }

    fn print_at(&self, change: ChangeNumber) -> Result<Vec<PrintEntry>, VcsError> {
        let spec = format!("//...@={change}");
        let records = self.run_records(
            &["print", &spec],
            &["no such file(s)", "empty changelist"],
        )?;
        let mut entries: Vec<PrintEntry> = Vec::new();
        for record in &records {
            if let Some(depot_path) = get_str(record, "depotFile") {
                entries.push(PrintEntry {
                    depot_path: depot_path.to_owned(),
                    content: BString::default(),
                });
            } else if let Some(data) = get_str(record, "data")
                && let Some(entry) = entries.last_mut()
            {
                // Large files arrive as several data chunks.
                entry.content.extend_from_slice(data.as_bytes());
            }
        }
        Ok(entries)
    }

    fn opened(&self, change: ChangeNumber) -> Result<Vec<OpenedFile>, VcsError> {
        let change_arg = change.to_string();
        let records = self.run_records(
            &["opened", "-c", &change_arg],
            &["file(s) not opened", "not opened on this client"],
        )?;
        Ok(records
            .iter()
            .filter_map(|record| get_str(record, "depotFile"))
            .map(|depot_path| OpenedFile {
                depot_path: depot_path.to_owned(),
            })
            .collect())
    }

    fn opened_in_default(&self) -> Result<Vec<OpenedFile>, VcsError> {
        let records = self.run_records(
            &["opened", "-c", "default"],
            &["file(s) not opened", "not opened on this client"],
        )?;
        Ok(records
            .iter()
            .filter_map(|record| get_str(record, "depotFile"))
            .map(|depot_path| OpenedFile {
                depot_path: depot_path.to_owned(),
            })
            .collect())
    }

    fn reopen(&self, change: ChangeNumber, depot_paths: &[String]) -> Result<(), VcsError> {
        let change_arg = change.to_string();
        let mut args = vec!["reopen", "-c", change_arg.as_str()];
        args.extend(depot_paths.iter().map(String::as_str));
        self.run_records(&args, &[])?;
        Ok(())
    }
}
