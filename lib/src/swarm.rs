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

//! Client for a Helix-Swarm-style review service.
//!
//! Authentication reuses the Perforce identity: HTTP basic auth with the
//! user name and a host-unlocked session ticket. Tickets are cached on disk
//! so the user isn't prompted for a password on every upload.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::vcs::ChangeNumber;

/// Review identifier assigned by the review service.
pub type ReviewId = u64;

const API_VERSION: &str = "v11";
/// The description PATCH endpoint only exists in the older API.
const PATCH_API_VERSION: &str = "v9";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[expect(missing_docs)]
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Review service authentication failed")]
    Auth,
    #[error("{0}")]
    Config(String),
    #[error("{message}")]
    Api {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },
}

impl SwarmError {
    fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            source: None,
        }
    }

    fn api_with(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Api {
            message: message.into(),
            source: Some(source),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReviewEntry {
    id: ReviewId,
    #[serde(default)]
    changes: Vec<ChangeNumber>,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewListData {
    #[serde(default)]
    reviews: Vec<ReviewEntry>,
}

#[derive(Debug, Deserialize)]
struct ReviewListResponse {
    #[serde(default)]
    data: ReviewListData,
}

#[derive(Debug, Default, Deserialize)]
struct ReviewCreateData {
    #[serde(default)]
    review: Vec<ReviewEntry>,
}

#[derive(Debug, Deserialize)]
struct ReviewCreateResponse {
    #[serde(default)]
    data: ReviewCreateData,
}

/// Resolves the review-service base URL: `$SWARM_URL` wins, otherwise the
/// server-advertised property is used.
pub fn resolve_swarm_url(
    property: Option<String>,
) -> Result<String, SwarmError> {
    if let Ok(url) = std::env::var("SWARM_URL")
        && !url.trim().is_empty()
    {
        return Ok(url.trim_end_matches('/').to_owned());
    }
    if let Some(url) = property
        && !url.trim().is_empty()
    {
        return Ok(url.trim_end_matches('/').to_owned());
    }
    Err(SwarmError::Config(
        "Could not determine the review service URL. Set the SWARM_URL environment variable or \
         configure P4.Swarm.URL on the server"
            .to_owned(),
    ))
}

/// Blocking REST client for the review service.
pub struct SwarmClient {
    http: reqwest::blocking::Client,
    base_url: String,
    user: String,
    ticket: String,
}

impl SwarmClient {
    /// Creates a client for `base_url` authenticating as `user` with a
    /// host-unlocked `ticket`.
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        ticket: impl Into<String>,
    ) -> Result<Self, SwarmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| SwarmError::api_with("Could not build HTTP client", err))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            user: user.into(),
            ticket: ticket.into(),
        })
    }

    /// The base URL, for building user-facing review links.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The browsable URL of a review.
    pub fn review_url(&self, review: ReviewId) -> String {
        format!("{base}/reviews/{review}", base = self.base_url)
    }

    /// Finds the review associated with a changelist, if one exists.
    ///
    /// The service lists a review's changelists as `[original CL, shelf
    /// copy]`; only the first entry identifies the review.
    pub fn get_review_id(
        &self,
        change: ChangeNumber,
    ) -> Result<Option<ReviewId>, SwarmError> {
        let url = format!(
            "{base}/api/{API_VERSION}/reviews",
            base = self.base_url
        );
        let response = self
            .http
            .get(url)
            .basic_auth(&self.user, Some(&self.ticket))
            .query(&[("author", self.user.as_str())])
            .send()
            .map_err(|err| {
                SwarmError::api_with(format!("Network error fetching review for CL {change}"), err)
            })?;
        let response = check_status(response, change)?;
        let parsed: ReviewListResponse = response.json().map_err(|err| {
            SwarmError::api_with(format!("Unparsable review list for CL {change}"), err)
        })?;
        let found = parsed
            .data
            .reviews
            .iter()
            .find(|review| review.changes.first() == Some(&change))
            .map(|review| review.id);
        debug!(change, ?found, "review lookup");
        Ok(found)
    }

    /// Creates a new review for a changelist.
    pub fn create_review(
        &self,
        change: ChangeNumber,
        description: &str,
    ) -> Result<ReviewId, SwarmError> {
        let url = format!(
            "{base}/api/{API_VERSION}/reviews",
            base = self.base_url
        );
        let response = self
            .http
            .post(url)
            .basic_auth(&self.user, Some(&self.ticket))
            .form(&[
                ("change", change.to_string()),
                ("description", description.to_owned()),
            ])
            .send()
            .map_err(|err| {
                SwarmError::api_with(format!("Network error creating review for CL {change}"), err)
            })?;
        let response = check_status(response, change)?;
        let parsed: ReviewCreateResponse = response.json().map_err(|err| {
            SwarmError::api_with(format!("Unparsable create-review response for CL {change}"), err)
        })?;
        let review = parsed
            .data
            .review
            .first()
            .ok_or_else(|| SwarmError::api(format!("No review entry in response for CL {change}")))?;
        debug!(change, review = review.id, "created review");
        Ok(review.id)
    }

    /// Replaces the description of an existing review.
    pub fn update_review_description(
        &self,
        review: ReviewId,
        description: &str,
    ) -> Result<(), SwarmError> {
        let url = format!(
            "{base}/api/{PATCH_API_VERSION}/reviews/{review}",
            base = self.base_url
        );
        let response = self
            .http
            .patch(url)
            .basic_auth(&self.user, Some(&self.ticket))
            .form(&[("description", description)])
            .send()
            .map_err(|err| {
                SwarmError::api_with(format!("Network error updating review {review}"), err)
            })?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SwarmError::Auth);
        }
        response
            .error_for_status()
            .map_err(|err| SwarmError::api_with(format!("Failed to update review {review}"), err))?;
        Ok(())
    }
}

fn check_status(
    response: reqwest::blocking::Response,
    change: ChangeNumber,
) -> Result<reqwest::blocking::Response, SwarmError> {
    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SwarmError::Auth);
    }
    response.error_for_status().map_err(|err| {
        SwarmError::api_with(format!("Review service request failed for CL {change}"), err)
    })
}

/// On-disk cache of the host-unlocked ticket, so one password prompt lasts
/// a work day.
///
/// The file stores user, server address, ticket and creation timestamp on
/// separate lines, private to the user.
#[derive(Clone, Debug)]
pub struct TicketCache {
    path: PathBuf,
}

/// Tickets default to a 12-hour server lifetime; refresh an hour early.
const TICKET_VALIDITY: Duration = Duration::from_secs(11 * 60 * 60);

impl TicketCache {
    /// The default cache location under the user's home directory.
    pub fn new() -> Result<Self, SwarmError> {
        let home = etcetera::home_dir().map_err(|err| {
            SwarmError::Config(format!("Could not locate the home directory: {err}"))
        })?;
        Ok(Self {
            path: home.join(".p4stack").join("ticket"),
        })
    }

    /// A cache at an explicit path.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the cached ticket if it matches `user`/`port`, looks like a
    /// ticket, and has not outlived its validity window.
    pub fn read(&self, user: &str, port: &str) -> Option<String> {
        let content = fs::read_to_string(&self.path).ok()?;
        let mut lines = content.lines();
        let (cached_user, cached_port, ticket, timestamp) = (
            lines.next()?,
            lines.next()?,
            lines.next()?,
            lines.next()?,
        );
        if cached_user != user || cached_port != port {
            return None;
        }
        if ticket.len() != 32 || !ticket.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let created: f64 = timestamp.parse().ok()?;
        let now = unix_seconds();
        if now - created >= TICKET_VALIDITY.as_secs_f64() {
            debug!("cached ticket expired");
            self.clear();
            return None;
        }
        Some(ticket.to_owned())
    }

    /// Stores a freshly acquired ticket.
    pub fn write(&self, user: &str, port: &str, ticket: &str) -> Result<(), SwarmError> {
        let io_error = |err: io::Error| {
            SwarmError::Config(format!(
                "Could not cache ticket at {path}: {err}",
                path = self.path.display()
            ))
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt as _;
                fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                    .map_err(io_error)?;
            }
        }
        let timestamp = unix_seconds();
        fs::write(&self.path, format!("{user}\n{port}\n{ticket}\n{timestamp}\n"))
            .map_err(io_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(io_error)?;
        }
        Ok(())
    }

    /// Drops the cached ticket. Failures are logged, not raised.
    pub fn clear(&self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(%err, "could not clear cached ticket");
        }
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const TICKET: &str = "0123456789ABCDEF0123456789ABCDEF";

    #[test]
    fn test_ticket_cache_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = TicketCache::with_path(temp_dir.path().join("ticket"));
        assert_eq!(cache.read("alice", "perforce:1666"), None);

        cache.write("alice", "perforce:1666", TICKET).unwrap();
        assert_eq!(
            cache.read("alice", "perforce:1666"),
            Some(TICKET.to_owned())
        );
        // A different user or server must not reuse the ticket.
        assert_eq!(cache.read("bob", "perforce:1666"), None);
        assert_eq!(cache.read("alice", "other:1666"), None);

        cache.clear();
        assert_eq!(cache.read("alice", "perforce:1666"), None);
    }

    #[test]
    fn test_ticket_cache_rejects_malformed_ticket() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = TicketCache::with_path(temp_dir.path().join("ticket"));
        cache.write("alice", "perforce:1666", "not-a-ticket").unwrap();
        assert_eq!(cache.read("alice", "perforce:1666"), None);
    }

    #[test]
    fn test_ticket_cache_expires() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = TicketCache::with_path(temp_dir.path().join("ticket"));
        let stale = unix_seconds() - TICKET_VALIDITY.as_secs_f64() - 1.0;
        fs::write(
            cache.path.clone(),
            format!("alice\nperforce:1666\n{TICKET}\n{stale}\n"),
        )
        .unwrap();
        assert_eq!(cache.read("alice", "perforce:1666"), None);
        // The stale file is cleared on the failed read.
        assert!(!cache.path.exists());
    }
}
