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

#![warn(missing_docs)]

//! Core library of p4stack: a stacked-changelist workflow for
//! Perforce-style servers.
//!
//! Pending changelists are linked into stacks with `Depends-On:` tags in
//! their descriptions ([`graph`], [`depends`]). A fix applied at the base
//! of a stack is propagated through every descendant's shelf by three-way
//! merge ([`rebase`], [`merge`], [`snapshot`]), pausing on conflicts and
//! resuming from a durable operation log ([`op_log`]). All server access
//! goes through the [`vcs::VcsClient`] trait; [`p4_subprocess`] implements
//! it over the `p4` binary, and [`swarm`] talks to the companion review
//! service.

pub mod depends;
pub mod editor;
pub mod graph;
pub mod merge;
pub mod op_log;
pub mod p4_subprocess;
pub mod rebase;
pub mod snapshot;
pub mod swarm;
pub mod vcs;
