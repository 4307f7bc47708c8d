// SPDX-License-Identifier: MIT

//! Place-recommendation service: the refinement pipeline, the agent
//! loop, and the collaborators they call.

pub mod agent;
pub mod config;
pub mod geocode;
pub mod search;
pub mod server;
pub mod tools;
pub mod workflow;
