// SPDX-License-Identifier: MIT

pub mod fanout;
pub mod graph;
pub mod guard;
pub mod refine;
pub mod state;
