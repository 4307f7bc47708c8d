// SPDX-License-Identifier: MIT

//! Agent development kit: model adapters, tools and errors

pub mod error;
pub mod model;
pub mod tool;
