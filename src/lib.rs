// Copyright 2026 The Tickertape Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod frame;
pub mod normalize;
pub mod reader;
pub mod relay;
pub mod server;
pub mod tools;
pub mod upstream;
