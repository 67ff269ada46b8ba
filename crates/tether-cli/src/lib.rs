// Copyright 2025 Tether Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Tether CLI
//!
//! Support code for the `tether` binary.
//!
//! ## Key Commands
//!
//! - `tether server`: Serve the built-in demo handlers on one or more ports
//! - `tether call`: Make one call through a client pool (prints raw JSON)
//! - `tether simulate`: Drive many concurrent echo calls and report call stats
//!
//! Client commands take either `--config <file.toml>` or repeated
//! `--server host:port` flags. A long-running client started from a config
//! file watches it and reconfigures its pool when the file changes.

pub mod config;
pub mod params;
pub mod simulate;
