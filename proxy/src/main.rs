// Copyright 2022 Ryan Seipp
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

//! Process entry point: parses CLI arguments, wires up the blacklist, cache, handler, and
//! scheduler, then accepts connections until the process is killed.

use std::net::TcpListener;
use std::process::ExitCode;

use clap::Parser;

use proxy::{Blacklist, ProxyConfig, RequestHandler, ResponseCache, Scheduler};

fn main() -> ExitCode {
    env_logger::init();
    let config = ProxyConfig::parse();

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: ProxyConfig) -> std::io::Result<()> {
    let blacklist = Blacklist::load(&config.blacklist)?;
    log::info!("loaded blacklist from {}", config.blacklist.display());

    let cache = ResponseCache::open(config.cache_dir.clone(), config.clean_cache)?;
    log::info!("cache directory ready at {}", config.cache_dir.display());

    let self_ip = config.listen.ip().to_string();
    let handler = RequestHandler::new(blacklist, cache, config.max_message_size, self_ip);
    let scheduler = Scheduler::new(handler, config.workers);

    let listener = TcpListener::bind(config.listen)?;
    log::info!("listening on {}", config.listen);

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("failed to accept connection: {err}");
                continue;
            }
        };

        let client_ip = stream
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        scheduler.schedule_request(stream, client_ip);
    }

    Ok(())
}
