//! Chat log server binary.
//! Run with: cargo run --bin chatlog-server

use std::process::ExitCode;

use chatlog_service::start_chatlog_server;

fn main() -> ExitCode {
    start_chatlog_server::run()
}
