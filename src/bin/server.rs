use async_std::task::block_on;
use gomoku::{start_server, DoubleThreeMode, RuleDescriptor, ServerConfig};
use log::{error, LevelFilter};
use std::env;

fn main() {
    env_logger::builder()
        .filter_module("gomoku", LevelFilter::Info)
        .init();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        println!("usage: ./server {{address}} [both-allowed|white-only|both-forbidden]");
        println!("example: ./server 127.0.0.1:8080 white-only");
        return;
    }
    let addr = args[1].clone();
    let mode = match args.get(2).map(|s| s.as_str()) {
        None | Some("white-only") => DoubleThreeMode::WhiteOnlyAllowed,
        Some("both-allowed") => DoubleThreeMode::BothAllowed,
        Some("both-forbidden") => DoubleThreeMode::BothForbidden,
        Some(other) => {
            println!("unknown rule mode: {other}");
            return;
        }
    };
    let config = ServerConfig {
        rules: vec![RuleDescriptor::DoubleThree { mode }],
        ..ServerConfig::default()
    };
    if let Err(e) = block_on(start_server(addr.as_str(), config)) {
        error!("server ended in error: {e}");
    }
}
