use anyhow::{Error, Result};
use async_std::io::stdin;
use async_std::task;
use async_std::task::block_on;
use futures::StreamExt;
use gomoku::{ClientEvent, GameClient, Seat};
use log::{error, LevelFilter};
use std::env;

fn main() {
    env_logger::builder().filter_level(LevelFilter::Warn).init();
    if let Err(e) = block_on(run_client()) {
        error!("client stopped on error {}", e);
    }
}

async fn run_client() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        Err(Error::msg(
            "usage: ./client {address} {nickname}, example: ./client 127.0.0.1:8080 alice",
        ))?
    }
    let mut client = GameClient::connect(&args[1], &args[2], None).await?;
    let mut events = client.events().expect("events already taken");
    task::spawn(async move {
        while let Some(event) = events.next().await {
            let lost = matches!(event, ClientEvent::ConnectionLost);
            print_event(event);
            if lost {
                break;
            }
        }
    });

    println!("commands: /seat black|white, /leave, /start, /place X Y, /quit; anything else is chat");
    let input = stdin();
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).await? == 0 || !client.is_connected() {
            break;
        }
        if let Err(e) = run_command(&client, line.trim()).await {
            println!("! {e}");
        }
        if line.trim() == "/quit" {
            break;
        }
    }
    client.disconnect();
    Ok(())
}

async fn run_command(client: &GameClient, input: &str) -> Result<()> {
    let mut words = input.split_whitespace();
    match words.next() {
        None => Ok(()),
        Some("/seat") => match words.next() {
            Some("black") => client.join_seat(Seat::Black).await,
            Some("white") => client.join_seat(Seat::White).await,
            _ => Err(Error::msg("usage: /seat black|white")),
        },
        Some("/leave") => client.leave_seat().await,
        Some("/start") => client.start_game().await,
        Some("/place") => {
            let x = words.next().and_then(|w| w.parse::<u8>().ok());
            let y = words.next().and_then(|w| w.parse::<u8>().ok());
            match (x, y) {
                (Some(x), Some(y)) => client.place(x, y).await,
                _ => Err(Error::msg("usage: /place X Y")),
            }
        }
        Some("/quit") => Ok(()),
        Some(_) => client.chat(input).await,
    }
}

fn print_event(event: ClientEvent) {
    match event {
        ClientEvent::Connected { me, roster } => {
            println!("* connected as {} ({} online)", me.nickname, roster.len())
        }
        ClientEvent::PlayerJoined(p) => println!("* {} joined", p.nickname),
        ClientEvent::PlayerLeft(p) => println!("* {} left", p.nickname),
        ClientEvent::StonePlaced(mv) => {
            println!("* move {}: {:?} at ({}, {})", mv.seq, mv.color, mv.x, mv.y)
        }
        ClientEvent::PlacementRejected { reason, .. } => println!("* move rejected: {reason}"),
        ClientEvent::Chat { sender, text } => println!("<{}> {}", sender.nickname, text),
        ClientEvent::SeatJoined { seat, player } => {
            println!("* {} took the {:?} seat", player.nickname, seat)
        }
        ClientEvent::SeatLeft { seat, player } => {
            println!("* {} left the {:?} seat", player.nickname, seat)
        }
        ClientEvent::TimeUpdated { seat, seconds_left } => {
            println!("* {seat:?} has {seconds_left}s left")
        }
        ClientEvent::GameStarted => println!("* game started, black to move"),
        ClientEvent::GameEnded { winner, reason } => {
            println!("* game over: {winner:?} wins ({reason})")
        }
        ClientEvent::SyncReceived(sync) => {
            println!("* synced: {} moves, {:?} to move", sync.moves.len(), sync.current_turn)
        }
        ClientEvent::ConnectionLost => println!("* connection lost"),
    }
}
