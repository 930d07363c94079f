//! bingo-sim: a room of simulated players on one in-memory mesh.
//!
//! ```text
//! cargo run -p bingo-sim -- --players 4 --rounds 2 --kill-host
//! RUST_LOG=meshroom_room=debug cargo run -p bingo-sim
//! ```

mod card;

use std::time::Duration;

use clap::Parser;
use meshroom::prelude::*;
use tokio::sync::mpsc;

use crate::card::BingoCard;

#[derive(Parser, Debug)]
#[command(name = "bingo-sim")]
#[command(about = "Simulate a serverless bingo room over an in-memory mesh")]
struct Args {
    /// Number of simulated players
    #[arg(short, long, default_value_t = 4)]
    players: usize,

    /// Room to join
    #[arg(long, default_value = "living-room")]
    room: String,

    /// Rounds to play before exiting
    #[arg(short, long, default_value_t = 1)]
    rounds: u32,

    /// Lines needed to win
    #[arg(long, default_value_t = 3)]
    win_lines: u8,

    /// Milliseconds between draws
    #[arg(long, default_value_t = 300)]
    draw_ms: u64,

    /// Shut the host down after a few draws to watch the room fail over
    #[arg(long)]
    kill_host: bool,

    /// Frame messages as JSON instead of binary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), MeshroomError> {
    meshroom::init_tracing();
    let args = Args::parse();
    if args.players < 2 {
        eprintln!("need at least 2 players");
        std::process::exit(2);
    }

    let config = RoomConfig {
        min_players: 2,
        win_lines: args.win_lines,
        countdown_secs: 3,
        draw_interval: Duration::from_millis(args.draw_ms),
        reset_grace: Duration::from_secs(2),
        ..RoomConfig::default()
    };
    let wire = if args.json {
        WireFormat::Json
    } else {
        WireFormat::Binary
    };

    let mesh = LocalMesh::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut nodes = Vec::with_capacity(args.players);
    for i in 0..args.players {
        let mut node = MeshNode::builder()
            .config(config.clone())
            .wire_format(wire)
            .rules(BingoCard::deal(config.number_pool))
            .build_local(&mesh, format!("node-{i:02}"));
        if let Some(mut events) = node.take_events() {
            let tx = tx.clone();
            let id = node.id().clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send((id.clone(), event)).is_err() {
                        break;
                    }
                }
            });
        }
        nodes.push(node);
    }
    drop(tx);

    for (i, node) in nodes.iter().enumerate() {
        node.join(args.room.as_str(), format!("Player {i}")).await?;
    }
    tracing::info!(players = args.players, room = %args.room, "all players joined");

    // The last node has the largest id, so it never hosts while anyone
    // else is around. Narrate the game from its point of view.
    let narrator = nodes[nodes.len() - 1].id().clone();
    let mut rounds_won = 0;
    let mut draws = 0;
    let mut killed = false;

    loop {
        let (from, event) = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = rx.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        if from != narrator {
            if let RoomEvent::BroadcastFailed { kind, reason } = event {
                tracing::warn!(%from, ?kind, %reason, "broadcast failed");
            }
            continue;
        }

        match event {
            RoomEvent::HostChanged { host, .. } => println!("host is now {host}"),
            RoomEvent::PhaseChanged(phase) => println!("-- {phase} --"),
            RoomEvent::CountdownTick(n) if n > 0 => println!("starting in {n}..."),
            RoomEvent::NumberDrawn(n) => {
                draws += 1;
                println!("drawn: {n}");
                if args.kill_host && !killed && draws == 5 {
                    killed = true;
                    if let Some(host) = nodes.first() {
                        println!("!! shutting down host {}", host.id());
                        host.shutdown().await?;
                    }
                }
            }
            RoomEvent::ProgressUpdated {
                id, completed_lines, ..
            } => println!("{id} has {completed_lines} line(s)"),
            RoomEvent::GameWon { name, .. } => {
                rounds_won += 1;
                println!("*** {name} wins round {rounds_won} ***");
                if rounds_won >= args.rounds {
                    break;
                }
                draws = 0;
            }
            RoomEvent::PlayerDisconnected(id) => println!("{id} went off the air"),
            RoomEvent::PlayerLeft(id) => println!("{id} left"),
            _ => {}
        }
    }

    for node in &nodes {
        // Already gone if it was killed.
        let _ = node.shutdown().await;
    }
    Ok(())
}
