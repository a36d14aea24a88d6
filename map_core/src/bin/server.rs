use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};

use map_core::{
    epoch_ms, EngineConfig, LandmarkSpec, Orchestrator, PaintCell,
};

const DEFAULT_COMMAND_BIND: &str = "127.0.0.1:4050";

fn main() {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => match EngineConfig::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config {path}: {err}");
                std::process::exit(1);
            }
        },
        None => EngineConfig::builtin(),
    };

    let bind = env::var("MAP_COMMAND_BIND").unwrap_or_else(|_| DEFAULT_COMMAND_BIND.to_string());
    let mut orchestrator = Orchestrator::new(config);
    let command_rx = spawn_command_listener(&bind);

    info!(
        "map engine ready: grid {0}x{0}, {1} workers, commands on {bind}",
        orchestrator.config().grid_size,
        orchestrator.worker_count()
    );

    while let Ok(command) = command_rx.recv() {
        handle_command(&mut orchestrator, command);
    }
}

#[derive(Debug)]
enum Command {
    RegisterFaction { id: String },
    RegisterPlayer { id: String },
    Paint {
        faction: String,
        player: String,
        cells: Vec<PaintCell>,
    },
    Ally { a: String, b: String },
    Landmark {
        name: String,
        x: u32,
        y: u32,
        radius: u32,
        owner: Option<String>,
    },
    Stats,
    Maintain,
    Integrity,
    Export { path: String },
    Remove { faction: String },
    Cede { from: String, to: String },
}

fn handle_command(orchestrator: &mut Orchestrator, command: Command) {
    let now_ms = epoch_ms();
    match command {
        Command::RegisterFaction { id } => match orchestrator.register_faction(&id) {
            Ok(index) => info!("faction {id:?} -> index {index}"),
            Err(err) => warn!("faction registration failed: {err}"),
        },
        Command::RegisterPlayer { id } => match orchestrator.register_player(&id) {
            Ok(index) => info!("player {id:?} -> index {index}"),
            Err(err) => warn!("player registration failed: {err}"),
        },
        Command::Paint {
            faction,
            player,
            cells,
        } => match orchestrator.plan_paint(&faction, &player, cells, &[], &[], now_ms) {
            Ok(plan) => {
                let outcome = orchestrator.commit_paint(&plan);
                info!(
                    "paint by {faction:?}: {} applied, cost {}, success rate {:.2}",
                    outcome.applied, outcome.cost, plan.success_rate
                );
                for verdict in plan.verdicts.iter().filter(|v| !v.verdict.is_accepted()) {
                    info!(
                        "  rejected ({}, {}): {}",
                        verdict.x,
                        verdict.y,
                        verdict.verdict.reason()
                    );
                }
            }
            Err(err) => warn!("paint rejected: {err}"),
        },
        Command::Ally { a, b } => {
            orchestrator.set_alliances(&[(a.clone(), b.clone())]);
            info!("alliance set: {a:?} <-> {b:?}");
        }
        Command::Landmark {
            name,
            x,
            y,
            radius,
            owner,
        } => {
            orchestrator.set_landmarks(&[LandmarkSpec {
                name: name.clone(),
                x,
                y,
                radius,
                owner,
            }]);
            info!("landmark {name:?} placed at ({x}, {y}), radius {radius}");
        }
        Command::Stats => match orchestrator.collect_stats(now_ms) {
            Ok(stats) => {
                for entry in stats {
                    let id = orchestrator
                        .shared()
                        .faction_id(entry.faction)
                        .unwrap_or_default();
                    info!(
                        "faction {id:?}: {} tiles, {} cores, {} points",
                        entry.tiles, entry.cores, entry.points
                    );
                }
            }
            Err(err) => warn!("stats failed: {err}"),
        },
        Command::Maintain => match orchestrator.run_maintenance(now_ms) {
            Ok(report) => info!(
                "maintenance: +{} cores, {} pending, {} expired, {} permanent",
                report.promoted, report.pending_marked, report.expired, report.made_permanent
            ),
            Err(err) => warn!("maintenance failed: {err}"),
        },
        Command::Integrity => match orchestrator.run_integrity(now_ms) {
            Ok(fixed) => info!("integrity pass corrected {fixed} cells"),
            Err(err) => warn!("integrity pass failed: {err}"),
        },
        Command::Export { path } => match orchestrator.export_tmap(now_ms as u64) {
            Ok(bytes) => match fs::write(&path, &bytes) {
                Ok(()) => info!("exported {} bytes to {path}", bytes.len()),
                Err(err) => warn!("export write failed: {err}"),
            },
            Err(err) => warn!("export failed: {err}"),
        },
        Command::Remove { faction } => match orchestrator.remove_faction(&faction) {
            Ok(cleared) => info!("faction {faction:?} removed, {cleared} cells cleared"),
            Err(err) => warn!("removal failed: {err}"),
        },
        Command::Cede { from, to } => match orchestrator.cede_territory(&from, &to, now_ms) {
            Ok(moved) => info!("cede: {moved} cells from {from:?} to {to:?}"),
            Err(err) => warn!("cede failed: {err}"),
        },
    }
}

fn spawn_command_listener(bind_addr: &str) -> Receiver<Command> {
    let listener = TcpListener::bind(bind_addr).expect("command listener bind failed");
    listener
        .set_nonblocking(true)
        .expect("set_nonblocking failed");

    let (sender, receiver) = unbounded::<Command>();
    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("command client connected: {addr}");
                let sender = sender.clone();
                thread::spawn(move || handle_client(stream, sender));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(50));
            }
            Err(err) => {
                warn!("error accepting command client: {err}");
                thread::sleep(std::time::Duration::from_millis(200));
            }
        }
    });

    receiver
}

fn handle_client(stream: TcpStream, sender: Sender<Command>) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => Some(writer),
        Err(_) => None,
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match parse_command(trimmed) {
                    Some(cmd) => {
                        if sender.send(cmd).is_err() {
                            break;
                        }
                        if let Some(writer) = writer.as_mut() {
                            let _ = writer.write_all(b"ok\n");
                        }
                    }
                    None => {
                        warn!("invalid command: {trimmed}");
                        if let Some(writer) = writer.as_mut() {
                            let _ = writer.write_all(b"err\n");
                        }
                    }
                }
            }
            Err(err) => {
                warn!("command read error: {err}");
                break;
            }
        }
    }
}

fn parse_command(input: &str) -> Option<Command> {
    let mut parts = input.split_whitespace();
    match parts.next()? {
        "faction" => Some(Command::RegisterFaction {
            id: parts.next()?.to_string(),
        }),
        "player" => Some(Command::RegisterPlayer {
            id: parts.next()?.to_string(),
        }),
        // paint <faction> <player> <x,y,color> [<x,y,color> ...]
        "paint" => {
            let faction = parts.next()?.to_string();
            let player = parts.next()?.to_string();
            let cells: Vec<PaintCell> = parts.map(parse_paint_cell).collect::<Option<_>>()?;
            if cells.is_empty() {
                return None;
            }
            Some(Command::Paint {
                faction,
                player,
                cells,
            })
        }
        "ally" => Some(Command::Ally {
            a: parts.next()?.to_string(),
            b: parts.next()?.to_string(),
        }),
        // landmark <name> <x> <y> <radius> [owner]
        "landmark" => Some(Command::Landmark {
            name: parts.next()?.to_string(),
            x: parts.next()?.parse().ok()?,
            y: parts.next()?.parse().ok()?,
            radius: parts.next()?.parse().ok()?,
            owner: parts.next().map(str::to_string),
        }),
        "stats" => Some(Command::Stats),
        "maintain" => Some(Command::Maintain),
        "integrity" => Some(Command::Integrity),
        "export" => Some(Command::Export {
            path: parts.next()?.to_string(),
        }),
        "remove" => Some(Command::Remove {
            faction: parts.next()?.to_string(),
        }),
        "cede" => Some(Command::Cede {
            from: parts.next()?.to_string(),
            to: parts.next()?.to_string(),
        }),
        _ => None,
    }
}

fn parse_paint_cell(token: &str) -> Option<PaintCell> {
    let mut fields = token.split(',');
    let x = fields.next()?.parse().ok()?;
    let y = fields.next()?.parse().ok()?;
    let color = match fields.next() {
        Some(raw) => u32::from_str_radix(raw.trim_start_matches("0x"), 16).ok()?,
        None => 0xFF_FFFF,
    };
    Some(PaintCell { x, y, color })
}
