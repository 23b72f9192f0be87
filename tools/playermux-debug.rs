//! Debug tool: list the players playermux tracks and optionally tail its
//! change notifications.

use clap::Parser;
use futures::{StreamExt, pin_mut};
use playermux::{Config, MuxEvent, PlayerMuxService};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "playermux-debug", about = "Inspect playermux discovery and election")]
struct Args {
    /// Application identity or desktop entry to blacklist (repeatable)
    #[arg(long = "blacklist")]
    blacklist: Vec<String>,

    /// Keep running and print every change notification
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let service = PlayerMuxService::start(Config {
        blacklist: args.blacklist,
    })
    .await?;

    print_players(&service).await;

    if args.watch {
        let events = service.events();
        pin_mut!(events);

        println!("\nWatching for changes (ctrl-c to stop)...");
        loop {
            tokio::select! {
                event = events.next() => {
                    let Some(event) = event else { break };
                    match event {
                        MuxEvent::PlayersChanged { dirty } => {
                            println!("players changed ({dirty:?})");
                            print_players(&service).await;
                        }
                        MuxEvent::SelectionChanged { player } => match player {
                            Some(id) => println!("active player -> {id}"),
                            None => println!("active player -> none"),
                        },
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

async fn print_players(service: &PlayerMuxService) {
    let active = service.active_player().map(|p| p.id().clone());

    let all = service.all_players().await;
    if all.is_empty() {
        println!("No MPRIS players on the bus");
        return;
    }

    for player in all {
        let marker = if active.as_ref() == Some(player.id()) {
            "*"
        } else {
            " "
        };
        let identity = player.identity().unwrap_or_else(|| "<no identity>".to_string());
        let title = player
            .metadata()
            .title
            .unwrap_or_else(|| "<no track>".to_string());

        println!(
            "{marker} {id}  {identity}  [{status:?}{invalid}{pinned}]  {title}",
            id = player.id(),
            status = player.playback_status(),
            invalid = if player.is_invalid() { ", invalid" } else { "" },
            pinned = if player.is_pinned() { ", pinned" } else { "" },
        );
    }
}
