use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use meshfs::{resolve_self_host, Node, NodeConfig, SelfIdentity, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "meshfs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Logical id announced during verification.
    #[arg(short, long)]
    id: String,

    /// Externally reachable host peers connect back to. Falls back to the
    /// MESHFS_HOST environment variable; startup fails without one.
    #[arg(long)]
    host: Option<String>,

    /// Mesh listen port (shared by the whole mesh).
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address the listener binds to.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Peer directory file (known hosts and identities).
    #[arg(short, long, default_value = "meshfs.json")]
    config: PathBuf,

    /// Directory for stored replicas.
    #[arg(short, long, default_value = "meshfs-data")]
    data_dir: PathBuf,

    /// Skip connecting to previously seen hosts at startup.
    #[arg(long)]
    no_join: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let host = resolve_self_host(args.host)?;
    let me = SelfIdentity::new(host, args.port, args.id);

    let mut config = NodeConfig::new(me, args.config, args.data_dir);
    config.bind_host = args.bind;
    let node = Node::start(config).await?;

    println!("meshfs node {} at {}", node.me().id, node.me().endpoint());
    if !args.no_join {
        node.join().await;
    }
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();

        match (command, rest.as_slice()) {
            ("nodes", []) => {
                for peer in node.peers() {
                    let standing = if peer.verified {
                        "verified"
                    } else if peer.connected {
                        "connected"
                    } else {
                        "seen"
                    };
                    let id = peer.id.unwrap_or_else(|| "-".into());
                    println!("{:<15} {:<10} {}", peer.host, id, standing);
                }
            }
            ("files", []) => {
                for record in node.files() {
                    let replicas: Vec<&str> =
                        record.replicas.iter().map(String::as_str).collect();
                    println!(
                        "{:<20} uploader={} replicas=[{}]",
                        record.filename,
                        record.uploader,
                        replicas.join(", ")
                    );
                }
            }
            ("add", [path]) => match node.upload(std::path::Path::new(path), 0).await {
                Ok(targets) => println!("uploading to {} peer(s)", targets.len()),
                Err(e) => println!("upload failed: {e}"),
            },
            ("delete", [filename]) => match node.delete(filename).await {
                Ok(()) => println!("deleted {filename}"),
                Err(e) => println!("delete failed: {e}"),
            },
            ("get", [filename, dest]) => {
                match node.download(filename, std::path::Path::new(dest)).await {
                    Ok(()) => println!("downloaded {filename} to {dest}"),
                    Err(e) => println!("download failed: {e}"),
                }
            }
            ("join", []) => {
                node.join().await;
                println!("join attempts finished");
            }
            ("connect", [host]) => match node.connect(host).await {
                Ok(()) => println!("connecting to {host}..."),
                Err(e) => println!("connect failed: {e}"),
            },
            ("netinfo", []) => {
                let info = node.netinfo();
                println!(
                    "seen={} connected={} verified={}",
                    info.seen, info.connected, info.verified
                );
                println!("identities: {}", info.identities.join(", "));
            }
            ("myinfo", []) => {
                println!("{} at {}", node.me().id, node.me().endpoint());
            }
            ("help", []) => print_help(),
            ("quit", []) | ("exit", []) => break,
            _ => println!("unrecognized command, try 'help'"),
        }
    }

    node.shutdown();
    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  nodes                    list seen hosts and their standing");
    println!("  files                    list the replica catalog");
    println!("  add <path>               upload a file into the mesh");
    println!("  get <filename> <dest>    download a replicated file");
    println!("  delete <filename>        delete a file mesh-wide");
    println!("  join                     connect to all previously seen hosts");
    println!("  connect <host>           connect to one host");
    println!("  netinfo                  membership summary");
    println!("  myinfo                   this node's identity");
    println!("  quit                     exit");
}
