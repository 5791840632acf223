use anyhow::Context;
use clap::Parser;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use chord::config::Config;
use chord::dht::ChordDht;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;

    let dht = ChordDht::start(config).await?;
    println!("node running at {}", dht.self_peer());

    command_loop(&dht).await?;
    Ok(())
}

/// The interactive command surface. Payloads enter and leave the DHT as the
/// file's raw bytes; the ring never interprets them.
async fn command_loop(dht: &ChordDht) -> anyhow::Result<()> {
    let mut lines = BufReader::new(stdin()).lines();

    println!("commands: StoreFile <file>, LookUp <file>, PrintState, dump, quit");
    while let Some(line) = lines.next_line().await? {
        let args: Vec<&str> = line.split_whitespace().collect();
        match args.as_slice() {
            ["StoreFile", filename] => {
                let payload = match tokio::fs::read(filename)
                    .await
                    .with_context(|| format!("reading {filename}"))
                {
                    Ok(payload) => payload,
                    Err(e) => {
                        println!("{e:#}");
                        continue;
                    }
                };
                match dht.store_file(filename, payload).await {
                    Ok(owner) => println!("stored at {owner}"),
                    Err(e) => println!("store failed: {e}"),
                }
            }
            ["LookUp", filename] => match dht.fetch_file(filename).await {
                Ok(payload) => {
                    match dht.resolve(filename).await {
                        Ok(owner) => println!("held by {owner}"),
                        Err(e) => println!("owner lookup failed: {e}"),
                    }
                    println!("{}", String::from_utf8_lossy(&payload));
                }
                Err(e) => println!("lookup failed: {e}"),
            },
            ["PrintState"] => println!("{}", dht.snapshot()),
            ["dump"] => println!("{:#?}", dht.snapshot()),
            ["quit"] => {
                dht.shutdown().await;
                println!("bye");
                break;
            }
            [] => {}
            _ => println!("commands: StoreFile <file>, LookUp <file>, PrintState, dump, quit"),
        }
    }
    Ok(())
}
