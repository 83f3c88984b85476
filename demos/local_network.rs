//! Spin up an in-memory network, publish a value and a provider record from
//! one node, and resolve both from another.
//!
//! Run: `cargo run --example local_network -- --nodes 20`

use std::time::{Duration, Instant};

use kadmux::{Bytes, Context, Key, Testnet};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes in the network
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,
    /// Key to publish
    #[arg(short, long, default_value = "QmHelloWorld")]
    key: String,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let start = Instant::now();
    let testnet = Testnet::new(cli.nodes.max(2)).expect("failed to build testnet");

    println!(
        "Started {} nodes in {:?}",
        testnet.nodes.len(),
        start.elapsed()
    );

    let publisher = &testnet.nodes[1];
    let resolver = testnet.nodes.last().expect("at least two nodes");

    let ctx = Context::background().with_timeout(Duration::from_secs(30));
    let key = Key::from(cli.key.as_str());

    let start = Instant::now();
    publisher
        .put_value(&ctx, key.clone(), Bytes::from_static(b"Hello World!"))
        .expect("put_value failed");
    println!("\nStored {key} in {:?}", start.elapsed());

    let start = Instant::now();
    match resolver.get_value(&ctx, &key).expect("get_value failed") {
        Some(value) => println!(
            "Resolved {key} = {:?} in {:?}",
            String::from_utf8_lossy(&value),
            start.elapsed()
        ),
        None => println!("Could not resolve {key}"),
    }

    publisher.provide(&ctx, &key).expect("provide failed");

    let start = Instant::now();
    let providers = resolver
        .find_providers(&ctx, &key, 5)
        .expect("find_providers failed");

    println!("\nFound {} provider(s) in {:?}", providers.len(), start.elapsed());
    for provider in providers {
        println!("  {provider}");
    }

    println!("\nRouting table sizes:");
    for (i, node) in testnet.nodes.iter().enumerate() {
        println!("  node {i:>3}: {} peers", node.size());
    }
}
