#![forbid(unsafe_code)]
//! StarNotary node: opens the ledger and serves the HTTP API.

use std::sync::Arc;
use starnotary::node::Node;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let node = Arc::new(Node::init().await?);
    node.start().await
}
