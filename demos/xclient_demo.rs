use std::sync::Arc;
use std::time::Duration;

use geerpc::discovery::{MultiServersDiscovery, SelectMode};
use geerpc::option::Options;
use geerpc::server::Server;
use geerpc::service::ServiceBuilder;
use geerpc::xclient::XClient;
use geerpc::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Arith;

#[derive(Serialize, Deserialize, Clone)]
struct Args {
    num1: i64,
    num2: i64,
}

#[derive(Serialize, Default, Clone, Deserialize, Debug)]
struct Sum {
    value: i64,
}

impl Arith {
    fn sum(&self, args: Args) -> Result<Sum> {
        Ok(Sum {
            value: args.num1 + args.num2,
        })
    }
}

async fn start_server(addr: &'static str) -> Result<()> {
    let service = ServiceBuilder::new("Arith", Arith).method("Sum", Arith::sum).build();
    let server = Server::builder().add_service(service)?.build();
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "start rpc server");
    server.serve(listener).await
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    for addr in ["127.0.0.1:9991", "127.0.0.1:9992"] {
        tokio::spawn(start_server(addr));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let discovery = MultiServersDiscovery::new(vec![
        "tcp@127.0.0.1:9991".to_string(),
        "tcp@127.0.0.1:9992".to_string(),
    ]);
    let xclient = Arc::new(XClient::new(discovery, SelectMode::RoundRobin, Options::default()));

    for i in 0i64..4 {
        let args = Args { num1: i, num2: i * i };
        let cancel = CancellationToken::new();
        let reply: Sum = xclient.call("Arith.Sum", args, &cancel).await?;
        tracing::info!(i, reply = reply.value, "xclient call");
    }

    let broadcast_args = Args { num1: 10, num2: 20 };
    let reply: Sum = xclient.broadcast("Arith.Sum", broadcast_args).await?;
    tracing::info!(reply = reply.value, "xclient broadcast");

    xclient.close().await?;
    Ok(())
}
