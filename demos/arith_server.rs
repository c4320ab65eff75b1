use std::time::Duration;

use geerpc::server::Server;
use geerpc::service::ServiceBuilder;
use geerpc::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Default)]
struct Arith;

#[derive(Deserialize)]
struct Args {
    num1: i64,
    num2: i64,
}

#[derive(Serialize, Default, Clone)]
struct Sum {
    value: i64,
}

impl Arith {
    fn sum(&self, args: Args) -> Result<Sum> {
        Ok(Sum {
            value: args.num1 + args.num2,
        })
    }

    fn sleep(&self, args: Args) -> Result<Sum> {
        std::thread::sleep(Duration::from_secs(2));
        Ok(Sum {
            value: args.num1 + args.num2,
        })
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let service = ServiceBuilder::new("Arith", Arith)
        .method("Sum", Arith::sum)
        .method("Sleep", Arith::sleep)
        .build();

    let server = Server::builder().add_service(service)?.build();

    let addr = "127.0.0.1:9999";
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "start rpc server");

    server.serve(listener).await?;

    Ok(())
}
