use std::sync::Arc;
use std::time::Duration;

use geerpc::server::Server;
use geerpc::service::ServiceBuilder;
use geerpc::Result;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Default)]
pub struct Arith;

#[derive(Serialize, Deserialize, Clone)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct Sum {
    pub value: i64,
}

impl Arith {
    pub fn sum(&self, args: Args) -> Result<Sum> {
        Ok(Sum {
            value: args.num1 + args.num2,
        })
    }

    pub fn sleep(&self, args: Args) -> Result<Sum> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(Sum {
            value: args.num1 + args.num2,
        })
    }
}

/// Bind an `Arith` service on an ephemeral port, serve it in the background,
/// and return its address. The per-request handle timeout is whatever the
/// dialing client negotiates via [`geerpc::option::Options::handle_timeout`].
pub async fn spawn_arith_server() -> Result<String> {
    let service = ServiceBuilder::new("Arith", Arith)
        .method("Sum", Arith::sum)
        .method("Sleep", Arith::sleep)
        .build();
    let server: Arc<Server> = Server::builder().add_service(service)?.build();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    Ok(addr)
}
