use geerpc::client::dial;
use geerpc::option::Options;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Serialize)]
struct Args {
    num1: i64,
    num2: i64,
}

#[derive(Deserialize, Debug)]
struct Sum {
    value: i64,
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let client = dial("127.0.0.1:9999", Options::default()).await?;
    let client_ref = &client;

    let mut handles = Vec::new();
    for i in 0i64..5 {
        let args = Args { num1: i, num2: i * i };
        handles.push(async move {
            let reply: Sum = client_ref
                .call_uncancellable("Arith.Sum", args)
                .await
                .expect("call failed");
            tracing::info!(num1 = i, num2 = i * i, reply = reply.value, "call Arith.Sum success");
        });
    }
    futures::future::join_all(handles).await;

    let cancel = CancellationToken::new();
    let slow_args = Args { num1: 1, num2: 1 };
    match client
        .call::<_, Sum>("Arith.Sleep", slow_args, &cancel)
        .await
    {
        Ok(reply) => tracing::info!(reply = reply.value, "call Arith.Sleep success"),
        Err(err) => tracing::warn!(error = %err, "call Arith.Sleep failed"),
    }

    Ok(())
}
