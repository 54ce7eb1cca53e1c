use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rabbitmq::RabbitConnection;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notice_dispatch::notice::ResultSlot;
use notice_dispatch::remote::{RabbitBridgeConsumer, RabbitTransport, UNPROCESSED_REMOTE_MESSAGE};
use notice_dispatch::{
    Command, Config, DispatchMode, Facade, HandlerContext, HandlerResult, Message, RemoteAsyncResult, RemoteBridge,
    WorkerPool,
};

/// Serves remote events over RabbitMQ and optionally sends one
#[derive(Parser, Debug)]
#[command(author, version, about = "Remote dispatch node")]
struct Args {
    /// Send one `echo` request with this text, print the answer and exit
    #[arg(short, long)]
    send: Option<String>,
}

/// Answers `echo` requests with the upper-cased body.
#[derive(Default)]
struct Echo;

impl Command for Echo {
    fn execute(&mut self, msg: &Message, ctx: &mut HandlerContext<'_>) -> HandlerResult {
        let text = msg.body().and_then(|b| b.as_str()).unwrap_or_default().to_uppercase();
        if let Some(slot) = msg.result("reply") {
            slot.set(json!(text));
        }
        ctx.return_callback_result(json!({ "length": text.len() }));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let config = Config::try_from_env().context("loading configuration")?;

    let conn = RabbitConnection::open(&config.rabbit_url, &config.app_id)
        .await
        .context("connecting to RabbitMQ")?;
    let publisher = conn.topic_publisher(&config.exchange).await?;

    let facade = Facade::new(config.app_id.as_str());
    let workers = Arc::new(WorkerPool::new(&config.app_id, config.worker_threads)?);
    facade.init_executor(workers.clone());
    facade.register_command::<Echo>("echo", config.worker_threads, 0);
    facade.add_listener(
        UNPROCESSED_REMOTE_MESSAGE,
        Arc::new(|msg: &Message, _facade: &Facade| info!("unmatched answer: {:?}", msg.body())),
    );

    let bridge = Arc::new(RemoteBridge::new(
        config.before_topic.as_str(),
        config.after_topic.as_str(),
        Arc::new(RabbitTransport::new(&publisher)),
    ));
    facade.init_remote_bridge(Arc::clone(&bridge));

    let consumer = RabbitBridgeConsumer::bind(&conn, &config.exchange, bridge).await?;
    let cancel = CancellationToken::new();
    let consumer_task = tokio::spawn(consumer.run(cancel.clone()));

    match args.send {
        Some(text) => {
            let reply = Arc::new(RemoteAsyncResult::with_default_timeout(config.remote_timeout));
            let msg = Message::new("echo")
                .with_body(text)
                .with_result("reply", Arc::clone(&reply))
                .with_callback(|r| info!("callback from {}: {}", r.handler(), r.value()));
            facade.send_with(msg, DispatchMode::Remote)?;
            let answer = tokio::task::spawn_blocking(move || reply.get_default()).await??;
            info!("reply: {}", answer);
        }
        None => {
            info!("Serving remote events, press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    cancel.cancel();
    match consumer_task.await {
        Ok(Err(err)) => error!("consumer stopped with error: {}", err),
        Err(err) => error!("consumer task failed: {}", err),
        Ok(Ok(())) => {}
    }
    facade.dispose();
    workers.shutdown();
    publisher.close().await?;
    conn.close().await?;
    Ok(())
}
