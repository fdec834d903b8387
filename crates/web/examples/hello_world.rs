use micro_front::config::ServerOptions;
use micro_front::redirect::Redirectors;
use micro_front::{HandlerContext, Server, handler_fn};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

fn hello_world(ctx: &mut HandlerContext<'_>) {
    ctx.write_str("hello world");
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let options = ServerOptions { generate_keys: true, ..ServerOptions::default() };
    let mut server = Server::new(options).unwrap();
    server.add_http_get("/", "hello", handler_fn(hello_world), Redirectors::none()).unwrap();

    match server.start("127.0.0.1:3000", &[]).await {
        Ok(addr) => info!(%addr, "serving, press ctrl-c to stop"),
        Err(e) => {
            error!(cause = %e, "start failed");
            return;
        }
    }

    tokio::signal::ctrl_c().await.unwrap();
    server.shutdown().await.unwrap();
}
