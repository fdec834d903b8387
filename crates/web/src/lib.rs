//! An embeddable routed HTTP front-end.
//!
//! A [`Server`] owns a route table, compiled templates, a cookie session
//! store and a daily rotating [`Logger`]. Client code registers named routes
//! with handlers and optional [redirectors](redirect), then starts the
//! server; every request reaches its handler through a [`HandlerContext`].
//!
//! ```no_run
//! use micro_front::config::ServerOptions;
//! use micro_front::redirect::Redirectors;
//! use micro_front::{HandlerContext, Server, handler_fn};
//!
//! # async fn run() -> Result<(), micro_front::ServerError> {
//! let options = ServerOptions { generate_keys: true, ..ServerOptions::default() };
//! let mut server = Server::new(options)?;
//!
//! server.add_http_get(
//!     "/hello/{name}",
//!     "hello",
//!     handler_fn(|ctx: &mut HandlerContext<'_>| {
//!         let greeting = format!("hello {}", ctx.var("name").unwrap_or("stranger"));
//!         ctx.write_str(&greeting);
//!     }),
//!     Redirectors::none(),
//! )?;
//!
//! server.start("127.0.0.1:8080", &[("/css/", ".css")]).await?;
//! # server.shutdown().await
//! # }
//! ```

mod asset;
mod body;
mod context;
mod handler;
mod request;
mod response;
mod server;

pub mod config;
pub mod redirect;
pub mod router;
pub mod session;
pub mod template;

pub use body::ResponseBody;
pub use context::HandlerContext;
pub use handler::FnHandler;
pub use handler::Handler;
pub use handler::handler_fn;
pub use request::PathParams;
pub use request::RequestContext;
pub use response::ResponseWriter;
pub use server::Lifecycle;
pub use server::Server;
pub use server::ServerError;

pub use micro_daily_log::Logger;
