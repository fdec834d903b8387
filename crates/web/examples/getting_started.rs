//! A login flow: templates, sessions, flashes and a redirector guarding a
//! page. Run it from `crates/web` so `templates/` and `css/` resolve.
//!
//! ```text
//! curl -v http://127.0.0.1:8080/private
//! curl -v -d "user=ferris" http://127.0.0.1:8080/login
//! ```

use http::StatusCode;
use micro_front::config::ServerOptions;
use micro_front::redirect::{Redirectors, redirector_fn};
use micro_front::router::get;
use micro_front::{HandlerContext, Server, handler_fn};
use serde_json::json;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

const SESSION: &str = "front";

fn login_page(ctx: &mut HandlerContext<'_>) {
    let notice = ctx.get_first_string_flash_message(SESSION, "notice");
    let action = ctx.get_url("login_post", &[]).map(|uri| uri.to_string()).unwrap_or_default();
    ctx.render_template("login.html", json!({ "notice": notice, "action": action }));
}

fn login(ctx: &mut HandlerContext<'_>) {
    let user = ctx.post_form_value("user");
    if user.is_empty() {
        ctx.set_flash_message(SESSION, "a user name is required", "notice");
        ctx.redirect("/login", StatusCode::SEE_OTHER);
        return;
    }

    ctx.println(format!("login user={user}"));
    ctx.set_session_value(SESSION, "user", user.as_str());
    ctx.redirect("/private", StatusCode::SEE_OTHER);
}

fn private_page(ctx: &mut HandlerContext<'_>) {
    let user = ctx.get_string_session_value(SESSION, "user");
    ctx.render_template("private.html", json!({ "user": user }));
}

fn logout(ctx: &mut HandlerContext<'_>) {
    ctx.remove_session_value(SESSION, "user");
    ctx.set_flash_message(SESSION, "logged out", "notice");
    ctx.redirect("/login", StatusCode::SEE_OTHER);
}

fn require_login(ctx: &mut HandlerContext<'_>) -> bool {
    if ctx.has_string_session_value(SESSION, "user") {
        return false;
    }
    ctx.set_flash_message(SESSION, "please log in first", "notice");
    ctx.redirect("/login", StatusCode::FOUND);
    true
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let options = ServerOptions { generate_keys: true, watch_templates: true, ..ServerOptions::default() };
    let mut server = Server::new(options).unwrap();

    server
        .add_template_files(&[("login", &["layout.html"]), ("private", &["layout.html"])], "")
        .unwrap();

    server.localhost("local").unwrap();
    server.add_http_get_subrouter("/login", "login_page", handler_fn(login_page), Redirectors::none(), "local").unwrap();
    server.add_http_post_subrouter("/login", "login_post", handler_fn(login), Redirectors::none(), "local").unwrap();
    server
        .add_http_get_subrouter(
            "/private",
            "private",
            handler_fn(private_page),
            Redirectors::builder().add_last(redirector_fn(require_login)).build(),
            "local",
        )
        .unwrap();
    server.add_handle_func(get("/logout", "logout", handler_fn(logout))).unwrap();

    match server.start("127.0.0.1:8080", &[("/css/", ".css")]).await {
        Ok(addr) => info!(%addr, "serving, press ctrl-c to stop"),
        Err(e) => {
            error!(cause = %e, "start failed");
            return;
        }
    }

    tokio::signal::ctrl_c().await.unwrap();
    server.shutdown().await.unwrap();
}
