mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use http::StatusCode;
use micro_front::redirect::{Redirectors, redirector_fn};
use micro_front::router::get;
use micro_front::{HandlerContext, Lifecycle, handler_fn};

use common::{Reply, send, server};

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_get_url_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());

    server.add_handle_func(get("/users/{id:[0-9]+}", "user", handler_fn(|_: &mut HandlerContext<'_>| {}))).unwrap();
    server
        .add_http_get(
            "/links",
            "links",
            handler_fn(|ctx: &mut HandlerContext<'_>| {
                let good = ctx.get_url("user", &[("id", "42")]).map(|uri| uri.to_string()).unwrap_or_default();
                let bad = ctx.get_url("user", &[("id", "x")]);
                ctx.write_str(&format!("{good} {}", bad.is_none()));
            }),
            Redirectors::none(),
        )
        .unwrap();

    assert_eq!(server.get_url("user", &[("id", "42")]).unwrap(), "/users/42");
    assert!(server.get_url("user", &[("id", "x")]).is_none());

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    assert_eq!(common::get(addr, "/links", &[]).await.body, "/users/42 true");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_get_url_round_trips_through_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());

    let routes: [(&str, &str, &[(&str, &str)]); 4] = [
        ("/", "home", &[]),
        ("/users/{id:[0-9]+}", "user", &[("id", "7")]),
        ("/blog/{year:[0-9]{4}}/{slug}", "post", &[("year", "2024"), ("slug", "hello-world")]),
        ("/search", "search", &[("q", "rust")]),
    ];

    for (path, name, _) in routes {
        let handler = handler_fn(move |ctx: &mut HandlerContext<'_>| ctx.write_str(name));
        if name == "search" {
            server.add_http_get_queries(path, name, handler, Redirectors::none(), &[("q", "{q}")]).unwrap();
        } else {
            server.add_http_get(path, name, handler, Redirectors::none()).unwrap();
        }
    }

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    for (_, name, vars) in &routes {
        let url = server.get_url(name, vars).unwrap();
        let reply = common::get(addr, &url.to_string(), &[]).await;
        assert_eq!(reply.status, 200, "{url}");
        assert_eq!(reply.body, *name);
    }
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_first_redirector_answers() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());

    let (r1, r2, handled) = (counter(), counter(), counter());
    let (r1_in, r2_in, handled_in) = (Arc::clone(&r1), Arc::clone(&r2), Arc::clone(&handled));

    let redirectors = Redirectors::builder()
        .add_last(redirector_fn(move |ctx: &mut HandlerContext<'_>| {
            r1_in.fetch_add(1, Ordering::SeqCst);
            ctx.redirect("/login", StatusCode::FOUND);
            true
        }))
        .add_last(redirector_fn(move |_: &mut HandlerContext<'_>| {
            r2_in.fetch_add(1, Ordering::SeqCst);
            false
        }))
        .build();
    let handler = handler_fn(move |ctx: &mut HandlerContext<'_>| {
        handled_in.fetch_add(1, Ordering::SeqCst);
        ctx.write_str("secret");
    });
    server.add_http_get("/account", "account", handler, redirectors).unwrap();

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    let reply = common::get(addr, "/account", &[]).await;

    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location"), Some("/login"));
    assert_eq!(r1.load(Ordering::SeqCst), 1);
    assert_eq!(r2.load(Ordering::SeqCst), 0);
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_redirector_anywhere_in_chain_blocks_handler() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());
    let handled = counter();

    for position in 0..3 {
        let mut builder = Redirectors::builder();
        for index in 0..3 {
            let answers = index == position;
            builder = builder.add_last(redirector_fn(move |ctx: &mut HandlerContext<'_>| {
                if answers {
                    ctx.set_status(StatusCode::FORBIDDEN);
                }
                answers
            }));
        }

        let handled_in = Arc::clone(&handled);
        let handler = handler_fn(move |_: &mut HandlerContext<'_>| {
            handled_in.fetch_add(1, Ordering::SeqCst);
        });
        server.add_http_get(&format!("/guarded/{position}"), &format!("guarded{position}"), handler, builder.build()).unwrap();
    }

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    for position in 0..3 {
        assert_eq!(common::get(addr, &format!("/guarded/{position}"), &[]).await.status, 403);
    }
    assert_eq!(handled.load(Ordering::SeqCst), 0);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_assets() {
    let dir = tempfile::tempdir().unwrap();
    let assets = tempfile::Builder::new().prefix("assets").tempdir_in(".").unwrap();
    let root = assets.path().file_name().unwrap().to_string_lossy().into_owned();
    std::fs::create_dir(assets.path().join("css")).unwrap();
    std::fs::write(assets.path().join("css/site.css"), "body { color: red; }").unwrap();
    std::fs::write(assets.path().join("secret.css"), "nope").unwrap();

    let folder = format!("/{root}/css/");
    let mut server = server(dir.path());
    let addr = server.start("127.0.0.1:0", &[(folder.as_str(), ".css")]).await.unwrap();

    let reply = common::get(addr, &format!("{folder}site.css"), &[]).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, "body { color: red; }");
    assert_eq!(reply.header("content-type"), Some("text/css"));

    let last_modified = reply.header("last-modified").unwrap().to_owned();
    let cached = common::get(addr, &format!("{folder}site.css"), &[("If-Modified-Since", &last_modified)]).await;
    assert_eq!(cached.status, 304);

    // the obsolete date forms HTTP/1.1 still accepts
    let modified = chrono::DateTime::<chrono::Utc>::from(httpdate::parse_http_date(&last_modified).unwrap());
    for since in [modified.format("%A, %d-%b-%y %H:%M:%S GMT").to_string(), modified.format("%a %b %e %H:%M:%S %Y").to_string()] {
        let cached = common::get(addr, &format!("{folder}site.css"), &[("If-Modified-Since", &since)]).await;
        assert_eq!(cached.status, 304, "If-Modified-Since: {since}");
    }
    let stale = common::get(addr, &format!("{folder}site.css"), &[("If-Modified-Since", "Sun, 06 Nov 1994 08:49:37 GMT")]).await;
    assert_eq!(stale.status, 200);

    assert_eq!(common::get(addr, &format!("{folder}missing.css"), &[]).await.status, 404);
    assert_eq!(common::get(addr, &format!("{folder}site.js"), &[]).await.status, 404);
    assert_eq!(common::get(addr, &format!("{folder}..%2Fsecret.css"), &[]).await.status, 404);
    server.shutdown().await.unwrap();
}

async fn session_server() -> (tempfile::TempDir, micro_front::Server, std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());

    server
        .add_http_get(
            "/login",
            "login",
            handler_fn(|ctx: &mut HandlerContext<'_>| {
                ctx.set_session_value("sess", "user", "alice");
                ctx.set_session_value("sess", "admin", true);
                ctx.set_session_value("sess", "visits", 3i64);
            }),
            Redirectors::none(),
        )
        .unwrap();
    server
        .add_http_get(
            "/whoami",
            "whoami",
            handler_fn(|ctx: &mut HandlerContext<'_>| {
                let reply = format!(
                    "{}|{}|{}|{}|{}",
                    ctx.get_string_session_value("sess", "user"),
                    ctx.has_string_session_value("sess", "user"),
                    ctx.has_bool_session_value("sess", "user"),
                    ctx.get_bool_session_value("sess", "admin"),
                    ctx.get_int_session_value("sess", "visits"),
                );
                ctx.write_str(&reply);
            }),
            Redirectors::none(),
        )
        .unwrap();
    server
        .add_http_post(
            "/notice",
            "notice",
            handler_fn(|ctx: &mut HandlerContext<'_>| ctx.set_flash_message("sess", "hello", "notice")),
            Redirectors::none(),
        )
        .unwrap();
    server
        .add_http_get(
            "/notice",
            "read_notice",
            handler_fn(|ctx: &mut HandlerContext<'_>| {
                let notice = ctx.get_first_string_flash_message("sess", "notice");
                ctx.write_str(&notice);
            }),
            Redirectors::none(),
        )
        .unwrap();

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    (dir, server, addr)
}

fn cookie_header(reply: &Reply) -> String {
    reply.cookie().expect("response sets the session cookie")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_session_values_survive_requests() {
    let (_dir, mut server, addr) = session_server().await;

    let login = common::get(addr, "/login", &[]).await;
    let set_cookie = login.header("set-cookie").unwrap();
    assert!(set_cookie.starts_with("sess="));
    assert!(set_cookie.contains("Path=/"));
    assert!(set_cookie.contains("HttpOnly"));

    let cookie = cookie_header(&login);
    let whoami = common::get(addr, "/whoami", &[("Cookie", &cookie)]).await;
    assert_eq!(whoami.body, "alice|true|false|true|3");

    let anonymous = common::get(addr, "/whoami", &[]).await;
    assert_eq!(anonymous.body, "|false|false|false|0");

    let forged = common::get(addr, "/whoami", &[("Cookie", "sess=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")]).await;
    assert_eq!(forged.body, "|false|false|false|0");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_flash_is_read_once() {
    let (_dir, mut server, addr) = session_server().await;

    let posted = send(addr, "POST", "/notice", &[], "").await;
    let first = common::get(addr, "/notice", &[("Cookie", &cookie_header(&posted))]).await;
    assert_eq!(first.body, "hello");

    let second = common::get(addr, "/notice", &[("Cookie", &cookie_header(&first))]).await;
    assert_eq!(second.body, "");
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_subrouter_isolation() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());

    let write_name = |name: &'static str| handler_fn(move |ctx: &mut HandlerContext<'_>| ctx.write_str(name));
    server.host("{tenant:[a-z]+}.example.com", "tenant").unwrap();
    server.add_http_get_subrouter("/admin", "admin", write_name("admin"), Redirectors::none(), "tenant").unwrap();
    server.add_http_get_subrouter("/users", "admin_users", write_name("users"), Redirectors::none(), "admin").unwrap();

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    // absolute-form targets carry the host
    let ok = common::get(addr, "http://acme.example.com/admin/users", &[]).await;
    assert_eq!(ok.body, "users");

    assert_eq!(common::get(addr, "/admin/users", &[]).await.status, 404);
    assert_eq!(common::get(addr, "http://other.org/admin/users", &[]).await.status, 404);
    assert_eq!(common::get(addr, "http://acme.example.com/users", &[]).await.status, 404);
    assert_eq!(send(addr, "POST", "http://acme.example.com/admin/users", &[], "").await.status, 404);
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_form_post() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());
    server
        .add_http_post(
            "/echo",
            "echo",
            handler_fn(|ctx: &mut HandlerContext<'_>| {
                let reply = format!("{} {}", ctx.post_form_value("name"), ctx.form_value("lang"));
                ctx.write_str(&reply);
            }),
            Redirectors::none(),
        )
        .unwrap();

    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    let reply = send(
        addr,
        "POST",
        "/echo?lang=rust",
        &[("Content-Type", "application/x-www-form-urlencoded")],
        "name=ferris+crab",
    )
    .await;
    assert_eq!(reply.body, "ferris crab rust");
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    server.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_shutdown_refuses_new_connections() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = server(dir.path());
    let addr = server.start("127.0.0.1:0", &[]).await.unwrap();
    assert_eq!(common::get(addr, "/", &[]).await.status, 404);

    tokio::time::timeout(Duration::from_secs(5), server.shutdown()).await.unwrap().unwrap();
    assert_eq!(server.lifecycle(), Lifecycle::Stopped);

    let refused = tokio::net::TcpStream::connect(addr).await.unwrap_err();
    assert_eq!(refused.kind(), std::io::ErrorKind::ConnectionRefused);
}
