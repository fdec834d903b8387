use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use micro_daily_log::{Logger, LoggerError, LoggerOptions};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::asset::AssetHandler;
use crate::config::{ConfigError, ServerOptions};
use crate::handler::{Handler, NotFound};
use crate::redirect::{Redirector, Redirectors};
use crate::router::{RouteError, RouteSpec, RouteTable};
use crate::session::{CookieCodec, CookieOptions, KeyPair, SessionError, SessionStore};
use crate::template::{TemplateError, TemplateManager};
use crate::{HandlerContext, RequestContext, ResponseBody};

/// Request bodies are collected before dispatch, up to this many bytes.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const ASSET_PATTERN: &str = "{asset:[a-z0-9A-Z_]+(";

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("can't listen on {address}: {source}")]
    Listen { address: String, source: std::io::Error },

    #[error("server already started, configuration is sealed")]
    Sealed,

    #[error("server is not serving")]
    NotServing,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logger(#[from] LoggerError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Where a [`Server`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    /// At least one route, host, template or not-found handler registered.
    Configured,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Everything dispatch reads, frozen once the server starts.
pub(crate) struct Shared {
    pub(crate) logger: Logger,
    pub(crate) templates: TemplateManager,
    pub(crate) sessions: SessionStore,
    pub(crate) routes: RouteTable,
    pub(crate) not_found: Arc<dyn Handler>,
}

impl Shared {
    #[track_caller]
    pub(crate) fn get_url(&self, name: &str, vars: &[(&str, &str)]) -> Option<Uri> {
        match self.routes.get_url(name, vars) {
            Ok(uri) => Some(uri),
            Err(e) => {
                self.logger.println(format!("GetUrl: {e}"));
                None
            }
        }
    }

    /// Routes the request, runs the route's redirectors and then, unless one
    /// of them answered, its handler.
    pub(crate) async fn dispatch(&self, request: RequestContext) -> Response<ResponseBody> {
        let route = self.routes.at(&request);
        let params = route.as_ref().map(|route| route.params().clone()).unwrap_or_default();
        let mut ctx = HandlerContext::new(self, &request, params);

        match route.as_ref().and_then(|route| route.handler().map(|handler| (handler, route.redirectors()))) {
            Some((handler, redirectors)) => {
                if !redirectors.redirect(&mut ctx).await {
                    handler.handle(&mut ctx).await;
                }
            }
            None => self.not_found.handle(&mut ctx).await,
        }

        ctx.into_response().into_response()
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    stopped: oneshot::Receiver<()>,
}

/// A routed HTTP front-end.
///
/// Routes, hosts, templates and the not-found handler are registered before
/// [`Server::start`]; afterwards the route table is frozen and those calls
/// fail with [`ServerError::Sealed`].
pub struct Server {
    options: ServerOptions,
    lifecycle: Lifecycle,
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl Server {
    /// Starts the logger, sets up the session keys and, when `config_file` is
    /// set, saves the options there.
    pub fn new(mut options: ServerOptions) -> Result<Self, ServerError> {
        let logger = Logger::start(
            LoggerOptions::new(&options.dir_log, &options.file_log)
                .file_mode(options.file_perms)
                .dir_mode(options.dir_perms)
                .queue_capacity(options.log_queue_capacity),
        )?;

        if options.generate_keys {
            options.generate_key_pair();
            logger.println("Generated a new session key pair");
        }
        options.validate().map_err(ConfigError::Validation)?;

        let codec = CookieCodec::new(KeyPair::from_flat(&options.key_pairs)?, options.max_age)?;
        let sessions = SessionStore::new(
            codec,
            CookieOptions { path: options.cookie_path.clone(), max_age: options.max_age, http_only: options.http_only },
        );

        let shared = Shared {
            logger,
            templates: TemplateManager::new(),
            sessions,
            routes: RouteTable::new(),
            not_found: Arc::new(NotFound),
        };
        let server = Self { options, lifecycle: Lifecycle::New, shared: Arc::new(shared), running: None };
        server.println("Successfully made micro-front Server");

        if server.options.config_file.is_empty() {
            server.println("Not saving configuration to file");
        } else {
            match server.save_config_file() {
                Ok(()) => server.println(format!("Successfully saved config file to: {}", server.options.config_file)),
                Err(e) => server.println(format!("Error saving config to {} : {e}", server.options.config_file)),
            }
        }

        Ok(server)
    }

    pub fn from_config(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        Self::new(ServerOptions::load(path)?)
    }

    /// Writes the current options, including generated keys, to `config_file`.
    pub fn save_config_file(&self) -> Result<(), ServerError> {
        self.options.save(&self.options.config_file)?;
        Ok(())
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn logger(&self) -> &Logger {
        &self.shared.logger
    }

    pub fn templates(&self) -> &TemplateManager {
        &self.shared.templates
    }

    #[track_caller]
    pub fn println(&self, msg: impl AsRef<str>) {
        self.shared.logger.println(msg);
    }

    fn shared_mut(&mut self) -> Result<&mut Shared, ServerError> {
        if !matches!(self.lifecycle, Lifecycle::New | Lifecycle::Configured) {
            return Err(ServerError::Sealed);
        }
        self.lifecycle = Lifecycle::Configured;
        Arc::get_mut(&mut self.shared).ok_or(ServerError::Sealed)
    }

    /// Registers a host node that routes can be added under. An empty
    /// pattern matches any host.
    pub fn host(&mut self, pattern: &str, name: &str) -> Result<(), ServerError> {
        self.println(format!("Using \"{pattern}\" as the host."));
        self.shared_mut()?.routes.add_host(pattern, name)?;
        Ok(())
    }

    pub fn localhost(&mut self, name: &str) -> Result<(), ServerError> {
        self.host("", name)
    }

    pub fn not_found_handler(&mut self, handler: impl Handler + 'static) -> Result<(), ServerError> {
        self.shared_mut()?.not_found = Arc::new(handler);
        Ok(())
    }

    /// Registers a route. Failures, including an unknown parent, are also
    /// written to the server log; the route is then not added.
    #[track_caller]
    pub fn add_handle_func(&mut self, spec: RouteSpec) -> Result<(), ServerError> {
        self.println(format!("AddHandleFunc {spec:?}"));
        let name = spec.name().to_owned();

        match self.shared_mut()?.routes.add(spec) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.println(format!("AddHandleFunc {name} skipped: {e}"));
                Err(e.into())
            }
        }
    }

    pub fn add_http_get(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::get(path, name, handler), redirectors, &[], None))
    }

    pub fn add_http_get_queries(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
        queries: &[(&str, &str)],
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::get(path, name, handler), redirectors, queries, None))
    }

    pub fn add_http_post(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::post(path, name, handler), redirectors, &[], None))
    }

    pub fn add_http_get_subrouter(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
        parent: &str,
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::get(path, name, handler), redirectors, &[], Some(parent)))
    }

    pub fn add_http_get_queries_subrouter(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
        queries: &[(&str, &str)],
        parent: &str,
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::get(path, name, handler), redirectors, queries, Some(parent)))
    }

    pub fn add_http_post_subrouter(
        &mut self,
        path: &str,
        name: &str,
        handler: impl Handler + 'static,
        redirectors: Redirectors,
        parent: &str,
    ) -> Result<(), ServerError> {
        self.add_handle_func(http_route(crate::router::post(path, name, handler), redirectors, &[], Some(parent)))
    }

    /// Builds the URL of a named route. Unknown names and variables that do
    /// not fit their patterns are logged and yield `None`.
    #[track_caller]
    pub fn get_url(&self, name: &str, vars: &[(&str, &str)]) -> Option<Uri> {
        self.shared.get_url(name, vars)
    }

    /// Compiles a template set; see [`TemplateManager::add_template`].
    pub fn add_template(&mut self, main: impl AsRef<Path>, dependencies: &[PathBuf]) -> Result<String, ServerError> {
        self.shared_mut()?;
        match self.shared.templates.add_template(main, dependencies) {
            Ok(name) => {
                self.println(format!("Successfully added template with name=\"{name}\""));
                Ok(name)
            }
            Err(e) => {
                self.println(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Adds one set per `(main, dependencies)` entry, all file names relative
    /// to `root`. An empty root means `template_path`, and names without an
    /// extension get `template_extension`. Stops at the first failure.
    pub fn add_template_files(&mut self, mapping: &[(&str, &[&str])], root: &str) -> Result<(), ServerError> {
        let root = if root.is_empty() { self.options.template_path.clone() } else { root.to_owned() };

        for (main, dependencies) in mapping {
            let dependencies: Vec<PathBuf> = dependencies.iter().map(|file| self.template_file(&root, file)).collect();
            let main = self.template_file(&root, main);
            self.add_template(main, &dependencies)?;
        }
        Ok(())
    }

    fn template_file(&self, root: &str, file: &str) -> PathBuf {
        let mut path = format!("{root}{file}");
        if Path::new(file).extension().is_none() {
            path.push_str(&self.options.template_extension);
        }
        PathBuf::from(path)
    }

    /// Adds the asset routes, binds `address` and spawns the accept task.
    ///
    /// `assets` pairs a folder such as `/css/` with the extension served from
    /// it, such as `.css`. `./favicon.ico` is served at `/favicon.ico`.
    /// Returns the bound address once connections are being accepted.
    ///
    /// A bind failure does not exit the process: it is written to the server
    /// log and returned as [`ServerError::Listen`], leaving the server
    /// configured so `start` can be called again.
    pub async fn start(&mut self, address: &str, assets: &[(&str, &str)]) -> Result<SocketAddr, ServerError> {
        let started = Instant::now();
        self.println("Begin *Server Startup*");

        for (folder, extension) in assets {
            self.println(format!("{extension} handler using folder: {folder}"));
            let name = format!("asset:{folder}{extension}");
            if !self.shared_mut()?.routes.contains(&name) {
                let path = format!("{folder}{ASSET_PATTERN}{})}}", regex::escape(extension));
                self.add_handle_func(RouteSpec::new(path, name, AssetHandler::new(folder)))?;
            }
        }
        if !self.shared_mut()?.routes.contains("favicon") {
            self.add_handle_func(RouteSpec::new("/favicon.ico", "favicon", AssetHandler::new("/")))?;
        }
        self.println("Finished building handlers.");

        self.println(format!("Creating listener on address {address}"));
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.println(format!("Error: {source}"));
                return Err(ServerError::Listen { address: address.to_owned(), source });
            }
        };
        let local_addr = listener.local_addr().map_err(|source| ServerError::Listen { address: address.to_owned(), source })?;

        if self.options.watch_templates
            && let Err(e) = self.shared.templates.start()
        {
            self.println(format!("Error starting template watcher: {e}"));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        tokio::spawn(accept_loop(listener, Arc::clone(&self.shared), shutdown_rx, stopped_tx));

        self.lifecycle = Lifecycle::Serving;
        self.running = Some(Running { local_addr, shutdown: shutdown_tx, stopped: stopped_rx });
        self.println(format!("Begin serving on listener with address: {local_addr}"));
        self.println(format!("*Server Startup* took {:?}", started.elapsed()));
        Ok(local_addr)
    }

    /// Stops accepting connections and waits until the listener is closed.
    /// Connections already accepted are served to completion.
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        let Some(Running { shutdown, stopped, .. }) = self.running.take() else {
            return Err(ServerError::NotServing);
        };

        let started = Instant::now();
        self.println("Begin *Server Shutdown*");
        self.lifecycle = Lifecycle::ShuttingDown;

        self.println("Closing the listener.");
        let _ = shutdown.send(());
        self.println("Waiting for shutdown notification.");
        let _ = stopped.await;

        self.shared.templates.stop();
        self.lifecycle = Lifecycle::Stopped;
        self.println(format!("*Server Shutdown* took {:?}", started.elapsed()));
        Ok(())
    }
}

fn http_route(spec: RouteSpec, redirectors: Redirectors, queries: &[(&str, &str)], parent: Option<&str>) -> RouteSpec {
    let spec = spec.schemes(["http", ""]).redirectors(redirectors).queries(queries.iter().copied());
    match parent {
        Some(parent) => spec.parent(parent),
        None => spec,
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
    stopped: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            accepted = listener.accept() => {
                let (tcp_stream, _remote_addr) = match accepted {
                    Ok(stream_and_addr) => stream_and_addr,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                };

                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| serve(Arc::clone(&shared), req));
                    match http1::Builder::new().serve_connection(TokioIo::new(tcp_stream), service).await {
                        Ok(()) => debug!("finished process, connection shutdown"),
                        Err(e) => warn!(cause = %e, "service has error, connection shutdown"),
                    }
                });
            }
        }
    }

    drop(listener);
    shared.logger.println("Ending Serve. Sending shutdown notification");
    let _ = stopped.send(());
}

async fn serve<B>(shared: Arc<Shared>, req: Request<B>) -> Result<Response<ResponseBody>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (parts, body) = req.into_parts();

    let body = match Limited::new(body, MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(cause = %e, "failed to read request body");
            let status = if e.is::<http_body_util::LengthLimitError>() {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            let mut response = Response::new(ResponseBody::from(status.canonical_reason().unwrap_or_default()));
            *response.status_mut() = status;
            return Ok(response);
        }
    };

    Ok(shared.dispatch(RequestContext::new(parts, body)).await)
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("lifecycle", &self.lifecycle)
            .field("local_addr", &self.local_addr())
            .field("routes", &self.shared.routes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_shared(dir: &Path) -> Shared {
    let logger = Logger::start(LoggerOptions::new(dir.join("log"), "test")).unwrap();
    let pairs = KeyPair::from_flat(&[vec![7; 32], vec![9; 32]]).unwrap();
    let sessions = SessionStore::new(CookieCodec::new(pairs, 3600).unwrap(), CookieOptions::default());
    Shared { logger, templates: TemplateManager::new(), sessions, routes: RouteTable::new(), not_found: Arc::new(NotFound) }
}
