//
//  Sample server.
//
//  Listens on localhost:4918, plain http, no ssl.
//  Any Basic auth username is accepted, the password is ignored.
//  Connect to http://localhost:4918/
//
use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use headers::{Authorization, HeaderMapExt, authorization::Basic};
use http::{Request, Response, StatusCode};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpListener, task::spawn};

use dav_share::{
    DavHandler,
    body::Body,
    davpath::DavPath,
    fs::{DavFileSystem, FsError},
    memfs::MemFs,
    resolver::{Principal, SpaceResolver},
};

#[derive(Debug, Parser)]
#[command(name = "dav-share-server", about = "WebDAV share server with an in-memory filesystem")]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value_t = 4918)]
    port: u16,
    /// base path of the WebDAV endpoint
    #[arg(long, default_value = "")]
    prefix: String,
    /// give every user a home space instead of one shared space
    #[arg(long)]
    per_user: bool,
    /// default and maximum lock timeout, in seconds
    #[arg(long, default_value_t = 86400)]
    lock_ttl: u64,
}

// login name -> principal. ids are handed out on first sight.
#[derive(Clone, Default)]
struct Users(Arc<Mutex<HashMap<String, Principal>>>);

impl Users {
    fn principal(&self, login: &str) -> Principal {
        let mut users = self.0.lock().unwrap_or_else(|e| e.into_inner());
        let next_id = users.len() as u64 + 1;
        users
            .entry(login.to_string())
            .or_insert_with(|| Principal::new(next_id, login, login))
            .clone()
    }
}

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    fs: Box<MemFs>,
    per_user: bool,
    users: Users,
}

impl Server {
    fn new(cli: &Cli) -> Server {
        let resolver = match cli.per_user {
            true => SpaceResolver::per_user(),
            false => SpaceResolver::shared(1),
        };
        let fs = MemFs::new();
        let dh = DavHandler::builder()
            .strip_prefix(cli.prefix.as_str())
            .filesystem(fs.clone())
            .resolver(resolver)
            .lock_ttl(Duration::from_secs(cli.lock_ttl))
            .build_handler();
        Server {
            dh,
            fs,
            per_user: cli.per_user,
            users: Users::default(),
        }
    }

    // home spaces live in a directory named after the login.
    async fn ensure_home(&self, login: &str) {
        let Ok(mut home) = DavPath::new("/") else {
            return;
        };
        home.push_segment(login.as_bytes());
        match self.fs.create_dir(&home).await {
            Ok(()) | Err(FsError::Exists) => {}
            Err(e) => log::warn!("cannot create home directory for {login}: {e:?}"),
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Result<Response<Body>, Infallible> {
        let login = match req.headers().typed_get::<Authorization<Basic>>() {
            Some(auth) => auth.username().to_string(),
            None => {
                let mut resp = Response::new(Body::from("please auth"));
                *resp.status_mut() = StatusCode::UNAUTHORIZED;
                resp.headers_mut().insert(
                    http::header::WWW_AUTHENTICATE,
                    http::HeaderValue::from_static("Basic realm=\"dav-share\""),
                );
                return Ok(resp);
            }
        };
        if self.per_user {
            self.ensure_home(&login).await;
        }
        let principal = self.users.principal(&login);
        Ok(self.dh.handle(req, principal).await)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let server = Server::new(&cli);
    let addr: SocketAddr = ([127, 0, 0, 1], cli.port).into();
    let listener = TcpListener::bind(addr).await?;
    println!("Serving WebDAV on http://{addr}{}/", cli.prefix);

    loop {
        let (stream, _client_addr) = listener.accept().await?;
        let server = server.clone();
        let io = TokioIo::new(stream);
        spawn(async move {
            let service = service_fn(move |req| {
                let server = server.clone();
                async move { server.handle(req).await }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                log::warn!("failed serving connection: {err:?}");
            }
        });
    }
}
