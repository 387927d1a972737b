//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::{self, buf::Buf};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

use crate::body::Body;
use crate::cache::{DavCache, MemCache};
use crate::davheaders;
use crate::davpath::DavPath;
use crate::davxml;
use crate::errors::{DavError, DavResult};
use crate::fs::*;
use crate::guard::{BaseCheck, DavGuard};
use crate::lockmanager::{DEFAULT_LOCK_TTL, LockManager};
use crate::resolver::{PathResolver, Principal, ResourceScope, RouteContext, SpaceResolver};
use crate::util::{DavMethod, DavMethodSet, dav_method};
use crate::voidfs::VoidFs;

/// Request bodies of methods other than PUT are never larger than this.
const MAX_XML_BODY: usize = 65536;

/// Default ceiling for PUT bodies.
const DEFAULT_MAX_UPLOAD: usize = 64 * 1024 * 1024;

/// WebDAV request handler.
///
/// Created with [`builder`](Self::builder) and
/// [`DavConfig::build_handler`]. The [`handle`](Self::handle) method does
/// the actual work. Cloning is cheap, all clones share the lock store.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) config: Arc<DavConfig>,
}

/// Configuration of the handler.
#[derive(Clone, Default)]
pub struct DavConfig {
    // Prefix to be stripped off when handling request.
    pub(crate) prefix: Option<String>,
    // Filesystem backend.
    pub(crate) fs: Option<Box<dyn DavFileSystem>>,
    // URL to resource resolution.
    pub(crate) resolver: Option<Box<dyn PathResolver>>,
    // Lock store.
    pub(crate) cache: Option<Box<dyn DavCache>>,
    // Set of allowed methods (None means "all methods")
    pub(crate) allow: Option<DavMethodSet>,
    // Default and maximum lock lifetime.
    pub(crate) lock_ttl: Option<Duration>,
    // PUT body ceiling in bytes.
    pub(crate) max_upload_size: Option<usize>,
    // Route the requests come in on.
    pub(crate) route_context: Option<RouteContext>,
    // Capability check for every request but OPTIONS.
    pub(crate) base_check: Option<BaseCheck>,
    // Methods that do not go through the If: header check.
    pub(crate) skip_if_header: Option<DavMethodSet>,
}

impl DavConfig {
    /// Create a new configuration builder.
    pub fn new() -> DavConfig {
        DavConfig::default()
    }

    /// Use the configuration that was built to generate a [`DavHandler`].
    ///
    /// Without a configured lock store, an in-memory one is created here
    /// and shared by every request the handler serves.
    pub fn build_handler(self) -> DavHandler {
        let mut this = self;
        if this.cache.is_none() {
            let cache: Box<dyn DavCache> = MemCache::new();
            this.cache = Some(cache);
        }
        DavHandler {
            config: Arc::new(this),
        }
    }

    /// Prefix to be stripped off before resolving the rest of the
    /// request path. `Destination:` headers must carry it too.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = Some(prefix.into());
        this
    }

    /// Set the filesystem to use.
    pub fn filesystem(self, fs: Box<dyn DavFileSystem>) -> Self {
        let mut this = self;
        this.fs = Some(fs);
        this
    }

    /// Set the path resolver (default [`SpaceResolver::new`]).
    pub fn resolver(self, resolver: Box<dyn PathResolver>) -> Self {
        let mut this = self;
        this.resolver = Some(resolver);
        this
    }

    /// Set the lock store (default: in-memory).
    pub fn cache(self, cache: Box<dyn DavCache>) -> Self {
        let mut this = self;
        this.cache = Some(cache);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = Some(allow);
        this
    }

    /// Default lock lifetime, also the maximum a client can ask for.
    pub fn lock_ttl(self, ttl: Duration) -> Self {
        let mut this = self;
        this.lock_ttl = Some(ttl);
        this
    }

    /// Maximum size of a PUT body in bytes.
    pub fn max_upload_size(self, size: usize) -> Self {
        let mut this = self;
        this.max_upload_size = Some(size);
        this
    }

    /// The route this handler serves, passed on to the resolver.
    pub fn route_context(self, ctx: RouteContext) -> Self {
        let mut this = self;
        this.route_context = Some(ctx);
        this
    }

    /// Capability check for the principal. Runs before anything else on
    /// every request except OPTIONS; `false` means 403.
    pub fn base_check<F>(self, check: F) -> Self
    where
        F: Fn(&Principal, &Request<()>) -> bool + Send + Sync + 'static,
    {
        let mut this = self;
        this.base_check = Some(Arc::new(check));
        this
    }

    /// Methods for which the `If:` header is not evaluated up front.
    /// Default: OPTIONS, GET, HEAD and PROPFIND.
    pub fn skip_if_header(self, methods: DavMethodSet) -> Self {
        let mut this = self;
        this.skip_if_header = Some(methods);
        this
    }

    fn merge(&self, new: DavConfig) -> DavConfig {
        DavConfig {
            prefix: new.prefix.or_else(|| self.prefix.clone()),
            fs: new.fs.or_else(|| self.fs.clone()),
            resolver: new.resolver.or_else(|| self.resolver.clone()),
            cache: new.cache.or_else(|| self.cache.clone()),
            allow: new.allow.or(self.allow),
            lock_ttl: new.lock_ttl.or(self.lock_ttl),
            max_upload_size: new.max_upload_size.or(self.max_upload_size),
            route_context: new.route_context.or(self.route_context),
            base_check: new.base_check.or_else(|| self.base_check.clone()),
            skip_if_header: new.skip_if_header.or(self.skip_if_header),
        }
    }
}

// The actual inner struct.
//
// At the start of the request, DavConfig is used to generate
// a DavInner struct. DavInner::handle then handles the request.
pub(crate) struct DavInner {
    pub prefix: String,
    pub fs: Box<dyn DavFileSystem>,
    pub has_fs: bool,
    pub resolver: Box<dyn PathResolver>,
    pub lm: LockManager,
    pub allow: Option<DavMethodSet>,
    pub route_context: RouteContext,
    pub guard: DavGuard,
    pub skip_if_header: DavMethodSet,
    pub max_upload_size: usize,
    pub principal: Principal,
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder() -> DavConfig {
        DavConfig::new()
    }

    /// Process a WebDAV request for an authenticated principal.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>, principal: Principal) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let inner = DavInner::new(self.config.as_ref().clone(), principal);
        inner.handle(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, a router can serve the sync route and the plain
    /// WebDAV route from one handler by passing a different
    /// `route_context` for each.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        config: DavConfig,
        req: Request<ReqBody>,
        principal: Principal,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let inner = DavInner::new(self.config.merge(config), principal);
        inner.handle(req).await
    }
}

impl DavInner {
    pub fn new(cfg: DavConfig, principal: Principal) -> DavInner {
        let DavConfig {
            prefix,
            fs,
            resolver,
            cache,
            allow,
            lock_ttl,
            max_upload_size,
            route_context,
            base_check,
            skip_if_header,
        } = cfg;
        let prefix = prefix.unwrap_or_default();
        let lock_ttl = lock_ttl.unwrap_or(DEFAULT_LOCK_TTL);
        let cache: Box<dyn DavCache> = match cache {
            Some(c) => c,
            None => MemCache::new(),
        };
        let has_fs = fs.is_some();
        let fs: Box<dyn DavFileSystem> = match fs {
            Some(fs) => fs,
            None => VoidFs::new(),
        };
        let resolver: Box<dyn PathResolver> = match resolver {
            Some(r) => r,
            None => SpaceResolver::new(),
        };
        let skip_if_header = skip_if_header.unwrap_or_else(|| {
            [DavMethod::Options, DavMethod::Get, DavMethod::Head, DavMethod::PropFind]
                .into_iter()
                .collect()
        });
        DavInner {
            guard: DavGuard {
                base_check,
                lock_ttl,
                prefix: prefix.clone(),
            },
            prefix,
            fs,
            has_fs,
            resolver,
            lm: LockManager::new(cache).with_default_ttl(lock_ttl),
            allow,
            route_context: route_context.unwrap_or_default(),
            skip_if_header,
            max_upload_size: max_upload_size.unwrap_or(DEFAULT_MAX_UPLOAD),
            principal,
        }
    }

    /// Resolve a request path for the current principal.
    pub(crate) async fn resolve(&self, path: &DavPath) -> Option<ResourceScope> {
        self.resolver.resolve(&self.principal, self.route_context, path).await
    }

    // helper.
    pub(crate) async fn has_parent(&self, res: &ResourceScope) -> bool {
        self.fs
            .metadata(&res.fs_path.parent())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    // If this is a directory, make sure the url ends in a slash.
    pub(crate) fn fixpath(&self, resp: &mut Response<Body>, res: &mut ResourceScope, meta: &dyn DavMetaData) {
        if meta.is_dir() && !res.url.is_collection() {
            res.url.add_slash();
            res.fs_path.add_slash();
            let newloc = res.url.as_url_string_with_prefix();
            resp.headers_mut().typed_insert(davheaders::ContentLocation(newloc));
        }
    }

    // drain request body, up to max_size bytes.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(&self, body: ReqBody, max_size: usize) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        let mut body = pin!(body);

        while let Some(res) = body.frame().await {
            let mut data_frame =
                res.map_err(|_| DavError::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "UnexpectedEof")))?;

            let Some(buf) = data_frame.data_mut() else {
                continue;
            };

            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle<ReqBody, ReqData, ReqError>(self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {err:?}");
                if err.is_unexpected() {
                    error!("request failed: {err}");
                }
                error_response(err)
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(self, req: Request<ReqBody>) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // See if method makes sense if we don't have a filesystem.
        if !self.has_fs && method != DavMethod::Options {
            debug!("no filesystem: method not allowed on request {}", req.uri());
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // see if method is allowed.
        if let Some(ref a) = self.allow {
            if !a.contains(method) {
                debug!("method {} not allowed on request {}", req.method(), req.uri());
                return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
            }
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        self.guard.check_base(&self.principal, &req, method)?;

        let max_size = match method {
            DavMethod::Put => self.max_upload_size,
            _ => MAX_XML_BODY,
        };
        let body_data = self.read_request(body, max_size).await?;

        // Not all methods accept a body.
        match method {
            DavMethod::Put | DavMethod::PropFind | DavMethod::PropPatch | DavMethod::Lock | DavMethod::MkCol => {}
            _ => {
                if !body_data.is_empty() {
                    return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
                }
            }
        }

        debug!("== START REQUEST {method:?} {path}");

        let dav = self.guard.parse(&req, method, &body_data)?;
        if method == DavMethod::Options {
            return self.handle_options(&req, &path).await;
        }
        if path.is_star() {
            return Err(StatusCode::BAD_REQUEST.into());
        }

        let res = match self.resolve(&path).await {
            Some(res) => res,
            None => return Err(StatusCode::NOT_FOUND.into()),
        };

        // The If: header interceptor. A LOCK refresh checks its token itself.
        let is_refresh = dav.lock.as_ref().is_some_and(|l| l.info.is_none());
        if !self.skip_if_header.contains(method) && !is_refresh {
            if !self.evaluate_if_headers(&res, &dav.if_headers).await? {
                debug!("If: header does not match for {path}");
                return Err(StatusCode::PRECONDITION_FAILED.into());
            }
        }

        match method {
            DavMethod::Options => self.handle_options(&req, &path).await,
            DavMethod::PropFind => self.handle_propfind(&dav, res).await,
            DavMethod::PropPatch => self.handle_proppatch(&dav, res).await,
            DavMethod::MkCol => self.handle_mkcol(&dav, res).await,
            DavMethod::Delete => self.handle_delete(&dav, res).await,
            DavMethod::Lock => self.handle_lock(&dav, res).await,
            DavMethod::Unlock => self.handle_unlock(&dav, res).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&dav, res).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&dav, res).await,
            DavMethod::Put => self.handle_put(&req, &dav, res, body_data).await,
        }
    }
}

/// A response with an XML body.
pub(crate) fn xml_response(status: StatusCode, body: bytes::Bytes) -> Response<Body> {
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static(davxml::XML_CONTENT_TYPE),
    );
    resp
}

/// A response without body.
pub(crate) fn empty_response(status: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(http::header::CONTENT_LENGTH, http::HeaderValue::from_static("0"));
    resp
}

fn error_response(err: DavError) -> Response<Body> {
    if let DavError::LockConflict(lock) = &err {
        if let Ok(body) = davxml::lock_conflict_body(lock) {
            return xml_response(StatusCode::LOCKED, body);
        }
    }
    let mut resp = empty_response(err.statuscode());
    if err.must_close() {
        resp.headers_mut()
            .insert(http::header::CONNECTION, http::HeaderValue::from_static("close"));
    }
    resp
}
