use futures::future::join_all;
use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

use super::args::{DataArgs, ModuleArgs, RequestArgs};
use super::status::{check_status, Status};
use super::summary::{BufferSummary, SchedSummary};
use crate::buffer::{Pool, PutError};
use crate::http::{primary_domain, Request, Response};
use crate::module::{Data, Item, ModuleRef, ModuleSummary, ModuleType, Registrar};
use crate::{CrawlError, CrawlResult, Stage};

pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Paused,
    Running,
    Stopped,
}

/// Buffers, policy and dedup state of one prepared run.
struct Session {
    request_args: RequestArgs,
    data_args: DataArgs,
    accepted_domains: HashSet<String>,
    req_pool: Arc<Pool<Request>>,
    resp_pool: Arc<Pool<Response>>,
    item_pool: Arc<Pool<Item>>,
    error_pool: Arc<Pool<CrawlError>>,
    url_map: Mutex<HashSet<String>>,
    in_flight: Arc<AtomicUsize>,
}

impl Session {
    fn new(request_args: RequestArgs, data_args: DataArgs) -> CrawlResult<Self> {
        let accepted_domains = request_args.accepted_primary_domains()?;
        Ok(Self {
            req_pool: Arc::new(Pool::new(
                data_args.req_buffer_cap,
                data_args.req_max_buffer_number,
            )?),
            resp_pool: Arc::new(Pool::new(
                data_args.resp_buffer_cap,
                data_args.resp_max_buffer_number,
            )?),
            item_pool: Arc::new(Pool::new(
                data_args.item_buffer_cap,
                data_args.item_max_buffer_number,
            )?),
            error_pool: Arc::new(Pool::new(
                data_args.error_buffer_cap,
                data_args.error_max_buffer_number,
            )?),
            request_args,
            data_args,
            accepted_domains,
            url_map: Mutex::new(HashSet::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn close(&self) {
        self.req_pool.close();
        self.resp_pool.close();
        self.item_pool.close();
        self.error_pool.close();
    }

    fn send_error(&self, err: CrawlError) {
        match self.error_pool.try_put(err) {
            Ok(()) => {}
            Err(PutError::Full(err)) => {
                let pool = Arc::clone(&self.error_pool);
                tokio::spawn(async move {
                    let _ = pool.put(err).await;
                });
            }
            Err(PutError::Closed(err)) => trace!("Dropping error after close: {}", err),
        }
    }

    /// Checks scheme, domain and depth policy. Returns the primary domain.
    fn check_policy(&self, request: &Request) -> Result<String, String> {
        let scheme = request.url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(format!("unsupported scheme {}", scheme));
        }
        let primary = request.primary_domain().map_err(|e| e.to_string())?;
        if !self.accepted_domains.is_empty() && !self.accepted_domains.contains(&primary) {
            return Err(format!("domain {} not accepted", primary));
        }
        if request.depth > self.request_args.max_depth {
            return Err(format!(
                "depth {} exceeds max depth {}",
                request.depth, self.request_args.max_depth
            ));
        }
        Ok(primary)
    }

    /// Applies the policy and records the URL. Returns the dedup key.
    fn accept(&self, request: &Request) -> Result<String, String> {
        let primary = self.check_policy(request)?;
        let key = dedup_key(&primary, &request.url);
        if !self.url_map.lock().insert(key.clone()) {
            return Err("duplicate url".to_string());
        }
        Ok(key)
    }

    fn check_seed(&self, request: &Request) -> CrawlResult<()> {
        request.validate()?;
        let primary = request.primary_domain()?;
        if !self.accepted_domains.is_empty() && !self.accepted_domains.contains(&primary) {
            return Err(CrawlError::Argument(format!(
                "seed {} is outside the accepted domains",
                request.url
            )));
        }
        Ok(())
    }
}

fn dedup_key(primary: &str, url: &Url) -> String {
    format!("{}|{}", primary, url)
}

struct Inner {
    status: RwLock<Status>,
    registrar: Registrar,
    session: RwLock<Option<Arc<Session>>>,
    run: watch::Sender<RunState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    distribute_queue: RwLock<Option<Arc<Pool<Request>>>>,
    max_concurrency: AtomicUsize,
}

/// Drives downloader, analyzer and pipeline modules over four buffer pools.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (run, _) = watch::channel(RunState::Paused);
        Self {
            inner: Arc::new(Inner {
                status: RwLock::new(Status::Unprepared),
                registrar: Registrar::new(),
                session: RwLock::new(None),
                run,
                workers: Mutex::new(Vec::new()),
                distribute_queue: RwLock::new(None),
                max_concurrency: AtomicUsize::new(DEFAULT_MAX_CONCURRENCY),
            }),
        }
    }

    /// Maximum in-flight units of work per stage.
    pub fn with_max_concurrency(self, max_concurrency: usize) -> Self {
        self.inner
            .max_concurrency
            .store(max_concurrency.max(1), Ordering::SeqCst);
        self
    }

    /// Requests found by the analyzer go to this queue instead of the local request buffer.
    pub fn with_distribute_queue(self, queue: Arc<Pool<Request>>) -> Self {
        self.set_distribute_queue(Some(queue));
        self
    }

    pub fn set_distribute_queue(&self, queue: Option<Arc<Pool<Request>>>) {
        *self.inner.distribute_queue.write() = queue;
    }

    pub fn status(&self) -> Status {
        *self.inner.status.read()
    }

    fn session(&self) -> Option<Arc<Session>> {
        self.inner.session.read().clone()
    }

    pub fn init(
        &self,
        request_args: RequestArgs,
        data_args: DataArgs,
        module_args: ModuleArgs,
    ) -> CrawlResult<()> {
        request_args.check()?;
        data_args.check()?;
        module_args.check()?;

        let mut status = self.inner.status.write();
        let previous = *status;
        if previous == Status::Prepared {
            debug!("Scheduler already prepared");
            return Ok(());
        }
        if previous == Status::Stopped {
            *status = Status::Unprepared;
        }
        check_status(*status, Status::Preparing)?;
        *status = Status::Preparing;

        match self.prepare(request_args, data_args, module_args) {
            Ok(()) => {
                *status = Status::Prepared;
                info!("Scheduler prepared");
                Ok(())
            }
            Err(e) => {
                *status = previous;
                Err(e)
            }
        }
    }

    fn prepare(
        &self,
        request_args: RequestArgs,
        data_args: DataArgs,
        module_args: ModuleArgs,
    ) -> CrawlResult<()> {
        let session = Session::new(request_args, data_args)?;
        debug!(
            "Preparing scheduler (request args: {:?}, data args: {:?})",
            session.request_args, session.data_args
        );

        let registrar = &self.inner.registrar;
        registrar.clear();
        let modules = module_args
            .downloaders
            .into_iter()
            .map(ModuleRef::Downloader)
            .chain(module_args.analyzers.into_iter().map(ModuleRef::Analyzer))
            .chain(module_args.pipelines.into_iter().map(ModuleRef::Pipeline));
        for module in modules {
            registrar.register(module)?;
        }

        *self.inner.session.write() = Some(Arc::new(session));
        self.inner.run.send_replace(RunState::Paused);
        Ok(())
    }

    /// Starts a prepared scheduler or resumes a paused one.
    ///
    /// `first_requests` are validated before anything changes and then sent
    /// through the usual request policy. `None` only resumes draining the buffers.
    pub fn start(&self, first_requests: Option<Vec<Request>>) -> CrawlResult<()> {
        let mut status = self.inner.status.write();
        let previous = *status;
        check_status(previous, Status::Starting)?;
        *status = Status::Starting;

        let Some(session) = self.session() else {
            *status = previous;
            return Err(CrawlError::StatusConflict(
                "scheduler has no prepared session".to_string(),
            ));
        };
        if let Some(requests) = &first_requests {
            if let Err(e) = requests.iter().try_for_each(|r| session.check_seed(r)) {
                *status = previous;
                return Err(e);
            }
        }

        if previous == Status::Prepared {
            self.spawn_workers(&session);
        }
        self.inner.run.send_replace(RunState::Running);
        *status = Status::Started;
        drop(status);
        info!("Scheduler started (from {})", previous);

        for request in first_requests.into_iter().flatten() {
            let url = request.url.clone();
            if !self.send_req(request) {
                debug!("Seed {} was not enqueued", url);
            }
        }
        Ok(())
    }

    pub fn pause(&self) -> CrawlResult<()> {
        let mut status = self.inner.status.write();
        check_status(*status, Status::Pausing)?;
        *status = Status::Pausing;
        self.inner.run.send_replace(RunState::Paused);
        *status = Status::Paused;
        info!("Scheduler paused");
        Ok(())
    }

    pub fn recover(&self) -> CrawlResult<()> {
        let mut status = self.inner.status.write();
        if *status != Status::Paused {
            return Err(CrawlError::StatusConflict(format!(
                "cannot recover a {} scheduler",
                *status
            )));
        }
        check_status(*status, Status::Starting)?;
        *status = Status::Starting;
        self.inner.run.send_replace(RunState::Running);
        *status = Status::Started;
        info!("Scheduler recovered");
        Ok(())
    }

    /// Stops the workers, closes every buffer and waits for in-flight work.
    pub async fn stop(&self) -> CrawlResult<()> {
        {
            let mut status = self.inner.status.write();
            check_status(*status, Status::Stopping)?;
            *status = Status::Stopping;
        }
        self.inner.run.send_replace(RunState::Stopped);
        if let Some(session) = self.session() {
            session.close();
        }

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("Scheduler worker failed: {}", e);
            }
        }

        *self.inner.status.write() = Status::Stopped;
        info!("Scheduler stopped");
        Ok(())
    }

    /// True when the request, response and item buffers are empty and no module is busy.
    pub fn idle(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        if !(session.req_pool.is_empty()
            && session.resp_pool.is_empty()
            && session.item_pool.is_empty())
        {
            return false;
        }
        if session.in_flight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        self.inner
            .registrar
            .get_all()
            .values()
            .all(|module| module.handling_number() == 0)
    }

    /// Enqueues a request locally if it passes the policy and was not seen before.
    pub fn send_req(&self, request: Request) -> bool {
        let Some(session) = self.session() else {
            debug!("Ignoring request {}: scheduler not prepared", request.url);
            return false;
        };
        if *self.inner.run.borrow() == RunState::Stopped {
            debug!("Ignoring request {}: scheduler stopped", request.url);
            return false;
        }
        let key = match session.accept(&request) {
            Ok(key) => key,
            Err(reason) => {
                debug!("Ignoring request {}: {}", request.url, reason);
                return false;
            }
        };

        match session.req_pool.try_put(request) {
            Ok(()) => true,
            Err(PutError::Full(request)) => {
                let pool = Arc::clone(&session.req_pool);
                tokio::spawn(async move {
                    if let Err(e) = pool.put(request).await {
                        debug!("Request dropped: {}", e);
                    }
                });
                true
            }
            Err(PutError::Closed(_)) => {
                session.url_map.lock().remove(&key);
                false
            }
        }
    }

    /// Whether the URL was already accepted in the current run.
    pub fn has_request(&self, url: &Url) -> bool {
        let Some(session) = self.session() else {
            return false;
        };
        let Some(primary) = url.host_str().and_then(|host| primary_domain(host).ok()) else {
            return false;
        };
        let found = session.url_map.lock().contains(&dedup_key(&primary, url));
        found
    }

    pub fn url_number(&self) -> usize {
        self.session()
            .map(|session| session.url_map.lock().len())
            .unwrap_or(0)
    }

    /// Requests waiting in the local request buffer.
    pub fn request_number(&self) -> usize {
        self.session()
            .map(|session| session.req_pool.total())
            .unwrap_or(0)
    }

    /// Waits for the next pipeline error. `None` once the scheduler stops.
    pub async fn next_error(&self) -> Option<CrawlError> {
        let session = self.session()?;
        session.error_pool.get().await.ok()
    }

    pub fn summary(&self) -> SchedSummary {
        let status = self.status();
        let session = self.session();
        let modules = self.inner.registrar.get_all();
        let summaries = |module_type: ModuleType| -> Vec<ModuleSummary> {
            modules
                .values()
                .filter(|module| module.module_type() == module_type)
                .map(|module| module.summary())
                .collect()
        };

        SchedSummary {
            status,
            request_args: session.as_ref().map(|s| s.request_args.clone()),
            data_args: session.as_ref().map(|s| s.data_args),
            downloaders: summaries(ModuleType::Downloader),
            analyzers: summaries(ModuleType::Analyzer),
            pipelines: summaries(ModuleType::Pipeline),
            req_buffer: session.as_ref().map(|s| BufferSummary::of(&s.req_pool)),
            resp_buffer: session.as_ref().map(|s| BufferSummary::of(&s.resp_pool)),
            item_buffer: session.as_ref().map(|s| BufferSummary::of(&s.item_pool)),
            error_buffer: session.as_ref().map(|s| BufferSummary::of(&s.error_pool)),
            url_number: session.as_ref().map(|s| s.url_map.lock().len()).unwrap_or(0),
            in_flight: session
                .as_ref()
                .map(|s| s.in_flight.load(Ordering::SeqCst))
                .unwrap_or(0),
        }
    }

    fn spawn_workers(&self, session: &Arc<Session>) {
        let max_concurrency = self.inner.max_concurrency.load(Ordering::SeqCst);
        let weak = Arc::downgrade(&self.inner);
        let mut workers = self.inner.workers.lock();

        workers.push(tokio::spawn(run_stage(
            Stage::Download,
            Arc::clone(&session.req_pool),
            self.inner.run.subscribe(),
            max_concurrency,
            Arc::clone(&session.in_flight),
            stage_handler(weak.clone(), session, |sched, session, request| async move {
                sched.download(&session, request).await
            }),
        )));
        workers.push(tokio::spawn(run_stage(
            Stage::Analyze,
            Arc::clone(&session.resp_pool),
            self.inner.run.subscribe(),
            max_concurrency,
            Arc::clone(&session.in_flight),
            stage_handler(weak.clone(), session, |sched, session, response| async move {
                sched.analyze(&session, response).await
            }),
        )));
        workers.push(tokio::spawn(run_stage(
            Stage::Process,
            Arc::clone(&session.item_pool),
            self.inner.run.subscribe(),
            max_concurrency,
            Arc::clone(&session.in_flight),
            stage_handler(weak, session, |sched, session, item| async move {
                sched.process(&session, item).await
            }),
        )));
    }

    async fn download(&self, session: &Session, request: Request) {
        let downloader = match self.inner.registrar.get_downloader() {
            Ok(downloader) => downloader,
            Err(e) => {
                session.send_error(CrawlError::stage(
                    Stage::Schedule,
                    e.to_string(),
                    request.url.as_str(),
                ));
                return;
            }
        };
        match downloader.download(request).await {
            Ok(response) => {
                if let Err(e) = session.resp_pool.put(response).await {
                    trace!("Response dropped: {}", e);
                }
            }
            Err(e) => {
                warn!("{}", e);
                session.send_error(e);
            }
        }
    }

    async fn analyze(&self, session: &Session, response: Response) {
        let analyzer = match self.inner.registrar.get_analyzer() {
            Ok(analyzer) => analyzer,
            Err(e) => {
                session.send_error(CrawlError::stage(
                    Stage::Schedule,
                    e.to_string(),
                    response.url.as_str(),
                ));
                return;
            }
        };
        let (data, errors) = analyzer.analyze(response).await;
        for datum in data {
            match datum {
                Data::Request(request) => self.route_request(session, request),
                Data::Item(item) => {
                    if let Err(e) = session.item_pool.put(item).await {
                        trace!("Item dropped: {}", e);
                    }
                }
            }
        }
        for e in errors {
            warn!("{}", e);
            session.send_error(e);
        }
    }

    async fn process(&self, session: &Session, item: Item) {
        let pipeline = match self.inner.registrar.get_pipeline() {
            Ok(pipeline) => pipeline,
            Err(e) => {
                session.send_error(CrawlError::stage(Stage::Schedule, e.to_string(), "item"));
                return;
            }
        };
        for e in pipeline.send(item).await {
            warn!("{}", e);
            session.send_error(e);
        }
    }

    /// New requests go through cluster distribution when a distribute queue is set.
    fn route_request(&self, session: &Session, request: Request) {
        let queue = self.inner.distribute_queue.read().clone();
        let Some(queue) = queue else {
            self.send_req(request);
            return;
        };
        if let Err(reason) = session.check_policy(&request) {
            debug!("Not distributing {}: {}", request.url, reason);
            return;
        }
        match queue.try_put(request) {
            Ok(()) => {}
            Err(PutError::Full(request)) => {
                tokio::spawn(async move {
                    if let Err(e) = queue.put(request).await {
                        debug!("Distribute queue rejected request: {}", e);
                    }
                });
            }
            Err(PutError::Closed(request)) => {
                debug!("Distribute queue closed, dropping {}", request.url)
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a stage body to a weak scheduler handle and the session it runs in.
fn stage_handler<T, F, Fut>(
    weak: Weak<Inner>,
    session: &Arc<Session>,
    body: F,
) -> impl Fn(T) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send>>
where
    T: Send + 'static,
    F: Fn(Scheduler, Arc<Session>, T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let session = Arc::clone(session);
    move |unit: T| {
        let weak = weak.clone();
        let session = Arc::clone(&session);
        let body = body.clone();
        Box::pin(async move {
            if let Some(inner) = weak.upgrade() {
                body(Scheduler { inner }, session, unit).await;
            }
        })
    }
}

/// Pulls units of work from `pool` and runs `handle` on each with bounded concurrency
/// until the scheduler stops or the pool closes. Waits for started work before returning.
async fn run_stage<T, F, Fut>(
    stage: Stage,
    pool: Arc<Pool<T>>,
    mut run: watch::Receiver<RunState>,
    max_concurrency: usize,
    in_flight: Arc<AtomicUsize>,
    handle: F,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut tasks = JoinSet::new();
    loop {
        let state = *run.borrow_and_update();
        match state {
            RunState::Stopped => break,
            RunState::Paused => {
                tokio::select! {
                    Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                    changed = run.changed() => if changed.is_err() { break },
                }
                continue;
            }
            RunState::Running => {}
        }

        if tasks.len() >= max_concurrency {
            tasks.join_next().await;
            continue;
        }

        // state changes win over new work so a pause takes effect immediately
        tokio::select! {
            biased;
            changed = run.changed() => if changed.is_err() { break },
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            unit = pool.get() => match unit {
                Ok(unit) => {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    let in_flight = Arc::clone(&in_flight);
                    let work = handle(unit);
                    tasks.spawn(async move {
                        work.await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                Err(_) => break,
            },
        }
    }

    while tasks.join_next().await.is_some() {}
    debug!("{} loop exited", stage);
}
